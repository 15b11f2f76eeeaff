//! Run-scoped context shared by every scenario worker.

use anyhow::Result;
use tracing::info;

use crate::dispatch::ActionDispatcher;
use crate::io::action_tool::{ActionTool, OpcActionTool};
use crate::io::config::{GatecheckConfig, process_env};
use crate::io::credentials::{CredentialCache, EnvLookup, OcAuthenticator};
use crate::io::gate::{GateSource, OcGateSource};
use crate::io::groups::{GroupDirectory, OcGroupDirectory};
use crate::io::submit::{OcRunSubmitter, RunSubmitter};
use crate::io::tasks::{OcTaskSource, TaskSource};
use crate::wait::PollPolicy;

/// Owns the session cache and every external collaborator for one run.
///
/// Created once per process, shared by reference across workers, and torn
/// down once at the end of the run.
pub struct RunContext {
    pub config: GatecheckConfig,
    pub credentials: CredentialCache,
    pub groups: Box<dyn GroupDirectory>,
    pub tasks: Box<dyn TaskSource>,
    pub gates: Box<dyn GateSource>,
    pub tool: Box<dyn ActionTool>,
    pub submitter: Box<dyn RunSubmitter>,
    env: EnvLookup,
}

impl RunContext {
    pub fn new(
        config: GatecheckConfig,
        credentials: CredentialCache,
        groups: impl GroupDirectory + 'static,
        tasks: impl TaskSource + 'static,
        gates: impl GateSource + 'static,
        tool: impl ActionTool + 'static,
        submitter: impl RunSubmitter + 'static,
    ) -> Self {
        Self {
            config,
            credentials,
            groups: Box::new(groups),
            tasks: Box::new(tasks),
            gates: Box::new(gates),
            tool: Box::new(tool),
            submitter: Box::new(submitter),
            env: Box::new(process_env),
        }
    }

    /// Context backed by the `oc`/`opc` tools named in `config`.
    pub fn production(config: GatecheckConfig) -> Self {
        let credentials = CredentialCache::new(OcAuthenticator::from_config(&config));
        let groups = OcGroupDirectory::from_config(&config);
        let tasks = OcTaskSource::from_config(&config);
        let gates = OcGateSource::from_config(&config);
        let tool = OpcActionTool::from_config(&config);
        let submitter = OcRunSubmitter::from_config(&config);
        Self::new(config, credentials, groups, tasks, gates, tool, submitter)
    }

    /// Override the environment used for timeout-class resolution.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    pub fn env(&self, var: &str) -> Option<String> {
        (self.env)(var)
    }

    pub fn dispatcher(&self) -> ActionDispatcher<'_> {
        ActionDispatcher::new(&self.credentials, self.tool.as_ref())
    }

    pub fn locate_policy(&self) -> PollPolicy {
        PollPolicy::new(self.config.poll_tick(), self.config.locate_timeout())
    }

    pub fn state_policy(&self) -> PollPolicy {
        PollPolicy::new(self.config.poll_tick(), self.config.state_timeout())
    }

    pub fn list_state_policy(&self) -> PollPolicy {
        PollPolicy::new(self.config.poll_tick(), self.config.list_state_timeout())
    }

    pub fn message_policy(&self) -> PollPolicy {
        PollPolicy::new(self.config.poll_tick(), self.config.message_timeout())
    }

    pub fn gate_policy(&self) -> PollPolicy {
        PollPolicy::new(self.config.poll_tick(), self.config.gate_timeout())
    }

    /// Remove every session artifact and clear all dirty flags.
    pub fn teardown(&self) -> Result<()> {
        let removed = self.credentials.teardown()?;
        info!(removed, "run context torn down");
        Ok(())
    }
}

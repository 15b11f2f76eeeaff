//! Identity-scoped invocation of the approval CLI.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::action::Verb;
use crate::error::VerifyError;
use crate::io::config::GatecheckConfig;
use crate::io::process::ToolCommand;

/// One approve/reject call made under a specific identity.
#[derive(Debug, Clone)]
pub struct ActionRequest<'a> {
    pub verb: Verb,
    pub task: &'a str,
    pub namespace: &'a str,
    /// Free text passed as `-m`; blank messages are omitted.
    pub message: &'a str,
    /// Credential context of the acting identity; `None` runs under the
    /// ambient (admin) context.
    pub kubeconfig: Option<&'a Path>,
}

/// Outcome of a tool call that ran to completion (successfully or not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub command: String,
    /// `None` when the process was killed (e.g. timed out).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn into_error(self) -> VerifyError {
        VerifyError::CommandFailed {
            command: self.command,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

pub trait ActionTool: Send + Sync {
    /// Run the action. `Err` only for failures to run the tool at all;
    /// a non-zero exit is reported through [`ToolResult`].
    fn invoke(&self, request: &ActionRequest<'_>) -> Result<ToolResult>;
}

/// `opc approvaltask approve|reject <task> -n <ns> [-m <message>]`.
pub struct OpcActionTool {
    opc: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl OpcActionTool {
    pub fn from_config(cfg: &GatecheckConfig) -> Self {
        Self {
            opc: cfg.tools.opc.clone(),
            timeout: cfg.cli_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

/// Argument vector for an action, shared by every tool front-end.
pub fn action_args(request: &ActionRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "approvaltask".to_string(),
        request.verb.as_str().to_string(),
        request.task.to_string(),
        "-n".to_string(),
        request.namespace.to_string(),
    ];
    if !request.message.trim().is_empty() {
        args.push("-m".to_string());
        args.push(request.message.to_string());
    }
    args
}

impl ActionTool for OpcActionTool {
    #[instrument(skip_all, fields(verb = request.verb.as_str(), task = request.task))]
    fn invoke(&self, request: &ActionRequest<'_>) -> Result<ToolResult> {
        let mut cmd = ToolCommand::new(&self.opc, action_args(request));
        if let Some(kubeconfig) = request.kubeconfig {
            cmd = cmd.env("KUBECONFIG", kubeconfig.to_string_lossy());
        }
        let output = cmd.run(self.timeout, self.output_limit_bytes)?;
        let exit_code = if output.timed_out {
            None
        } else {
            output.status.code()
        };
        debug!(?exit_code, "action tool finished");
        Ok(ToolResult {
            command: cmd.display(),
            exit_code,
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        })
    }
}

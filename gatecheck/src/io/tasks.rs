//! Snapshot fetch for approval tasks.
//!
//! A missing resource is reported as [`VerifyError::NotReady`] so waiters keep
//! polling; everything else is a hard error.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::core::types::{ApprovalTask, ApprovalTaskList};
use crate::error::VerifyError;
use crate::io::config::GatecheckConfig;
use crate::io::process::{ToolCommand, command_failed};

pub trait TaskSource: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Result<ApprovalTask>;
    fn list(&self, namespace: &str) -> Result<Vec<ApprovalTask>>;
}

/// `oc get ... -o json` with NotFound mapped to [`VerifyError::NotReady`].
pub(crate) struct OcJsonReader {
    oc: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl OcJsonReader {
    pub(crate) fn from_config(cfg: &GatecheckConfig) -> Self {
        Self {
            oc: cfg.tools.oc.clone(),
            timeout: cfg.cli_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    pub(crate) fn get_json<T: DeserializeOwned>(&self, args: &[&str], what: &str) -> Result<T> {
        let cmd = ToolCommand::new(&self.oc, args.iter().copied());
        let output = cmd.run(self.timeout, self.output_limit_bytes)?;
        if !output.success() {
            let stderr = output.stderr_lossy();
            if is_not_found(&stderr) {
                debug!(what, "resource not found yet");
                return Err(VerifyError::NotReady(format!("{what} not found")).into());
            }
            return Err(command_failed(&cmd, &output).into());
        }
        serde_json::from_slice(&output.stdout).with_context(|| format!("parse {what} json"))
    }
}

/// Reads `approvaltask` resources with `oc get -o json`.
pub struct OcTaskSource {
    reader: OcJsonReader,
}

impl OcTaskSource {
    pub fn from_config(cfg: &GatecheckConfig) -> Self {
        Self {
            reader: OcJsonReader::from_config(cfg),
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("notfound") || stderr.contains("not found")
}

impl TaskSource for OcTaskSource {
    #[instrument(skip(self))]
    fn get(&self, namespace: &str, name: &str) -> Result<ApprovalTask> {
        self.reader.get_json(
            &["get", "approvaltask", name, "-n", namespace, "-o", "json"],
            &format!("approvaltask {namespace}/{name}"),
        )
    }

    #[instrument(skip(self))]
    fn list(&self, namespace: &str) -> Result<Vec<ApprovalTask>> {
        let list: ApprovalTaskList = self.reader.get_json(
            &["get", "approvaltasks", "-n", namespace, "-o", "json"],
            &format!("approvaltasks in {namespace}"),
        )?;
        Ok(list.items)
    }
}

//! Approval-gated run submission.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use tracing::{debug, info, instrument};

use crate::core::names::slug_id;
use crate::error::VerifyError;
use crate::io::config::GatecheckConfig;
use crate::io::process::ToolCommand;

const APPROVAL_RUN_TEMPLATE: &str = include_str!("templates/approval_run.yaml");

/// Parameters of one approval-gated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Testcase id, used in the run's `generateName`.
    pub case_id: String,
    pub namespace: String,
    pub description: String,
    /// `user` or `group:<name>` entries.
    pub approvers: Vec<String>,
    pub required: i64,
    /// Duration string handed to the approval task.
    pub timeout: String,
}

impl RunRequest {
    /// Trimmed, non-empty approvers. Fails before any external call when the
    /// list is empty or the required count is not positive.
    pub fn validated_approvers(&self) -> Result<Vec<String>, VerifyError> {
        if self.approvers.is_empty() {
            return Err(VerifyError::config("approvers list is empty"));
        }
        if self.required <= 0 {
            return Err(VerifyError::config(format!(
                "numberOfApprovalsRequired must be > 0; got {}",
                self.required
            )));
        }
        let approvers: Vec<String> = self
            .approvers
            .iter()
            .map(|approver| approver.trim())
            .filter(|approver| !approver.is_empty())
            .map(str::to_string)
            .collect();
        if approvers.is_empty() {
            return Err(VerifyError::config("approvers list is empty after trimming"));
        }
        Ok(approvers)
    }

    pub fn generate_name(&self) -> String {
        format!("approva-grp-plr-{}-", slug_id(&self.case_id))
    }
}

/// Render the PipelineRun manifest for `request`.
pub fn render_manifest(request: &RunRequest) -> Result<String> {
    let approvers = request.validated_approvers()?;
    // JSON strings are valid YAML scalars, so quoting through serde_json
    // keeps `group:` prefixes and free text intact.
    let quoted = approvers
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("quote approvers")?;

    let mut env = Environment::new();
    env.add_template("approval_run", APPROVAL_RUN_TEMPLATE)
        .context("load approval run template")?;
    let rendered = env
        .get_template("approval_run")?
        .render(context! {
            generate_name => request.generate_name(),
            namespace => request.namespace.trim(),
            timeout => serde_json::to_string(request.timeout.trim())?,
            approvers => quoted,
            required => request.required,
            description => serde_json::to_string(&request.description)?,
        })
        .context("render approval run template")?;
    Ok(rendered)
}

pub trait RunSubmitter: Send + Sync {
    /// Submit a run and return the name the cluster assigned to it.
    fn submit(&self, request: &RunRequest) -> Result<String>;
}

/// Submits the rendered manifest with `oc create -f -`.
pub struct OcRunSubmitter {
    oc: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl OcRunSubmitter {
    pub fn from_config(cfg: &GatecheckConfig) -> Self {
        Self {
            oc: cfg.tools.oc.clone(),
            timeout: cfg.cli_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl RunSubmitter for OcRunSubmitter {
    #[instrument(skip_all, fields(case_id = %request.case_id, namespace = %request.namespace))]
    fn submit(&self, request: &RunRequest) -> Result<String> {
        let manifest = render_manifest(request)?;
        debug!(manifest = %manifest, "submitting approval run");
        let output = ToolCommand::new(
            &self.oc,
            [
                "create",
                "-n",
                request.namespace.trim(),
                "-f",
                "-",
                "-o",
                "jsonpath={.metadata.name}",
            ],
        )
        .stdin(manifest)
        .run_checked(self.timeout, self.output_limit_bytes)?;

        let name = output.stdout_lossy().trim().to_string();
        if name.is_empty() {
            return Err(anyhow!("failed to create PipelineRun: got empty name"));
        }
        info!(run = %name, "approval run created");
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest {
            case_id: "07".to_string(),
            namespace: "ns1".to_string(),
            description: "needs \"two\" approvals".to_string(),
            approvers: vec![
                " alice ".to_string(),
                String::new(),
                "group:mag-ns1-reviewers".to_string(),
            ],
            required: 2,
            timeout: "5m".to_string(),
        }
    }

    #[test]
    fn manifest_lists_each_approver_on_its_own_line() {
        let manifest = render_manifest(&request()).expect("render");
        assert!(manifest.contains("generateName: approva-grp-plr-07-\n"));
        assert!(manifest.contains("namespace: ns1\n"));
        assert!(manifest.contains("timeout: \"5m\"\n"));
        assert!(manifest.contains(
            "            value:\n              - \"alice\"\n              - \"group:mag-ns1-reviewers\"\n          - name: numberOfApprovalsRequired\n"
        ));
        assert!(manifest.contains("value: \"2\"\n"));
        assert!(manifest.contains(r#"value: "needs \"two\" approvals""#));
    }

    #[test]
    fn non_positive_required_is_a_config_error() {
        let mut req = request();
        req.required = 0;
        let err = render_manifest(&req).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VerifyError>(),
            Some(VerifyError::Config(msg)) if msg.contains("got 0")
        ));
    }

    #[test]
    fn blank_approvers_are_a_config_error() {
        let mut req = request();
        req.approvers = vec![" ".to_string()];
        assert!(matches!(
            req.validated_approvers(),
            Err(VerifyError::Config(msg)) if msg.contains("after trimming")
        ));
        req.approvers.clear();
        assert!(req.validated_approvers().is_err());
    }

    #[test]
    fn generate_name_slugs_the_case_id() {
        let mut req = request();
        req.case_id = "Smoke_Test 1".to_string();
        assert_eq!(req.generate_name(), "approva-grp-plr-smoke-test-1-");
    }
}

//! Identity-scoped approve/reject actions.
//!
//! Every action resolves a fresh-or-cached session for the acting user first,
//! then runs the action tool under that identity. The two inverted actions
//! turn an expected tool refusal into a pass.

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::action::{Action, Verb, is_final_state_refusal};
use crate::error::VerifyError;
use crate::io::action_tool::{ActionRequest, ActionTool, ToolResult};
use crate::io::credentials::CredentialCache;

/// Where an action is aimed and what it says.
#[derive(Debug, Clone, Copy)]
pub struct ActionTarget<'a> {
    pub user: &'a str,
    pub task: &'a str,
    pub namespace: &'a str,
    pub message: &'a str,
}

/// How a dispatched action passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The tool accepted the action.
    Applied,
    /// `approve-expect-fail`: the tool refused, as required.
    RefusedAsExpected,
    /// `approve-allow-final-state`: refused because the task is already terminal.
    AlreadyFinal,
}

pub struct ActionDispatcher<'a> {
    credentials: &'a CredentialCache,
    tool: &'a dyn ActionTool,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(credentials: &'a CredentialCache, tool: &'a dyn ActionTool) -> Self {
        Self { credentials, tool }
    }

    /// Parse `keyword` and dispatch it. Unknown or empty keywords fail before
    /// any session is resolved.
    pub fn dispatch_keyword(
        &self,
        keyword: &str,
        target: &ActionTarget<'_>,
    ) -> Result<DispatchOutcome> {
        let action: Action = keyword.parse()?;
        self.dispatch(action, target)
    }

    #[instrument(skip(self, target), fields(action = %action, user = target.user, task = target.task))]
    pub fn dispatch(&self, action: Action, target: &ActionTarget<'_>) -> Result<DispatchOutcome> {
        let result = self.invoke(action, target)?;
        let outcome = match action {
            Action::Approve | Action::Reject => {
                if !result.success() {
                    return Err(result.into_error().into());
                }
                DispatchOutcome::Applied
            }
            Action::ApproveExpectFail => {
                if result.success() {
                    return Err(VerifyError::mismatch(
                        format!(
                            "approval by {} on {} expected to fail but succeeded",
                            target.user, target.task
                        ),
                        "non-zero exit",
                        "exit code 0",
                    )
                    .into());
                }
                DispatchOutcome::RefusedAsExpected
            }
            Action::ApproveAllowFinalState => {
                if result.success() {
                    DispatchOutcome::Applied
                } else if is_final_state_refusal(&result.stdout, &result.stderr) {
                    DispatchOutcome::AlreadyFinal
                } else {
                    return Err(result.into_error().into());
                }
            }
        };
        info!(?outcome, "action dispatched");
        Ok(outcome)
    }

    fn invoke(&self, action: Action, target: &ActionTarget<'_>) -> Result<ToolResult> {
        let kubeconfig = self.credentials.ensure_session(target.user)?;
        self.tool.invoke(&ActionRequest {
            verb: action.verb(),
            task: target.task,
            namespace: target.namespace,
            message: target.message,
            kubeconfig: Some(&kubeconfig),
        })
    }

    /// Run `verb` on `task` under the ambient admin context. Any refusal fails.
    #[instrument(skip(self, message), fields(verb = verb.as_str()))]
    pub fn dispatch_admin(
        &self,
        verb: Verb,
        task: &str,
        namespace: &str,
        message: &str,
    ) -> Result<()> {
        let result = self.tool.invoke(&ActionRequest {
            verb,
            task,
            namespace,
            message,
            kubeconfig: None,
        })?;
        if !result.success() {
            return Err(result.into_error().into());
        }
        info!("admin action dispatched");
        Ok(())
    }
}

//! Action keywords accepted by the dispatcher.

use std::fmt;
use std::str::FromStr;

use crate::error::VerifyError;

/// Verb understood by the external action tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Approve,
    Reject,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// Closed set of identity-scoped actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Approve; a failing tool call fails the step.
    Approve,
    /// Reject; a failing tool call fails the step.
    Reject,
    /// Approve and require the tool to refuse.
    ApproveExpectFail,
    /// Approve, tolerating a refusal because the task is already terminal.
    ApproveAllowFinalState,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Approve,
        Action::Reject,
        Action::ApproveExpectFail,
        Action::ApproveAllowFinalState,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::ApproveExpectFail => "approve-expect-fail",
            Self::ApproveAllowFinalState => "approve-allow-final-state",
        }
    }

    pub fn verb(self) -> Verb {
        match self {
            Self::Reject => Verb::Reject,
            Self::Approve | Self::ApproveExpectFail | Self::ApproveAllowFinalState => {
                Verb::Approve
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for Action {
    type Err = VerifyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(VerifyError::config("approval task action is empty"));
        }
        Action::ALL
            .into_iter()
            .find(|action| action.keyword() == normalized)
            .ok_or_else(|| VerifyError::config(format!("unsupported approval gate action: {raw}")))
    }
}

/// True when the tool refused because the task already reached a terminal state.
///
/// Matches both markers case-insensitively anywhere in the combined output.
pub fn is_final_state_refusal(stdout: &str, stderr: &str) -> bool {
    let combined = format!("{stdout}\n{stderr}").to_lowercase();
    combined.contains("already reached") && combined.contains("final state")
}

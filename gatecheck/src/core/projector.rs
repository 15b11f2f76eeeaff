//! Independent re-derivation of the values the approval CLI displays.
//!
//! Verification compares these against expectations instead of trusting any
//! summary field the controller might publish. The arithmetic follows the
//! approval CLI's own `list` calculation so both sides agree on edge cases.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::types::{
    ApprovalTask, ApproverType, Response, STATE_APPROVED, STATE_PENDING, STATE_REJECTED,
};

/// `NumberOfApprovalsRequired - |distinct responded identities|`.
///
/// A User entry counts its own name as soon as it is present in the status.
/// A Group entry counts each member whose own response is approved or
/// rejected. The result is not clamped and may go negative.
pub fn pending_approvals(task: &ApprovalTask) -> i64 {
    let mut responded: BTreeSet<&str> = BTreeSet::new();
    for approver in &task.status.approvers_response {
        match approver.approver_type() {
            ApproverType::User => {
                responded.insert(approver.name.as_str());
            }
            ApproverType::Group => {
                responded.extend(
                    approver
                        .group_members
                        .iter()
                        .filter(|member| member.response.is_decided())
                        .map(|member| member.name.as_str()),
                );
            }
            ApproverType::Other(_) => {}
        }
    }
    task.approvals_required() - responded.len() as i64
}

/// Distinct names with a rejected response.
///
/// Direct User rejections and Group-member rejections share one name set, so
/// a name that rejected in both roles counts once.
pub fn rejected_count(task: &ApprovalTask) -> i64 {
    let mut rejected: BTreeSet<&str> = BTreeSet::new();
    for approver in &task.status.approvers_response {
        match approver.approver_type() {
            ApproverType::User if approver.response == Response::Rejected => {
                rejected.insert(approver.name.as_str());
            }
            ApproverType::Group => {
                rejected.extend(
                    approver
                        .group_members
                        .iter()
                        .filter(|member| member.response == Response::Rejected)
                        .map(|member| member.name.as_str()),
                );
            }
            _ => {}
        }
    }
    rejected.len() as i64
}

/// Display form of the raw state. Unknown states pass through unchanged.
pub fn state_human(task: &ApprovalTask) -> String {
    humanize_state(task.raw_state())
}

pub fn humanize_state(raw: &str) -> String {
    match raw {
        STATE_PENDING => "Pending".to_string(),
        STATE_APPROVED => "Approved".to_string(),
        STATE_REJECTED => "Rejected".to_string(),
        other => other.to_string(),
    }
}

/// The four values the aggregate assertion compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListState {
    pub required: i64,
    pub pending: i64,
    pub rejected: i64,
    pub status: String,
}

impl ListState {
    pub fn project(task: &ApprovalTask) -> Self {
        Self {
            required: task.approvals_required(),
            pending: pending_approvals(task),
            rejected: rejected_count(task),
            status: state_human(task),
        }
    }
}

impl std::fmt::Display for ListState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "num={} pending={} rejected={} status={}",
            self.required, self.pending, self.rejected, self.status
        )
    }
}

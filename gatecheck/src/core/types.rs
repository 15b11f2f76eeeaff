//! Approval-task snapshot model.
//!
//! Mirrors the subset of the `ApprovalTask` resource that verification reads.
//! Snapshots are observed, never written: the external controller owns them
//! and changes them only in response to the action tool.

use serde::{Deserialize, Serialize};

pub const STATE_PENDING: &str = "pending";
pub const STATE_APPROVED: &str = "approved";
pub const STATE_REJECTED: &str = "rejected";

/// Kind of approver entry. Absent or empty values default to `User`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproverType {
    User,
    Group,
    Other(String),
}

impl ApproverType {
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("User") => Self::User,
            Some("Group") => Self::Group,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// An individual response value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    #[default]
    Pending,
    Approved,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl Response {
    /// True when the identity has actually responded (approved or rejected).
    pub fn is_decided(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupMember {
    pub name: String,
    pub response: Response,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApproverResponse {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    pub response: Response,
    pub message: String,
    pub group_members: Vec<GroupMember>,
}

impl ApproverResponse {
    pub fn approver_type(&self) -> ApproverType {
        ApproverType::from_raw(self.kind.as_deref())
    }
}

/// Spec-level approver entry; `message` is written synchronously by the action tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpecApprover {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub input: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApprovalTaskSpec {
    pub approvers: Vec<SpecApprover>,
    pub number_of_approvals_required: i64,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApprovalTaskStatus {
    /// Raw state; `pending`, `approved`, `rejected` or anything the controller writes.
    pub state: String,
    pub approvers_response: Vec<ApproverResponse>,
}

/// One observed `ApprovalTask`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalTask {
    pub metadata: ObjectMeta,
    pub spec: ApprovalTaskSpec,
    pub status: ApprovalTaskStatus,
}

impl ApprovalTask {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn raw_state(&self) -> &str {
        &self.status.state
    }

    pub fn approvals_required(&self) -> i64 {
        self.spec.number_of_approvals_required
    }
}

/// `kubectl`-style list wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalTaskList {
    pub items: Vec<ApprovalTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManualApprovalGateSpec {
    pub target_namespace: String,
}

/// Cluster-scoped resource whose presence means the gate controller is installed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualApprovalGate {
    pub metadata: ObjectMeta,
    pub spec: ManualApprovalGateSpec,
}

//! Poll predicates over task snapshots.

use chrono::{DateTime, FixedOffset};

use crate::core::projector::{ListState, state_human};
use crate::core::types::ApprovalTask;

/// Case-insensitive equality of the raw state and `expected`.
pub fn state_equals(task: &ApprovalTask, expected: &str) -> bool {
    task.raw_state().to_lowercase() == expected.trim().to_lowercase()
}

/// True when `text` occurs in any approver message.
///
/// Checks, in order: spec-level approver messages (written synchronously by
/// the action tool), status-level response messages, and group-member
/// messages (both written later by the controller). Empty `text` never matches.
pub fn message_contains(task: &ApprovalTask, text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    if task
        .spec
        .approvers
        .iter()
        .any(|approver| approver.message.contains(text))
    {
        return true;
    }
    task.status.approvers_response.iter().any(|response| {
        response.message.contains(text)
            || response
                .group_members
                .iter()
                .any(|member| member.message.contains(text))
    })
}

/// True when the independently projected values equal `expected`.
pub fn list_state_matches(task: &ApprovalTask, expected: &ListState) -> bool {
    ListState::project(task) == *expected
}

/// First task whose display status equals `expected`, ignoring case.
pub fn any_task_in_state<'a>(
    tasks: &'a [ApprovalTask],
    expected: &str,
) -> Option<&'a ApprovalTask> {
    let expected = expected.trim();
    tasks
        .iter()
        .find(|task| state_human(task).eq_ignore_ascii_case(expected))
}

/// Pick the most recently created task.
///
/// Unparseable or missing timestamps sort oldest. Ties keep the earliest
/// position in `tasks`.
pub fn newest_task(tasks: &[ApprovalTask]) -> Option<&ApprovalTask> {
    let mut best: Option<(&ApprovalTask, Option<DateTime<FixedOffset>>)> = None;
    for task in tasks {
        let created = creation_time(task);
        let newer = match &best {
            Some((_, best_created)) => created > *best_created,
            None => true,
        };
        if newer {
            best = Some((task, created));
        }
    }
    best.map(|(task, _)| task)
}

fn creation_time(task: &ApprovalTask) -> Option<DateTime<FixedOffset>> {
    task.metadata
        .creation_timestamp
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ApproverResponse, GroupMember, SpecApprover};

    fn named(name: &str, created: Option<&str>) -> ApprovalTask {
        let mut task = ApprovalTask::default();
        task.metadata.name = name.to_string();
        task.metadata.creation_timestamp = created.map(str::to_string);
        task
    }

    #[test]
    fn state_equality_ignores_case() {
        let mut task = ApprovalTask::default();
        task.status.state = "Approved".to_string();
        assert!(state_equals(&task, "approved"));
        assert!(state_equals(&task, "APPROVED"));
        assert!(!state_equals(&task, "rejected"));
    }

    #[test]
    fn message_found_in_spec_approver() {
        let mut task = ApprovalTask::default();
        task.spec.approvers.push(SpecApprover {
            name: "alice".to_string(),
            message: "looks good to me".to_string(),
            ..SpecApprover::default()
        });
        assert!(message_contains(&task, "good"));
        assert!(!message_contains(&task, "bad"));
    }

    #[test]
    fn message_found_in_group_member() {
        let mut task = ApprovalTask::default();
        task.status.approvers_response.push(ApproverResponse {
            kind: Some("Group".to_string()),
            name: "reviewers".to_string(),
            group_members: vec![GroupMember {
                name: "bob".to_string(),
                message: "ship it".to_string(),
                ..GroupMember::default()
            }],
            ..ApproverResponse::default()
        });
        assert!(message_contains(&task, "ship it"));
    }

    #[test]
    fn empty_message_never_matches() {
        let mut task = ApprovalTask::default();
        task.status.approvers_response.push(ApproverResponse {
            message: "anything".to_string(),
            ..ApproverResponse::default()
        });
        assert!(!message_contains(&task, ""));
    }

    #[test]
    fn newest_task_wins() {
        let tasks = vec![
            named("old", Some("2026-01-01T00:00:00Z")),
            named("new", Some("2026-01-01T00:00:05Z")),
            named("unknown", None),
        ];
        assert_eq!(newest_task(&tasks).map(ApprovalTask::name), Some("new"));
    }

    #[test]
    fn newest_task_ties_keep_discovery_order() {
        let tasks = vec![
            named("first", Some("2026-01-01T00:00:00Z")),
            named("second", Some("2026-01-01T00:00:00Z")),
        ];
        assert_eq!(newest_task(&tasks).map(ApprovalTask::name), Some("first"));
    }

    #[test]
    fn any_task_matches_on_display_status() {
        let mut pending = named("a", None);
        pending.status.state = "pending".to_string();
        let mut rejected = named("b", None);
        rejected.status.state = "rejected".to_string();
        let tasks = vec![pending, rejected];

        let found = |expected| any_task_in_state(&tasks, expected).map(ApprovalTask::name);
        assert_eq!(found("Rejected"), Some("b"));
        assert_eq!(found(" pending "), Some("a"));
        assert!(any_task_in_state(&tasks, "Approved").is_none());
        assert!(any_task_in_state(&[], "Pending").is_none());
    }

    #[test]
    fn newest_task_of_empty_list_is_none() {
        assert!(newest_task(&[]).is_none());
    }
}

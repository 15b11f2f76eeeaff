//! Poll-until-predicate waiting over task snapshots.
//!
//! [`wait_until`] fetches immediately, then on a fixed tick, until the
//! predicate holds or the timeout elapses. Only [`VerifyError::NotReady`] is
//! retried; any other fetch error aborts the wait.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::predicates::{
    any_task_in_state, list_state_matches, message_contains, newest_task, state_equals,
};
use crate::core::projector::{ListState, state_human};
use crate::core::types::{ApprovalTask, ManualApprovalGate};
use crate::error::VerifyError;
use crate::io::gate::GateSource;
use crate::io::tasks::TaskSource;

/// Tick and deadline for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub tick: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(tick: Duration, timeout: Duration) -> Self {
        Self { tick, timeout }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<S> {
    Satisfied {
        snapshot: S,
        polls: u32,
        elapsed: Duration,
    },
    TimedOut {
        /// Most recent successfully fetched snapshot, if any fetch succeeded.
        last: Option<S>,
        polls: u32,
        elapsed: Duration,
    },
}

impl<S> WaitOutcome<S> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    /// `(snapshot, ok)`: the matching snapshot, or the last one seen on timeout.
    pub fn into_parts(self) -> (Option<S>, bool) {
        match self {
            Self::Satisfied { snapshot, .. } => (Some(snapshot), true),
            Self::TimedOut { last, .. } => (last, false),
        }
    }

    pub fn polls(&self) -> u32 {
        match self {
            Self::Satisfied { polls, .. } | Self::TimedOut { polls, .. } => *polls,
        }
    }
}

fn is_not_ready(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<VerifyError>(),
        Some(VerifyError::NotReady(_))
    )
}

/// Poll `fetch` until `predicate` holds or `policy.timeout` elapses.
///
/// `what` names the fetched target in errors. A hard fetch error is returned
/// as [`VerifyError::Fetch`] carrying the original error.
pub fn wait_until<S, F, P>(
    what: &str,
    mut fetch: F,
    predicate: P,
    policy: PollPolicy,
) -> Result<WaitOutcome<S>>
where
    F: FnMut() -> Result<S>,
    P: Fn(&S) -> bool,
{
    let started = Instant::now();
    // A timeout too large to represent waits without a deadline.
    let deadline = started.checked_add(policy.timeout);
    let mut last = None;
    let mut polls = 0u32;

    loop {
        polls += 1;
        match fetch() {
            Ok(snapshot) => {
                if predicate(&snapshot) {
                    let elapsed = started.elapsed();
                    debug!(what, polls, elapsed_ms = elapsed.as_millis() as u64, "condition met");
                    return Ok(WaitOutcome::Satisfied {
                        snapshot,
                        polls,
                        elapsed,
                    });
                }
                last = Some(snapshot);
            }
            Err(err) if is_not_ready(&err) => {
                debug!(what, polls, err = %err, "not ready yet");
            }
            Err(source) => {
                return Err(VerifyError::Fetch {
                    target: what.to_string(),
                    source,
                }
                .into());
            }
        }

        let now = Instant::now();
        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(now));
        if remaining.is_some_and(|remaining| remaining.is_zero()) {
            let elapsed = now - started;
            warn!(
                what,
                polls,
                elapsed_ms = elapsed.as_millis() as u64,
                seen = last.is_some(),
                "wait timed out"
            );
            return Ok(WaitOutcome::TimedOut {
                last,
                polls,
                elapsed,
            });
        }
        thread::sleep(remaining.map_or(policy.tick, |remaining| policy.tick.min(remaining)));
    }
}

fn timeout_error(what: String, elapsed: Duration, last_seen: Option<String>) -> anyhow::Error {
    VerifyError::Timeout {
        what,
        elapsed_ms: elapsed.as_millis() as u64,
        last_seen,
    }
    .into()
}

/// Wait until the gate resource `name` exists. A missing gate keeps polling.
#[instrument(skip(source, policy))]
pub fn wait_for_gate(
    source: &dyn GateSource,
    name: &str,
    policy: PollPolicy,
) -> Result<ManualApprovalGate> {
    let what = format!("manualapprovalgate {name}");
    let outcome = wait_until(&what, || source.get_gate(name), |_| true, policy)?;
    match outcome {
        WaitOutcome::Satisfied { snapshot, .. } => Ok(snapshot),
        WaitOutcome::TimedOut { elapsed, .. } => Err(timeout_error(what, elapsed, None)),
    }
}

/// Wait until `namespace` holds at least one task and return them all.
#[instrument(skip(source, policy))]
pub fn list_tasks(
    source: &dyn TaskSource,
    namespace: &str,
    policy: PollPolicy,
) -> Result<Vec<ApprovalTask>> {
    let what = format!("approval task in namespace {namespace}");
    let outcome = wait_until(
        &what,
        || source.list(namespace),
        |tasks: &Vec<ApprovalTask>| !tasks.is_empty(),
        policy,
    )?;
    match outcome {
        WaitOutcome::Satisfied { snapshot, .. } => Ok(snapshot),
        WaitOutcome::TimedOut { last, elapsed, .. } => Err(timeout_error(
            what,
            elapsed,
            last.map(|tasks| format!("{} tasks", tasks.len())),
        )),
    }
}

/// Wait for at least one task in `namespace` and return the newest.
pub fn locate_newest_task(
    source: &dyn TaskSource,
    namespace: &str,
    policy: PollPolicy,
) -> Result<ApprovalTask> {
    let tasks = list_tasks(source, namespace, policy)?;
    let newest = newest_task(&tasks).cloned().ok_or_else(|| {
        VerifyError::NotReady(format!("approval task in namespace {namespace}"))
    })?;
    debug!(task = newest.name(), candidates = tasks.len(), "located task");
    Ok(newest)
}

/// Wait until any task in `namespace` shows the display status `expected`.
///
/// A timeout with tasks in hand is a mismatch listing every task's status.
#[instrument(skip(source, policy))]
pub fn wait_for_any_state(
    source: &dyn TaskSource,
    namespace: &str,
    expected: &str,
    policy: PollPolicy,
) -> Result<ApprovalTask> {
    let expected = expected.trim();
    if expected.is_empty() {
        return Err(VerifyError::config("expected status is empty").into());
    }
    let outcome = wait_until(
        &format!("approval tasks in namespace {namespace}"),
        || source.list(namespace),
        |tasks: &Vec<ApprovalTask>| any_task_in_state(tasks, expected).is_some(),
        policy,
    )?;
    match outcome {
        WaitOutcome::Satisfied { snapshot, .. } => any_task_in_state(&snapshot, expected)
            .cloned()
            .ok_or_else(|| VerifyError::NotReady(format!("task in state {expected}")).into()),
        WaitOutcome::TimedOut {
            last: Some(tasks), ..
        } if !tasks.is_empty() => Err(VerifyError::mismatch(
            format!("approval tasks in {namespace} with status {expected}"),
            expected,
            tasks
                .iter()
                .map(|task| format!("{}={}", task.name(), state_human(task)))
                .collect::<Vec<_>>()
                .join(", "),
        )
        .into()),
        WaitOutcome::TimedOut { last, elapsed, .. } => Err(timeout_error(
            format!("approval task in {namespace} with status {expected}"),
            elapsed,
            last.map(|tasks| format!("{} tasks", tasks.len())),
        )),
    }
}

/// Wait until the raw state equals `expected`, ignoring case.
#[instrument(skip(source, policy))]
pub fn wait_for_state(
    source: &dyn TaskSource,
    namespace: &str,
    task: &str,
    expected: &str,
    policy: PollPolicy,
) -> Result<ApprovalTask> {
    let outcome = wait_until(
        &format!("approvaltask {namespace}/{task}"),
        || source.get(namespace, task),
        |snapshot: &ApprovalTask| state_equals(snapshot, expected),
        policy,
    )?;
    match outcome {
        WaitOutcome::Satisfied { snapshot, .. } => Ok(snapshot),
        WaitOutcome::TimedOut { last, elapsed, .. } => Err(timeout_error(
            format!("approvaltask {task} state={expected}"),
            elapsed,
            last.map(|snapshot| format!("state={:?}", snapshot.raw_state())),
        )),
    }
}

/// Wait until `text` appears in any approver message on the task.
#[instrument(skip(source, policy))]
pub fn wait_for_message(
    source: &dyn TaskSource,
    namespace: &str,
    task: &str,
    text: &str,
    policy: PollPolicy,
) -> Result<ApprovalTask> {
    let text = text.trim();
    if text.is_empty() {
        return Err(VerifyError::config("message text is empty").into());
    }
    let outcome = wait_until(
        &format!("approvaltask {namespace}/{task}"),
        || source.get(namespace, task),
        |snapshot: &ApprovalTask| message_contains(snapshot, text),
        policy,
    )?;
    match outcome {
        WaitOutcome::Satisfied { snapshot, .. } => Ok(snapshot),
        WaitOutcome::TimedOut { last, elapsed, .. } => Err(timeout_error(
            format!("approvaltask {task} to contain message {text:?}"),
            elapsed,
            last.map(|snapshot| format!("status={:?}", snapshot.raw_state())),
        )),
    }
}

/// Wait until the projected list state equals `expected`.
///
/// A timeout with a snapshot in hand is reported as a mismatch between
/// `expected` and the last projection.
#[instrument(skip(source, expected, policy), fields(expected = %expected))]
pub fn wait_for_list_state(
    source: &dyn TaskSource,
    namespace: &str,
    task: &str,
    expected: &ListState,
    policy: PollPolicy,
) -> Result<ApprovalTask> {
    let outcome = wait_until(
        &format!("approvaltask {namespace}/{task}"),
        || source.get(namespace, task),
        |snapshot: &ApprovalTask| list_state_matches(snapshot, expected),
        policy,
    )?;
    match outcome {
        WaitOutcome::Satisfied { snapshot, .. } => Ok(snapshot),
        WaitOutcome::TimedOut {
            last: Some(last), ..
        } => Err(VerifyError::mismatch(
            format!("approvaltask {task} list-state"),
            expected.to_string(),
            ListState::project(&last).to_string(),
        )
        .into()),
        WaitOutcome::TimedOut {
            last: None,
            elapsed,
            ..
        } => Err(timeout_error(
            format!("approvaltask {task} list-state {expected}"),
            elapsed,
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use anyhow::anyhow;

    use super::*;
    use crate::test_support::{ScriptedTaskSource, task_with_state};

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(5), Duration::from_millis(60))
    }

    #[test]
    fn true_predicate_returns_on_first_fetch_without_sleeping() {
        let policy = PollPolicy::new(Duration::from_secs(30), Duration::from_secs(60));
        let started = Instant::now();
        let outcome = wait_until("n", || Ok(7), |v: &i32| *v == 7, policy).expect("wait");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.polls(), 1);
        assert_eq!(outcome.into_parts(), (Some(7), true));
    }

    #[test]
    fn unrepresentable_timeout_waits_without_deadline() {
        let policy = PollPolicy::new(Duration::from_millis(1), Duration::MAX);
        let outcome = wait_until("n", || Ok(7), |v: &i32| *v == 7, policy).expect("wait");
        assert_eq!(outcome.polls(), 1);

        let calls = Cell::new(0);
        let outcome = wait_until(
            "n",
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    return Err(VerifyError::NotReady("not yet".to_string()).into());
                }
                Ok(calls.get())
            },
            |_: &u32| true,
            PollPolicy::new(Duration::from_millis(1), Duration::from_secs(u64::MAX)),
        )
        .expect("wait");
        assert_eq!(outcome.into_parts(), (Some(3), true));
    }

    #[test]
    fn timeout_returns_last_successful_snapshot() {
        let calls = Cell::new(0);
        let outcome = wait_until(
            "n",
            || {
                calls.set(calls.get() + 1);
                if calls.get() % 2 == 0 {
                    Err(VerifyError::NotReady("gone".to_string()).into())
                } else {
                    Ok(calls.get())
                }
            },
            |_: &i32| false,
            fast(),
        )
        .expect("wait");
        let polls = outcome.polls();
        let (last, ok) = outcome.into_parts();
        assert!(!ok);
        assert!(polls >= 2);
        let last = last.expect("some snapshot");
        assert_eq!(last % 2, 1);
    }

    #[test]
    fn timeout_without_any_snapshot_returns_none() {
        let outcome = wait_until(
            "n",
            || -> Result<i32> { Err(VerifyError::NotReady("missing".to_string()).into()) },
            |_| true,
            fast(),
        )
        .expect("wait");
        assert_eq!(outcome.into_parts(), (None, false));
    }

    #[test]
    fn hard_fetch_error_aborts_immediately() {
        let calls = Cell::new(0);
        let err = wait_until(
            "approvaltask ns/x",
            || -> Result<i32> {
                calls.set(calls.get() + 1);
                Err(anyhow!("forbidden"))
            },
            |_| true,
            fast(),
        )
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        match err.downcast_ref::<VerifyError>() {
            Some(VerifyError::Fetch { target, source }) => {
                assert_eq!(target, "approvaltask ns/x");
                assert_eq!(source.to_string(), "forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn state_wait_observes_eventual_transition() {
        let source = ScriptedTaskSource::default();
        source.push_get(Err(VerifyError::NotReady("not created".to_string()).into()));
        source.push_get(Ok(task_with_state("run-wait", "pending")));
        source.set_steady(task_with_state("run-wait", "approved"));

        let task = wait_for_state(&source, "ns1", "run-wait", "APPROVED", fast()).expect("wait");
        assert_eq!(task.raw_state(), "approved");
        assert!(source.get_calls() >= 3);
    }

    #[test]
    fn state_timeout_reports_last_seen_state() {
        let source = ScriptedTaskSource::default();
        source.set_steady(task_with_state("run-wait", "pending"));

        let err = wait_for_state(&source, "ns1", "run-wait", "approved", fast()).unwrap_err();
        match err.downcast_ref::<VerifyError>() {
            Some(VerifyError::Timeout { last_seen, .. }) => {
                assert_eq!(last_seen.as_deref(), Some("state=\"pending\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_message_is_rejected_before_fetching() {
        let source = ScriptedTaskSource::default();
        let err = wait_for_message(&source, "ns1", "run-wait", "  ", fast()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VerifyError>(),
            Some(VerifyError::Config(_))
        ));
        assert_eq!(source.get_calls(), 0);
    }

    #[test]
    fn list_state_timeout_is_a_mismatch_with_both_sides() {
        let source = ScriptedTaskSource::default();
        source.set_steady(task_with_state("run-wait", "pending"));
        let expected = ListState {
            required: 1,
            pending: 0,
            rejected: 0,
            status: "Approved".to_string(),
        };

        let err =
            wait_for_list_state(&source, "ns1", "run-wait", &expected, fast()).unwrap_err();
        match err.downcast_ref::<VerifyError>() {
            Some(VerifyError::Mismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, "num=1 pending=0 rejected=0 status=Approved");
                assert_eq!(actual, "num=1 pending=1 rejected=0 status=Pending");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn locate_picks_newest_task() {
        let source = ScriptedTaskSource::default();
        source.push_list(Ok(Vec::new()));
        let mut older = task_with_state("run-old", "pending");
        older.metadata.creation_timestamp = Some("2026-01-01T00:00:00Z".to_string());
        let mut newer = task_with_state("run-new", "pending");
        newer.metadata.creation_timestamp = Some("2026-01-01T00:05:00Z".to_string());
        source.push_list(Ok(vec![older, newer]));

        let task = locate_newest_task(&source, "ns1", fast()).expect("locate");
        assert_eq!(task.name(), "run-new");
    }

    #[test]
    fn any_state_passes_when_one_task_matches() {
        let source = ScriptedTaskSource::default();
        source.push_list(Ok(vec![task_with_state("a-wait", "pending")]));
        source.push_list(Ok(vec![
            task_with_state("a-wait", "pending"),
            task_with_state("b-wait", "rejected"),
        ]));

        let task = wait_for_any_state(&source, "ns1", "rejected", fast()).expect("wait");
        assert_eq!(task.name(), "b-wait");
        assert_eq!(source.list_calls(), 2);
    }

    #[test]
    fn any_state_timeout_lists_every_status() {
        let source = ScriptedTaskSource::default();
        source.set_steady(task_with_state("a-wait", "pending"));

        let err = wait_for_any_state(&source, "ns1", "Approved", fast()).unwrap_err();
        match err.downcast_ref::<VerifyError>() {
            Some(VerifyError::Mismatch { actual, .. }) => assert_eq!(actual, "a-wait=Pending"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Failure taxonomy for verification steps.
//!
//! Plumbing code returns `anyhow::Result`. Components that need callers to
//! branch on *why* a step failed raise a [`VerifyError`] and callers recover it
//! with `err.downcast_ref::<VerifyError>()`.

use thiserror::Error;

/// Classified verification failure.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Resource not found or condition not yet met. Only the poll loop sees
    /// this; it is retried silently until the timeout.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Any other error from the snapshot-fetch collaborator. Aborts a poll.
    #[error("fetch {target} failed")]
    Fetch {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    /// Observed values differ from expected ones.
    #[error("{what}: expected {expected}; got {actual}")]
    Mismatch {
        what: String,
        expected: String,
        actual: String,
    },

    /// Poll deadline elapsed before the predicate held.
    #[error("timed out after {elapsed_ms}ms waiting for {what}{}", last_seen_suffix(.last_seen))]
    Timeout {
        what: String,
        elapsed_ms: u64,
        /// Key fields of the last observed snapshot, if any fetch succeeded.
        last_seen: Option<String>,
    },

    /// Non-zero exit from an external tool where success was required.
    #[error("`{command}` failed with exit code {exit_code:?}\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// Malformed scenario input, caught before any external call.
    #[error("invalid input: {0}")]
    Config(String),
}

impl VerifyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn mismatch(
        what: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Mismatch {
            what: what.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

fn last_seen_suffix(last_seen: &Option<String>) -> String {
    match last_seen {
        Some(seen) => format!("; last seen {seen}"),
        None => "; no snapshot was ever fetched".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_mentions_missing_snapshot() {
        let err = VerifyError::Timeout {
            what: "task state".to_string(),
            elapsed_ms: 10,
            last_seen: None,
        };
        assert!(err.to_string().contains("no snapshot was ever fetched"));
    }

    #[test]
    fn mismatch_carries_both_sides() {
        let err = VerifyError::mismatch("group g membership", "[alice]", "[alice bob]");
        let msg = err.to_string();
        assert!(msg.contains("expected [alice]"));
        assert!(msg.contains("got [alice bob]"));
    }

    #[test]
    fn downcasts_through_anyhow() {
        let err: anyhow::Error = VerifyError::config("empty group name").into();
        assert!(matches!(
            err.downcast_ref::<VerifyError>(),
            Some(VerifyError::Config(_))
        ));
    }
}

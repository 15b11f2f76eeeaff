//! Verification engine for an external manual approval gate.
//!
//! Drives approval-gated runs through per-identity actions and checks the
//! eventually-consistent task state the external controller writes back.
//!
//! - **[`core`]**: Pure logic (task model, status projection, poll predicates,
//!   action keywords). No I/O.
//! - **[`io`]**: Side-effecting adapters (process execution, config, credential
//!   sessions, groups, task reads, the action tool, run submission), each behind
//!   a trait so tests can substitute fakes.
//!
//! Orchestration modules ([`wait`], [`dispatch`], [`context`], [`scenario`])
//! combine the two to run scenario files.

pub mod context;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod scenario;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod wait;

//! Deterministic, pure logic shared by the verifier.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! task snapshots and return deterministic outputs suitable for tests.

pub mod action;
pub mod names;
pub mod predicates;
pub mod projector;
pub mod types;

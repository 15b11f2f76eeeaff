//! Stable exit codes for gatecheck CLI commands.

/// Every scenario passed, or the command succeeded.
pub const OK: i32 = 0;
/// At least one scenario failed.
pub const FAILED: i32 = 1;
/// Invalid configuration, scenario file, or task snapshot.
pub const INVALID: i32 = 2;

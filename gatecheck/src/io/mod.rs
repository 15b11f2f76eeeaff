//! Side-effecting adapters for the external collaborators.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};

pub mod action_tool;
pub mod config;
pub mod credentials;
pub mod gate;
pub mod groups;
pub mod process;
pub mod submit;
pub mod tasks;

/// Lock `mutex`, reporting poisoning as an error instead of panicking.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow!("{what} lock poisoned by a panicked worker"))
}

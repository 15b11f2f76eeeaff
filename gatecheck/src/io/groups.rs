//! Group membership reconciliation.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::error::VerifyError;
use crate::io::config::GatecheckConfig;
use crate::io::credentials::CredentialCache;
use crate::io::process::{ToolCommand, command_failed};

/// Result of an idempotent group creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another creator won the race; treated as success.
    AlreadyExists,
}

/// Directory holding cluster-scoped groups.
pub trait GroupDirectory: Send + Sync {
    /// Current members, or `None` when the group does not exist.
    fn members(&self, group: &str) -> Result<Option<Vec<String>>>;
    fn create(&self, group: &str) -> Result<CreateOutcome>;
    /// Replace membership with exactly `users` and return the membership read back.
    fn set_members(&self, group: &str, users: &[String]) -> Result<Vec<String>>;
    /// Delete the group; a missing group counts as success.
    fn delete(&self, group: &str) -> Result<()>;
}

/// What [`ensure_members`] observed and changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    /// Membership before the sync, `None` if the group did not exist.
    pub previous: Option<Vec<String>>,
    /// Sorted membership after the sync.
    pub current: Vec<String>,
    /// Users whose sessions were marked stale, sorted and deduplicated.
    pub marked_dirty: Vec<String>,
}

/// Make `group` contain exactly `users`.
///
/// Creates the group if needed, overwrites membership, verifies the result,
/// and marks old and new members dirty whenever membership changed (or the
/// group is new), since group-derived permissions live in their tokens.
#[instrument(skip(directory, credentials))]
pub fn ensure_members(
    directory: &dyn GroupDirectory,
    credentials: &CredentialCache,
    group: &str,
    users: &[String],
) -> Result<MembershipChange> {
    let group = group.trim();
    if group.is_empty() {
        return Err(VerifyError::config("group name is empty").into());
    }

    let previous = directory
        .members(group)
        .with_context(|| format!("read group {group}"))?;

    match directory
        .create(group)
        .with_context(|| format!("create group {group}"))?
    {
        CreateOutcome::Created => debug!(group, "group created"),
        CreateOutcome::AlreadyExists => debug!(group, "group already exists"),
    }

    let mut current = directory
        .set_members(group, users)
        .with_context(|| format!("set members of group {group}"))?;
    current.sort();

    let mut expected = users.to_vec();
    expected.sort();
    if expected != current {
        return Err(VerifyError::mismatch(
            format!("group {group} membership"),
            format!("[{}]", expected.join(" ")),
            format!("[{}]", current.join(" ")),
        )
        .into());
    }

    let changed = match &previous {
        None => true,
        Some(old) => {
            let mut old = old.clone();
            old.sort();
            old != current
        }
    };
    let marked_dirty: Vec<String> = if changed {
        let union: BTreeSet<String> = previous
            .iter()
            .flatten()
            .chain(current.iter())
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .collect();
        credentials.mark_dirty(&union)?;
        union.into_iter().collect()
    } else {
        Vec::new()
    };

    info!(group, members = ?current, dirty = ?marked_dirty, "group membership synced");
    Ok(MembershipChange {
        previous,
        current,
        marked_dirty,
    })
}

/// Groups managed through `oc`.
pub struct OcGroupDirectory {
    oc: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl OcGroupDirectory {
    pub fn from_config(cfg: &GatecheckConfig) -> Self {
        Self {
            oc: cfg.tools.oc.clone(),
            timeout: cfg.cli_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn command<const N: usize>(&self, args: [&str; N]) -> ToolCommand {
        ToolCommand::new(&self.oc, args)
    }
}

const USERS_JSONPATH: &str = "jsonpath={.users[*]}";

fn parse_users(stdout: &str) -> Vec<String> {
    stdout.split_whitespace().map(str::to_string).collect()
}

impl GroupDirectory for OcGroupDirectory {
    fn members(&self, group: &str) -> Result<Option<Vec<String>>> {
        let output = self
            .command(["get", "group", group, "-o", USERS_JSONPATH])
            .run(self.timeout, self.output_limit_bytes)?;
        if !output.success() {
            debug!(group, stderr = %output.stderr_lossy().trim(), "group not readable, treating as absent");
            return Ok(None);
        }
        Ok(Some(parse_users(&output.stdout_lossy())))
    }

    fn create(&self, group: &str) -> Result<CreateOutcome> {
        let cmd = self.command(["adm", "groups", "new", group]);
        let output = cmd.run(self.timeout, self.output_limit_bytes)?;
        if output.success() {
            return Ok(CreateOutcome::Created);
        }
        let stderr = output.stderr_lossy().to_lowercase();
        if stderr.contains("already exists") || stderr.contains("alreadyexists") {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Err(command_failed(&cmd, &output).into())
    }

    fn set_members(&self, group: &str, users: &[String]) -> Result<Vec<String>> {
        let patch = serde_json::json!({ "users": users }).to_string();
        let output = self
            .command([
                "patch",
                "group",
                group,
                "--type=merge",
                "-p",
                patch.as_str(),
                "-o",
                USERS_JSONPATH,
            ])
            .run_checked(self.timeout, self.output_limit_bytes)?;
        Ok(parse_users(&output.stdout_lossy()))
    }

    fn delete(&self, group: &str) -> Result<()> {
        self.command(["delete", "group", group, "--ignore-not-found"])
            .run_checked(self.timeout, self.output_limit_bytes)?;
        Ok(())
    }
}

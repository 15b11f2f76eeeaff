//! Per-identity credential sessions.
//!
//! Each user gets one kubeconfig file for the lifetime of the run. The file is
//! created and logged into on first use, reused afterwards, and re-logged in
//! place when group membership affecting the user changed (the user is
//! "dirty"), because group-derived permissions are baked into the token.
//!
//! Sessions for different users are created in parallel. Concurrent first
//! access for the *same* user is serialized on a per-user slot so only one
//! login happens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};

use crate::error::VerifyError;
use crate::io::config::GatecheckConfig;
use crate::io::lock;
use crate::io::process::ToolCommand;

/// Performs the actual login for one identity into a given config file.
pub trait Authenticator: Send + Sync {
    fn login(&self, user: &str, password: &str, config_path: &Path) -> Result<()>;
}

/// Environment lookup used to resolve password material.
pub type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Password for `user`: `<UPPERCASED_USER>_PASS` if set and non-blank, else the user name.
pub fn resolve_password(user: &str, env: impl Fn(&str) -> Option<String>) -> String {
    let var = format!("{}_PASS", user.to_uppercase());
    env(&var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| user.to_string())
}

struct Session {
    config: TempPath,
}

type Slot = Arc<Mutex<Option<Session>>>;

/// Run-scoped cache of authenticated sessions plus the dirty-flag map.
pub struct CredentialCache {
    authenticator: Box<dyn Authenticator>,
    env: EnvLookup,
    artifact_dir: Option<PathBuf>,
    sessions: Mutex<HashMap<String, Slot>>,
    dirty: Mutex<HashMap<String, bool>>,
}

impl CredentialCache {
    pub fn new(authenticator: impl Authenticator + 'static) -> Self {
        Self {
            authenticator: Box::new(authenticator),
            env: Box::new(|var: &str| std::env::var(var).ok()),
            artifact_dir: None,
            sessions: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashMap::new()),
        }
    }

    /// Create session artifacts under `dir` instead of the system temp dir.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    /// Return a usable config path for `user`, logging in only when needed.
    ///
    /// - no session: create an artifact, log in, cache it;
    /// - dirty session: log in again into the same path;
    /// - clean session: return the cached path without any external call.
    #[instrument(skip(self))]
    pub fn ensure_session(&self, user: &str) -> Result<PathBuf> {
        let user = user.trim();
        if user.is_empty() {
            return Err(VerifyError::config("user name is empty").into());
        }

        let slot = {
            let mut sessions = lock(&self.sessions, "session map")?;
            Arc::clone(sessions.entry(user.to_string()).or_default())
        };
        // Held across the login so concurrent first access for this user waits
        // for the winner instead of logging in a second time.
        let mut session = lock(&*slot, "session slot")?;

        if let Some(existing) = session.as_ref() {
            let path = existing.config.to_path_buf();
            if self.take_dirty(user)? {
                info!(user, "group membership changed, refreshing session");
                self.login_or_restore_dirty(user, &path)?;
            } else {
                debug!(user, "reusing cached session");
            }
            return Ok(path);
        }

        let config = self.new_artifact(user)?;
        let path = config.to_path_buf();
        // Cleared before the login so a mark racing with it survives for the next use.
        self.take_dirty(user)?;
        self.login_or_restore_dirty(user, &path)?;
        info!(user, path = %path.display(), "created session");
        *session = Some(Session { config });
        Ok(path)
    }

    /// Mark sessions stale. Blank names are skipped; repeated marks are harmless.
    pub fn mark_dirty<I, S>(&self, users: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dirty = lock(&self.dirty, "dirty map")?;
        for user in users {
            let user = user.as_ref().trim();
            if user.is_empty() {
                continue;
            }
            dirty.insert(user.to_string(), true);
        }
        Ok(())
    }

    pub fn is_dirty(&self, user: &str) -> Result<bool> {
        let dirty = lock(&self.dirty, "dirty map")?;
        Ok(dirty.get(user.trim()).copied().unwrap_or(false))
    }

    /// Cached config path for `user`, if a session exists.
    pub fn cached_path(&self, user: &str) -> Result<Option<PathBuf>> {
        let slot = {
            let sessions = lock(&self.sessions, "session map")?;
            match sessions.get(user.trim()) {
                Some(slot) => Arc::clone(slot),
                None => return Ok(None),
            }
        };
        let session = lock(&*slot, "session slot")?;
        Ok(session.as_ref().map(|s| s.config.to_path_buf()))
    }

    /// Delete every session artifact and forget all dirty flags.
    ///
    /// Removal is best-effort; failures are logged. Returns the number of
    /// sessions dropped.
    pub fn teardown(&self) -> Result<usize> {
        let slots: Vec<(String, Slot)> = lock(&self.sessions, "session map")?.drain().collect();
        let mut removed = 0;
        for (user, slot) in slots {
            let Some(session) = lock(&*slot, "session slot")?.take() else {
                continue;
            };
            let path = session.config.to_path_buf();
            if let Err(err) = session.config.close() {
                warn!(user, path = %path.display(), err = %err, "failed to remove session artifact");
            }
            removed += 1;
        }
        lock(&self.dirty, "dirty map")?.clear();
        debug!(removed, "credential sessions torn down");
        Ok(removed)
    }

    fn take_dirty(&self, user: &str) -> Result<bool> {
        let mut dirty = lock(&self.dirty, "dirty map")?;
        Ok(dirty.insert(user.to_string(), false).unwrap_or(false))
    }

    fn login_or_restore_dirty(&self, user: &str, path: &Path) -> Result<()> {
        let password = resolve_password(user, &self.env);
        if let Err(err) = self.authenticator.login(user, &password, path) {
            self.mark_dirty([user])?;
            return Err(err).with_context(|| format!("log in as {user}"));
        }
        Ok(())
    }

    fn new_artifact(&self, user: &str) -> Result<TempPath> {
        let prefix = format!("mag-kubeconfig-{user}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let file = match &self.artifact_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .with_context(|| format!("create temp kubeconfig for {user}"))?;
        Ok(file.into_temp_path())
    }
}

/// Logs in with `oc login` against the API server of the admin context.
pub struct OcAuthenticator {
    oc: String,
    timeout: Duration,
    output_limit_bytes: usize,
    insecure_skip_tls_verify: bool,
    api_server: OnceLock<String>,
}

impl OcAuthenticator {
    pub fn from_config(cfg: &GatecheckConfig) -> Self {
        Self {
            oc: cfg.tools.oc.clone(),
            timeout: cfg.cli_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
            insecure_skip_tls_verify: cfg.insecure_skip_tls_verify,
            api_server: OnceLock::new(),
        }
    }

    /// API server of the current (admin) context, discovered once per process.
    fn api_server(&self) -> Result<&str> {
        if let Some(server) = self.api_server.get() {
            return Ok(server);
        }
        let output = ToolCommand::new(&self.oc, ["whoami", "--show-server"])
            .run_checked(self.timeout, self.output_limit_bytes)?;
        let server = output.stdout_lossy().trim().to_string();
        if server.is_empty() {
            return Err(anyhow!(
                "failed to detect cluster API server via `{} whoami --show-server`",
                self.oc
            ));
        }
        debug!(server = %server, "discovered API server");
        Ok(self.api_server.get_or_init(|| server))
    }
}

impl Authenticator for OcAuthenticator {
    #[instrument(skip(self, password))]
    fn login(&self, user: &str, password: &str, config_path: &Path) -> Result<()> {
        let server = self.api_server()?;
        let kubeconfig = config_path.to_string_lossy().into_owned();
        let mut args = vec![
            "login",
            server,
            "-u",
            user,
            "-p",
            password,
            "--kubeconfig",
            kubeconfig.as_str(),
        ];
        if self.insecure_skip_tls_verify {
            args.push("--insecure-skip-tls-verify=true");
        }
        ToolCommand::new(&self.oc, args).run_checked(self.timeout, self.output_limit_bytes)?;
        Ok(())
    }
}

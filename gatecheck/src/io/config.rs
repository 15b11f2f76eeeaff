//! Verifier configuration (`.gatecheck.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = ".gatecheck.toml";

/// Upper bound for every `*_secs` field (one day).
const MAX_TIMEOUT_SECS: u64 = 86_400;
/// Upper bound for `poll_tick_ms` (one hour).
const MAX_POLL_TICK_MS: u64 = 3_600_000;

/// Verifier configuration (TOML).
///
/// Missing fields default to values that suit a typical shared test cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatecheckConfig {
    /// Upper bound for every external tool invocation.
    pub cli_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Fixed interval between snapshot fetches while waiting.
    pub poll_tick_ms: u64,

    /// How long to wait for the task created by a run submission.
    pub locate_timeout_secs: u64,

    pub state_timeout_secs: u64,
    pub list_state_timeout_secs: u64,
    pub message_timeout_secs: u64,

    /// Cluster-scoped `ManualApprovalGate` resource checked by `gate-ready`.
    pub gate_name: String,
    pub gate_timeout_secs: u64,

    /// Passed through to `oc login`.
    pub insecure_skip_tls_verify: bool,

    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Cluster CLI used for login, groups, task reads and run submission.
    pub oc: String,
    /// Pipelines CLI providing `approvaltask approve|reject`.
    pub opc: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            oc: "oc".to_string(),
            opc: "opc".to_string(),
        }
    }
}

impl Default for GatecheckConfig {
    fn default() -> Self {
        Self {
            cli_timeout_secs: 120,
            output_limit_bytes: 1_000_000,
            poll_tick_ms: 1000,
            locate_timeout_secs: 120,
            state_timeout_secs: 120,
            list_state_timeout_secs: 120,
            message_timeout_secs: 60,
            gate_name: "manual-approval-gate".to_string(),
            gate_timeout_secs: 120,
            insecure_skip_tls_verify: true,
            tools: ToolsConfig::default(),
        }
    }
}

impl GatecheckConfig {
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("cli_timeout_secs", self.cli_timeout_secs),
            ("locate_timeout_secs", self.locate_timeout_secs),
            ("state_timeout_secs", self.state_timeout_secs),
            ("list_state_timeout_secs", self.list_state_timeout_secs),
            ("message_timeout_secs", self.message_timeout_secs),
            ("gate_timeout_secs", self.gate_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 || value > MAX_TIMEOUT_SECS {
                return Err(anyhow!("{name} must be in 1..={MAX_TIMEOUT_SECS}; got {value}"));
            }
        }
        if self.poll_tick_ms == 0 || self.poll_tick_ms > MAX_POLL_TICK_MS {
            return Err(anyhow!(
                "poll_tick_ms must be in 1..={MAX_POLL_TICK_MS}; got {}",
                self.poll_tick_ms
            ));
        }
        if self.gate_name.trim().is_empty() {
            return Err(anyhow!("gate_name must be non-empty"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.tools.oc.trim().is_empty() || self.tools.opc.trim().is_empty() {
            return Err(anyhow!("tools.oc and tools.opc must be non-empty"));
        }
        Ok(())
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    pub fn poll_tick(&self) -> Duration {
        Duration::from_millis(self.poll_tick_ms)
    }

    pub fn locate_timeout(&self) -> Duration {
        Duration::from_secs(self.locate_timeout_secs)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_secs(self.state_timeout_secs)
    }

    pub fn list_state_timeout(&self) -> Duration {
        Duration::from_secs(self.list_state_timeout_secs)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GatecheckConfig::default()`.
pub fn load_config(path: &Path) -> Result<GatecheckConfig> {
    if !path.exists() {
        let cfg = GatecheckConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GatecheckConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Timeout classes a scenario may name instead of a literal duration.
const TIMEOUT_CLASSES: [(&str, &str, &str); 3] = [
    ("success", "APPROVAL_TIMEOUT_SUCCESS", "5m"),
    ("fail-fast", "APPROVAL_TIMEOUT_FAIL_FAST", "2m"),
    ("timeout", "APPROVAL_TIMEOUT_TIMEOUT", "30s"),
];

const FALLBACK_APPROVAL_TIMEOUT: &str = "5m";

/// Resolve the `timeout` handed to the approval task.
///
/// A class name (`success`, `fail-fast`, `timeout`) resolves to its
/// environment override or literal default; any other string is passed
/// through trimmed. An empty result falls back to `5m`.
pub fn resolve_approval_timeout(raw: &str, env: impl Fn(&str) -> Option<String>) -> String {
    let class = raw.trim().to_lowercase();
    let resolved = TIMEOUT_CLASSES
        .iter()
        .find(|(name, _, _)| *name == class)
        .map(|(_, var, default)| {
            env(var)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        })
        .unwrap_or_else(|| raw.trim().to_string());
    if resolved.is_empty() {
        FALLBACK_APPROVAL_TIMEOUT.to_string()
    } else {
        resolved
    }
}

/// Process-environment lookup for [`resolve_approval_timeout`].
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GatecheckConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gatecheck.toml");
        fs::write(&path, "poll_tick_ms = 250\n[tools]\nopc = \"tkn\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.poll_tick(), Duration::from_millis(250));
        assert_eq!(cfg.tools.opc, "tkn");
        assert_eq!(cfg.tools.oc, "oc");
        assert_eq!(cfg.message_timeout_secs, 60);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gatecheck.toml");
        fs::write(&path, "state_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("state_timeout_secs"));
    }

    #[test]
    fn oversized_timeouts_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gatecheck.toml");
        fs::write(&path, "state_timeout_secs = 18446744073709551615\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("state_timeout_secs"), "{err:#}");

        fs::write(&path, "state_timeout_secs = 9999999999\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("state_timeout_secs"), "{err:#}");

        let cfg = GatecheckConfig {
            poll_tick_ms: u64::MAX,
            ..GatecheckConfig::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("poll_tick_ms"));

        let cfg = GatecheckConfig {
            gate_timeout_secs: MAX_TIMEOUT_SECS,
            ..GatecheckConfig::default()
        };
        cfg.validate().expect("upper bound is inclusive");
    }

    #[test]
    fn timeout_classes_use_defaults_when_unset() {
        let none = |_: &str| None;
        assert_eq!(resolve_approval_timeout("success", none), "5m");
        assert_eq!(resolve_approval_timeout("Fail-Fast", none), "2m");
        assert_eq!(resolve_approval_timeout(" timeout ", none), "30s");
    }

    #[test]
    fn timeout_classes_honor_env_overrides() {
        let env = |var: &str| (var == "APPROVAL_TIMEOUT_FAIL_FAST").then(|| " 90s ".to_string());
        assert_eq!(resolve_approval_timeout("fail-fast", env), "90s");
        assert_eq!(resolve_approval_timeout("success", env), "5m");
    }

    #[test]
    fn literal_durations_pass_through() {
        let none = |_: &str| None;
        assert_eq!(resolve_approval_timeout(" 45s ", none), "45s");
        assert_eq!(resolve_approval_timeout("", none), "5m");
    }
}

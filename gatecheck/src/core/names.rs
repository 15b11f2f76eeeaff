//! Name and list helpers for scenario input.

use crate::error::VerifyError;

/// Split a step parameter on commas and whitespace.
///
/// Empty input and the placeholder `-` yield an empty list.
pub fn split_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" {
        return Vec::new();
    }
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Cluster-unique group name for `alias` inside a scenario namespace.
///
/// Groups are cluster-scoped, so aliases are namespaced to avoid collisions
/// between concurrently running scenarios. Literal names containing `:`
/// (e.g. `system:authenticated`) are returned unchanged.
pub fn group_name(namespace: &str, alias: &str) -> String {
    let alias = alias.trim();
    if alias.is_empty() {
        return String::new();
    }
    if alias.contains(':') {
        return alias.to_string();
    }

    let mut safe = String::with_capacity(alias.len());
    let mut last_dash = false;
    for c in alias.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            safe.push(c);
            last_dash = false;
        } else if !last_dash {
            safe.push('-');
            last_dash = true;
        }
    }
    let safe = safe.trim_matches('-');
    let safe = if safe.is_empty() { "group" } else { safe };
    format!("mag-{namespace}-{safe}")
}

/// Resolve a scenario group alias, keeping already-resolved names as-is.
pub fn resolve_group_alias(namespace: &str, alias: &str) -> String {
    let alias = alias.trim();
    if alias.contains(':') || alias.starts_with("mag-") {
        return alias.to_string();
    }
    group_name(namespace, alias)
}

/// Two-digit testcase id derived from a scenario name such as `PIPELINES-28-TC01`.
pub fn case_id(scenario_name: &str) -> Result<String, VerifyError> {
    use std::sync::LazyLock;
    static CASE_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"(?i)\bTC-?(\d{1,3})\b").unwrap());

    let name = scenario_name.trim();
    if name.is_empty() {
        return Err(VerifyError::config("scenario name is empty"));
    }
    let id = CASE_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            VerifyError::config(format!("could not derive testcase id from scenario name: {name}"))
        })?;
    Ok(format!("{id:0>2}"))
}

/// Lower-case, dash-separated id fragment usable in a `generateName`.
pub fn slug_id(id: &str) -> String {
    id.trim().replace([' ', '_'], "-").to_lowercase()
}

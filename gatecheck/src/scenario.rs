//! Scenario files and their lifecycle.
//!
//! A scenario is a TOML file naming a namespace and an ordered list of steps.
//! Steps run in order and stop at the first failure. Scenarios tagged
//! [`CLEANUP_TAG`] delete the groups they touched once they finish, pass or
//! fail. Many scenarios may run concurrently against one [`RunContext`].

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{error, info, info_span, warn};

use crate::context::RunContext;
use crate::core::action::{Action, Verb};
use crate::core::names::{case_id, resolve_group_alias, split_list};
use crate::core::projector::ListState;
use crate::dispatch::ActionTarget;
use crate::error::VerifyError;
use crate::io::config::resolve_approval_timeout;
use crate::io::groups::ensure_members;
use crate::io::submit::RunRequest;
use crate::wait::{
    list_tasks, locate_newest_task, wait_for_any_state, wait_for_gate, wait_for_list_state,
    wait_for_message, wait_for_state,
};

/// Scenarios carrying this tag delete their recorded groups afterwards.
pub const CLEANUP_TAG: &str = "approvalgate-users";

const DEFAULT_DESCRIPTION: &str = "manual approval gate users";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    /// Must carry a testcase id such as `TC01` when the scenario submits a run.
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Run description; defaults to the scenario name.
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

impl ScenarioFile {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(tag))
    }

    fn run_description(&self) -> String {
        [self.description.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|text| !text.is_empty())
            .unwrap_or(DEFAULT_DESCRIPTION)
            .to_string()
    }
}

/// A list given either as a TOML array or as one comma/space separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListInput {
    Many(Vec<String>),
    One(String),
}

impl ListInput {
    pub fn to_list(&self) -> Vec<String> {
        match self {
            Self::Many(items) => items.iter().flat_map(|item| split_list(item)).collect(),
            Self::One(raw) => split_list(raw),
        }
    }
}

/// An integer given either natively or as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CountInput {
    Int(i64),
    Text(String),
}

impl CountInput {
    pub fn resolve(&self, field: &str) -> Result<i64, VerifyError> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Text(raw) => raw.trim().parse().map_err(|_| {
                VerifyError::config(format!("{field} must be an integer; got {raw:?}"))
            }),
        }
    }
}

fn default_timeout_class() -> String {
    "success".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Step {
    /// Wait until the gate resource exists; `name` defaults to the configured gate.
    GateReady {
        #[serde(default)]
        name: Option<String>,
    },
    /// Make a (namespaced) group contain exactly `users`.
    EnsureGroup { group: String, users: ListInput },
    /// Submit an approval-gated run and locate its task.
    CreateRun {
        approvers: ListInput,
        required: CountInput,
        /// Timeout class (`success`, `fail-fast`, `timeout`) or a literal duration.
        #[serde(default = "default_timeout_class")]
        timeout: String,
    },
    /// Perform an action keyword on the current task as `user`.
    Act {
        user: String,
        action: String,
        #[serde(default)]
        message: String,
    },
    WaitState { state: String },
    AssertListState {
        required: CountInput,
        pending: CountInput,
        rejected: CountInput,
        status: String,
    },
    MessageContains { text: String },
    /// Approve or reject every task in the namespace under the admin context.
    ActAll {
        action: String,
        #[serde(default)]
        message: String,
    },
    /// Pass once any task in the namespace shows the display status `state`.
    ValidateAnyState { state: String },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GateReady { .. } => "gate-ready",
            Self::EnsureGroup { .. } => "ensure-group",
            Self::CreateRun { .. } => "create-run",
            Self::Act { .. } => "act",
            Self::WaitState { .. } => "wait-state",
            Self::AssertListState { .. } => "assert-list-state",
            Self::MessageContains { .. } => "message-contains",
            Self::ActAll { .. } => "act-all",
            Self::ValidateAnyState { .. } => "validate-any-state",
        }
    }
}

/// Per-scenario store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioState {
    pub pipeline_run: Option<String>,
    pub approval_task: Option<String>,
    /// Groups to delete after a tagged scenario, in first-use order.
    pub groups: Vec<String>,
}

impl ScenarioState {
    pub fn record_group(&mut self, group: &str) {
        let group = group.trim();
        if group.is_empty() || self.groups.iter().any(|g| g == group) {
            return;
        }
        self.groups.push(group.to_string());
    }

    pub fn current_task(&self) -> Result<&str, VerifyError> {
        self.approval_task
            .as_deref()
            .map(str::trim)
            .filter(|task| !task.is_empty())
            .ok_or_else(|| {
                VerifyError::config("no current approval task; add a create-run step first")
            })
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    /// Full error chain of the failing step.
    pub failure: Option<String>,
    pub state: ScenarioState,
    pub cleaned_groups: usize,
    pub elapsed: Duration,
}

/// Read and parse a scenario file.
pub fn load_scenario(path: &Path) -> Result<ScenarioFile> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let scenario: ScenarioFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if scenario.name.trim().is_empty() {
        return Err(anyhow!("{}: scenario name is empty", path.display()));
    }
    if scenario.namespace.trim().is_empty() {
        return Err(anyhow!("{}: namespace is empty", path.display()));
    }
    if scenario.steps.is_empty() {
        return Err(anyhow!("{}: scenario has no steps", path.display()));
    }
    Ok(scenario)
}

/// Run every step of `scenario`, then the tag-scoped cleanup.
pub fn run_scenario(ctx: &RunContext, scenario: &ScenarioFile) -> ScenarioReport {
    let span = info_span!("scenario", scenario = %scenario.name, namespace = %scenario.namespace);
    let _guard = span.enter();
    let started = Instant::now();

    let mut state = ScenarioState::default();
    let mut steps_run = 0;
    let mut failure = None;
    for (index, step) in scenario.steps.iter().enumerate() {
        steps_run += 1;
        if let Err(err) = run_step(ctx, scenario, &mut state, step)
            .with_context(|| format!("step {} ({})", index + 1, step.kind()))
        {
            error!(err = %format!("{err:#}"), "scenario failed");
            failure = Some(format!("{err:#}"));
            break;
        }
    }

    let cleaned_groups = if scenario.has_tag(CLEANUP_TAG) {
        cleanup_groups(ctx, &state.groups)
    } else {
        0
    };

    let passed = failure.is_none();
    info!(passed, steps_run, cleaned_groups, "scenario finished");
    ScenarioReport {
        name: scenario.name.clone(),
        passed,
        steps_run,
        failure,
        state,
        cleaned_groups,
        elapsed: started.elapsed(),
    }
}

fn run_step(
    ctx: &RunContext,
    scenario: &ScenarioFile,
    state: &mut ScenarioState,
    step: &Step,
) -> Result<()> {
    let namespace = scenario.namespace.trim();
    match step {
        Step::GateReady { name } => {
            let name = name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(ctx.config.gate_name.as_str());
            let gate = wait_for_gate(ctx.gates.as_ref(), name, ctx.gate_policy())?;
            info!(gate = %gate.metadata.name, "approval gate ready");
        }
        Step::EnsureGroup { group, users } => {
            let name = resolve_group(namespace, group)?;
            // Recorded before syncing so a half-created group is still cleaned up.
            state.record_group(&name);
            ensure_members(
                ctx.groups.as_ref(),
                &ctx.credentials,
                &name,
                &users.to_list(),
            )?;
        }
        Step::CreateRun {
            approvers,
            required,
            timeout,
        } => {
            let approvers = approvers
                .to_list()
                .into_iter()
                .map(|approver| match approver.strip_prefix("group:") {
                    Some(alias) => Ok(format!("group:{}", resolve_group(namespace, alias)?)),
                    None => Ok(approver),
                })
                .collect::<Result<Vec<_>, VerifyError>>()?;
            let request = RunRequest {
                case_id: case_id(&scenario.name)?,
                namespace: namespace.to_string(),
                description: scenario.run_description(),
                approvers,
                required: required.resolve("required")?,
                timeout: resolve_approval_timeout(timeout, |var| ctx.env(var)),
            };
            request.validated_approvers()?;
            let run = ctx.submitter.submit(&request)?;
            let task = locate_newest_task(ctx.tasks.as_ref(), namespace, ctx.locate_policy())
                .with_context(|| format!("locate approval task for run {run}"))?;
            info!(run = %run, task = task.name(), "approval run submitted");
            state.pipeline_run = Some(run);
            state.approval_task = Some(task.name().to_string());
        }
        Step::Act {
            user,
            action,
            message,
        } => {
            let task = state.current_task()?;
            ctx.dispatcher().dispatch_keyword(
                action,
                &ActionTarget {
                    user,
                    task,
                    namespace,
                    message,
                },
            )?;
        }
        Step::WaitState { state: expected } => {
            let task = state.current_task()?;
            wait_for_state(
                ctx.tasks.as_ref(),
                namespace,
                task,
                expected,
                ctx.state_policy(),
            )?;
        }
        Step::AssertListState {
            required,
            pending,
            rejected,
            status,
        } => {
            let expected = ListState {
                required: required.resolve("required")?,
                pending: pending.resolve("pending")?,
                rejected: rejected.resolve("rejected")?,
                status: status.trim().to_string(),
            };
            let task = state.current_task()?;
            wait_for_list_state(
                ctx.tasks.as_ref(),
                namespace,
                task,
                &expected,
                ctx.list_state_policy(),
            )?;
        }
        Step::MessageContains { text } => {
            let task = state.current_task()?;
            wait_for_message(
                ctx.tasks.as_ref(),
                namespace,
                task,
                text,
                ctx.message_policy(),
            )?;
        }
        Step::ActAll { action, message } => {
            let verb = match action.parse::<Action>()? {
                Action::Approve => Verb::Approve,
                Action::Reject => Verb::Reject,
                other => {
                    return Err(VerifyError::config(format!(
                        "act-all supports only approve or reject; got {other}"
                    ))
                    .into());
                }
            };
            let tasks = list_tasks(ctx.tasks.as_ref(), namespace, ctx.locate_policy())?;
            let dispatcher = ctx.dispatcher();
            for task in &tasks {
                dispatcher
                    .dispatch_admin(verb, task.name(), namespace, message)
                    .with_context(|| format!("{} {}", verb.as_str(), task.name()))?;
            }
            info!(verb = verb.as_str(), tasks = tasks.len(), "acted on every approval task");
        }
        Step::ValidateAnyState { state: expected } => {
            let task =
                wait_for_any_state(ctx.tasks.as_ref(), namespace, expected, ctx.state_policy())?;
            info!(task = task.name(), status = %expected, "approval task in expected state");
        }
    }
    Ok(())
}

fn resolve_group(namespace: &str, alias: &str) -> Result<String, VerifyError> {
    let name = resolve_group_alias(namespace, alias);
    if name.is_empty() {
        return Err(VerifyError::config("group name is empty"));
    }
    Ok(name)
}

/// Best-effort deletion of recorded groups. Returns how many were deleted.
fn cleanup_groups(ctx: &RunContext, groups: &[String]) -> usize {
    let mut deleted = 0;
    for group in groups {
        match ctx.groups.delete(group) {
            Ok(()) => deleted += 1,
            Err(err) => warn!(group = %group, err = %format!("{err:#}"), "group cleanup failed"),
        }
    }
    deleted
}

/// Run `scenarios` on up to `jobs` worker threads. Reports keep input order.
pub fn run_all(
    ctx: &RunContext,
    scenarios: &[ScenarioFile],
    jobs: usize,
) -> Result<Vec<ScenarioReport>> {
    let workers = jobs.clamp(1, scenarios.len().max(1));
    let counter = AtomicUsize::new(0);
    let next = &counter;

    let mut indexed: Vec<(usize, ScenarioReport)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(scenario) = scenarios.get(index) else {
                            break;
                        };
                        done.push((index, run_scenario(ctx, scenario)));
                    }
                    done
                })
            })
            .collect();

        let mut all = Vec::with_capacity(scenarios.len());
        for handle in handles {
            match handle.join() {
                Ok(done) => all.extend(done),
                Err(_) => return Err(anyhow!("scenario worker panicked")),
            }
        }
        Ok(all)
    })?;

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, report)| report).collect())
}

//! Scripted fakes for the external collaborators.
//!
//! Every fake is a cheap clone over shared state, so a test can hand one copy
//! to a [`RunContext`] and keep another to inspect what happened.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::context::RunContext;
use crate::core::action::Verb;
use crate::core::types::{
    ApprovalTask, ApproverResponse, GroupMember, ManualApprovalGate, Response, STATE_APPROVED,
    STATE_PENDING, STATE_REJECTED, SpecApprover,
};
use crate::error::VerifyError;
use crate::io::action_tool::{ActionRequest, ActionTool, ToolResult};
use crate::io::config::GatecheckConfig;
use crate::io::credentials::{Authenticator, CredentialCache};
use crate::io::gate::GateSource;
use crate::io::groups::{CreateOutcome, GroupDirectory};
use crate::io::submit::{RunRequest, RunSubmitter, render_manifest};
use crate::io::tasks::TaskSource;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn users(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Config with a short poll tick and one-second waits.
pub fn fast_config() -> GatecheckConfig {
    GatecheckConfig {
        poll_tick_ms: 5,
        locate_timeout_secs: 1,
        state_timeout_secs: 1,
        list_state_timeout_secs: 1,
        message_timeout_secs: 1,
        gate_timeout_secs: 1,
        ..GatecheckConfig::default()
    }
}

/// Task with one required approval, no responses and the given raw state.
pub fn task_with_state(name: &str, state: &str) -> ApprovalTask {
    let mut task = ApprovalTask::default();
    task.metadata.name = name.to_string();
    task.spec.number_of_approvals_required = 1;
    task.status.state = state.to_string();
    task
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub user: String,
    pub password: String,
    pub config_path: PathBuf,
}

#[derive(Default)]
struct AuthState {
    logins: Vec<LoginRecord>,
    failing: HashSet<String>,
    delay: Duration,
}

/// Records logins and writes the user name into the config file, the way a
/// real login leaves an identity behind.
#[derive(Clone, Default)]
pub struct RecordingAuthenticator {
    state: Arc<Mutex<AuthState>>,
}

impl RecordingAuthenticator {
    pub fn failing_for<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let auth = Self::default();
        guard(&auth.state).failing = users.into_iter().map(Into::into).collect();
        auth
    }

    /// Sleep inside every login, widening race windows.
    pub fn with_delay(self, delay: Duration) -> Self {
        guard(&self.state).delay = delay;
        self
    }

    pub fn logins(&self) -> Vec<LoginRecord> {
        guard(&self.state).logins.clone()
    }

    pub fn login_count(&self, user: &str) -> usize {
        guard(&self.state)
            .logins
            .iter()
            .filter(|login| login.user == user)
            .count()
    }
}

impl Authenticator for RecordingAuthenticator {
    fn login(&self, user: &str, password: &str, config_path: &Path) -> Result<()> {
        let (delay, failing) = {
            let state = guard(&self.state);
            (state.delay, state.failing.contains(user))
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        guard(&self.state).logins.push(LoginRecord {
            user: user.to_string(),
            password: password.to_string(),
            config_path: config_path.to_path_buf(),
        });
        if failing {
            return Err(VerifyError::CommandFailed {
                command: format!("oc login -u {user} -p ***"),
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "Login failed (401 Unauthorized)".to_string(),
            }
            .into());
        }
        fs::write(config_path, format!("{user}\n"))
            .with_context(|| format!("write {}", config_path.display()))?;
        Ok(())
    }
}

#[derive(Default)]
struct DirectoryState {
    groups: BTreeMap<String, Vec<String>>,
    racing_creator: bool,
    dropped_on_write: Option<String>,
    failing_delete: HashSet<String>,
    deleted: Vec<String>,
    calls: usize,
}

/// In-memory group directory.
#[derive(Clone, Default)]
pub struct MemoryGroupDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MemoryGroupDirectory {
    /// `create` reports "already exists" as if another worker created the group first.
    pub fn racing_creator(self) -> Self {
        guard(&self.state).racing_creator = true;
        self
    }

    /// Writes silently drop `user`, so the read-back differs from the request.
    pub fn drop_member_on_write(self, user: &str) -> Self {
        guard(&self.state).dropped_on_write = Some(user.to_string());
        self
    }

    pub fn failing_delete(self, group: &str) -> Self {
        guard(&self.state).failing_delete.insert(group.to_string());
        self
    }

    pub fn members_of(&self, group: &str) -> Option<Vec<String>> {
        guard(&self.state).groups.get(group).cloned()
    }

    pub fn deleted(&self) -> Vec<String> {
        guard(&self.state).deleted.clone()
    }

    pub fn calls(&self) -> usize {
        guard(&self.state).calls
    }
}

impl GroupDirectory for MemoryGroupDirectory {
    fn members(&self, group: &str) -> Result<Option<Vec<String>>> {
        let mut state = guard(&self.state);
        state.calls += 1;
        Ok(state.groups.get(group).cloned())
    }

    fn create(&self, group: &str) -> Result<CreateOutcome> {
        let mut state = guard(&self.state);
        state.calls += 1;
        if state.groups.contains_key(group) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.groups.insert(group.to_string(), Vec::new());
        if state.racing_creator {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Ok(CreateOutcome::Created)
    }

    fn set_members(&self, group: &str, users: &[String]) -> Result<Vec<String>> {
        let mut state = guard(&self.state);
        state.calls += 1;
        let dropped = state.dropped_on_write.clone();
        let stored: Vec<String> = users
            .iter()
            .filter(|user| dropped.as_deref() != Some(user.as_str()))
            .cloned()
            .collect();
        let slot = state
            .groups
            .get_mut(group)
            .ok_or_else(|| anyhow!("group {group} not found"))?;
        *slot = stored.clone();
        Ok(stored)
    }

    fn delete(&self, group: &str) -> Result<()> {
        let mut state = guard(&self.state);
        state.calls += 1;
        if state.failing_delete.contains(group) {
            return Err(anyhow!("delete group {group}: forbidden"));
        }
        state.groups.remove(group);
        state.deleted.push(group.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct ScriptState {
    gets: VecDeque<Result<ApprovalTask>>,
    lists: VecDeque<Result<Vec<ApprovalTask>>>,
    steady: Option<ApprovalTask>,
    get_calls: usize,
    list_calls: usize,
}

/// Task source replaying queued results, then a steady snapshot.
///
/// With nothing queued and no steady snapshot, `get` reports not-ready and
/// `list` returns an empty list.
#[derive(Clone, Default)]
pub struct ScriptedTaskSource {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTaskSource {
    pub fn push_get(&self, result: Result<ApprovalTask>) {
        guard(&self.state).gets.push_back(result);
    }

    pub fn push_list(&self, result: Result<Vec<ApprovalTask>>) {
        guard(&self.state).lists.push_back(result);
    }

    pub fn set_steady(&self, task: ApprovalTask) {
        guard(&self.state).steady = Some(task);
    }

    pub fn get_calls(&self) -> usize {
        guard(&self.state).get_calls
    }

    pub fn list_calls(&self) -> usize {
        guard(&self.state).list_calls
    }
}

impl TaskSource for ScriptedTaskSource {
    fn get(&self, namespace: &str, name: &str) -> Result<ApprovalTask> {
        let mut state = guard(&self.state);
        state.get_calls += 1;
        if let Some(next) = state.gets.pop_front() {
            return next;
        }
        state
            .steady
            .clone()
            .ok_or_else(|| VerifyError::NotReady(format!("approvaltask {namespace}/{name}")).into())
    }

    fn list(&self, _namespace: &str) -> Result<Vec<ApprovalTask>> {
        let mut state = guard(&self.state);
        state.list_calls += 1;
        if let Some(next) = state.lists.pop_front() {
            return next;
        }
        Ok(state.steady.clone().into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAction {
    pub verb: Verb,
    pub task: String,
    pub namespace: String,
    pub message: String,
    pub kubeconfig: Option<PathBuf>,
}

impl RecordedAction {
    fn from_request(request: &ActionRequest<'_>) -> Self {
        Self {
            verb: request.verb,
            task: request.task.to_string(),
            namespace: request.namespace.to_string(),
            message: request.message.to_string(),
            kubeconfig: request.kubeconfig.map(Path::to_path_buf),
        }
    }
}

/// Action tool returning a fixed exit code and output.
#[derive(Clone)]
pub struct ScriptedActionTool {
    exit_code: i32,
    stdout: String,
    stderr: String,
    calls: Arc<Mutex<Vec<RecordedAction>>>,
}

impl ScriptedActionTool {
    pub fn succeeding() -> Self {
        Self::failing(0, "", "")
    }

    pub fn failing(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<RecordedAction> {
        guard(&self.calls).clone()
    }
}

impl ActionTool for ScriptedActionTool {
    fn invoke(&self, request: &ActionRequest<'_>) -> Result<ToolResult> {
        guard(&self.calls).push(RecordedAction::from_request(request));
        Ok(ToolResult {
            command: format!("opc approvaltask {} {}", request.verb.as_str(), request.task),
            exit_code: Some(self.exit_code),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

/// Run submitter that records requests and never creates anything.
#[derive(Clone, Default)]
pub struct RecordingSubmitter {
    requests: Arc<Mutex<Vec<RunRequest>>>,
}

impl RecordingSubmitter {
    pub fn requests(&self) -> Vec<RunRequest> {
        guard(&self.requests).clone()
    }
}

impl RunSubmitter for RecordingSubmitter {
    fn submit(&self, request: &RunRequest) -> Result<String> {
        render_manifest(request)?;
        guard(&self.requests).push(request.clone());
        Ok(format!("{}recorded", request.generate_name()))
    }
}

struct StagedStatus {
    task: String,
    state: String,
    responses: Vec<ApproverResponse>,
    remaining_reads: u32,
}

/// Identity [`FakeCluster`] assigns to actions run without a session.
pub const ADMIN_USER: &str = "kube:admin";

struct PlannedGate {
    name: String,
    remaining_reads: u32,
}

#[derive(Default)]
struct ClusterState {
    tasks: Vec<ApprovalTask>,
    gates: Vec<PlannedGate>,
    staged: Vec<StagedStatus>,
    lag_reads: u32,
    runs: u32,
    actions: Vec<(String, RecordedAction)>,
}

/// In-memory approval controller.
///
/// Submitting a run creates a task; the action tool applies approve/reject
/// from the identity stored in the caller's config file. Spec-level messages
/// change immediately, while status changes become visible only after
/// `lag_reads` further task reads, like an asynchronous controller.
/// Actions without a session act as [`ADMIN_USER`].
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
    pub directory: MemoryGroupDirectory,
    pub auth: RecordingAuthenticator,
}

impl FakeCluster {
    pub fn with_lag(self, reads: u32) -> Self {
        guard(&self.state).lag_reads = reads;
        self
    }

    /// Install gate `name`; it becomes visible after `reads` lookups report it missing.
    pub fn with_gate(self, name: &str, reads: u32) -> Self {
        guard(&self.state).gates.push(PlannedGate {
            name: name.to_string(),
            remaining_reads: reads,
        });
        self
    }

    /// Run context wired to this cluster, with session files under `artifact_dir`.
    pub fn context(&self, config: GatecheckConfig, artifact_dir: &Path) -> RunContext {
        let credentials = CredentialCache::new(self.auth.clone())
            .with_artifact_dir(artifact_dir)
            .with_env(|_| None);
        RunContext::new(
            config,
            credentials,
            self.directory.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
        )
        .with_env(|_| None)
    }

    /// Actions applied so far as `(user, action)`.
    pub fn actions(&self) -> Vec<(String, RecordedAction)> {
        guard(&self.state).actions.clone()
    }

    pub fn task(&self, name: &str) -> Option<ApprovalTask> {
        guard(&self.state)
            .tasks
            .iter()
            .find(|task| task.name() == name)
            .cloned()
    }

    fn advance(state: &mut ClusterState) {
        let mut ready = Vec::new();
        state.staged.retain_mut(|staged| {
            if staged.remaining_reads == 0 {
                ready.push((
                    staged.task.clone(),
                    staged.state.clone(),
                    std::mem::take(&mut staged.responses),
                ));
                false
            } else {
                staged.remaining_reads -= 1;
                true
            }
        });
        for (name, raw_state, responses) in ready {
            if let Some(task) = state.tasks.iter_mut().find(|task| task.name() == name) {
                task.status.state = raw_state;
                task.status.approvers_response = responses;
            }
        }
    }

    fn apply(&self, user: &str, request: &ActionRequest<'_>) -> Result<Result<(), String>> {
        let mut locked = guard(&self.state);
        let state: &mut ClusterState = &mut locked;
        let lag = state.lag_reads;
        let Some(task) = state
            .tasks
            .iter_mut()
            .find(|task| task.name() == request.task && task.metadata.namespace == request.namespace)
        else {
            return Ok(Err(format!(
                "Error: approvaltasks.openshift-pipelines.org \"{}\" not found",
                request.task
            )));
        };
        let current_state = state
            .staged
            .iter()
            .rev()
            .find(|staged| staged.task == request.task)
            .map(|staged| staged.state.clone())
            .unwrap_or_else(|| task.status.state.clone());
        if current_state != STATE_PENDING {
            return Ok(Err(format!(
                "Error: failed to {} approvalTask {}: approvaltask has already reached it's final state",
                request.verb.as_str(),
                request.task
            )));
        }

        let response = match request.verb {
            Verb::Approve => Response::Approved,
            Verb::Reject => Response::Rejected,
        };
        let mut responses = state
            .staged
            .iter()
            .rev()
            .find(|staged| staged.task == request.task)
            .map(|staged| staged.responses.clone())
            .unwrap_or_else(|| task.status.approvers_response.clone());

        let mut matched = false;
        for approver in &mut task.spec.approvers {
            let is_group = approver.kind.as_deref() == Some("Group");
            let eligible = if is_group {
                self.directory
                    .members_of(&approver.name)
                    .is_some_and(|members| members.iter().any(|m| m == user))
            } else {
                approver.name == user
            };
            if !eligible {
                continue;
            }
            matched = true;
            approver.input = response_str(response).to_string();
            approver.message = request.message.to_string();
            record_response(&mut responses, approver, user, response, request.message);
        }
        if !matched {
            return Ok(Err(format!(
                "Error: failed to {} approvalTask {}: user {user} is not an approver",
                request.verb.as_str(),
                request.task
            )));
        }

        let required = task.approvals_required();
        let mut projected = task.clone();
        projected.status.approvers_response = responses.clone();
        let responded = required - crate::core::projector::pending_approvals(&projected);
        let next_state = if crate::core::projector::rejected_count(&projected) > 0 {
            STATE_REJECTED
        } else if responded >= required {
            STATE_APPROVED
        } else {
            STATE_PENDING
        };

        let name = request.task.to_string();
        state.staged.retain(|staged| staged.task != name);
        state.staged.push(StagedStatus {
            task: name,
            state: next_state.to_string(),
            responses,
            remaining_reads: lag,
        });
        if lag == 0 {
            Self::advance(state);
        }
        state
            .actions
            .push((user.to_string(), RecordedAction::from_request(request)));
        Ok(Ok(()))
    }
}

fn response_str(response: Response) -> &'static str {
    match response {
        Response::Approved => "approve",
        Response::Rejected => "reject",
        _ => "pending",
    }
}

fn record_response(
    responses: &mut Vec<ApproverResponse>,
    approver: &SpecApprover,
    user: &str,
    response: Response,
    message: &str,
) {
    let is_group = approver.kind.as_deref() == Some("Group");
    let entry = match responses
        .iter()
        .position(|existing| existing.name == approver.name)
    {
        Some(index) => &mut responses[index],
        None => {
            responses.push(ApproverResponse {
                kind: approver.kind.clone(),
                name: approver.name.clone(),
                ..ApproverResponse::default()
            });
            let last = responses.len() - 1;
            &mut responses[last]
        }
    };
    if is_group {
        entry.response = response;
        entry.message = message.to_string();
        match entry.group_members.iter_mut().find(|m| m.name == user) {
            Some(member) => {
                member.response = response;
                member.message = message.to_string();
            }
            None => entry.group_members.push(GroupMember {
                name: user.to_string(),
                response,
                message: message.to_string(),
            }),
        }
    } else {
        entry.response = response;
        entry.message = message.to_string();
    }
}

impl TaskSource for FakeCluster {
    fn get(&self, namespace: &str, name: &str) -> Result<ApprovalTask> {
        let mut state = guard(&self.state);
        Self::advance(&mut state);
        state
            .tasks
            .iter()
            .find(|task| task.name() == name && task.metadata.namespace == namespace)
            .cloned()
            .ok_or_else(|| VerifyError::NotReady(format!("approvaltask {namespace}/{name}")).into())
    }

    fn list(&self, namespace: &str) -> Result<Vec<ApprovalTask>> {
        let mut state = guard(&self.state);
        Self::advance(&mut state);
        Ok(state
            .tasks
            .iter()
            .filter(|task| task.metadata.namespace == namespace)
            .cloned()
            .collect())
    }
}

impl GateSource for FakeCluster {
    fn get_gate(&self, name: &str) -> Result<ManualApprovalGate> {
        let mut state = guard(&self.state);
        let Some(planned) = state.gates.iter_mut().find(|gate| gate.name == name) else {
            return Err(VerifyError::NotReady(format!("manualapprovalgate {name}")).into());
        };
        if planned.remaining_reads > 0 {
            planned.remaining_reads -= 1;
            return Err(VerifyError::NotReady(format!("manualapprovalgate {name}")).into());
        }
        let mut gate = ManualApprovalGate::default();
        gate.metadata.name = name.to_string();
        gate.spec.target_namespace = "openshift-pipelines".to_string();
        Ok(gate)
    }
}

impl ActionTool for FakeCluster {
    fn invoke(&self, request: &ActionRequest<'_>) -> Result<ToolResult> {
        let user = match request.kubeconfig {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?
                .trim()
                .to_string(),
            None => ADMIN_USER.to_string(),
        };
        let command = format!(
            "opc approvaltask {} {} -n {}",
            request.verb.as_str(),
            request.task,
            request.namespace
        );
        let result = match self.apply(&user, request)? {
            Ok(()) => ToolResult {
                command,
                exit_code: Some(0),
                stdout: format!(
                    "ApprovalTask {} is {}\n",
                    request.task,
                    match request.verb {
                        Verb::Approve => "approved",
                        Verb::Reject => "rejected",
                    }
                ),
                stderr: String::new(),
            },
            Err(stderr) => ToolResult {
                command,
                exit_code: Some(1),
                stdout: String::new(),
                stderr,
            },
        };
        Ok(result)
    }
}

impl RunSubmitter for FakeCluster {
    fn submit(&self, request: &RunRequest) -> Result<String> {
        render_manifest(request)?;
        let approvers = request.validated_approvers()?;
        let mut state = guard(&self.state);
        state.runs += 1;
        let run = format!("{}{:05}", request.generate_name(), state.runs);

        let mut task = ApprovalTask::default();
        task.metadata.name = format!("{run}-wait");
        task.metadata.namespace = request.namespace.clone();
        task.metadata.creation_timestamp =
            Some(format!("2026-01-01T00:{:02}:00Z", state.runs % 60));
        task.spec.number_of_approvals_required = request.required;
        task.spec.description = request.description.clone();
        task.spec.approvers = approvers
            .iter()
            .map(|approver| match approver.strip_prefix("group:") {
                Some(group) => SpecApprover {
                    name: group.to_string(),
                    kind: Some("Group".to_string()),
                    input: "pending".to_string(),
                    ..SpecApprover::default()
                },
                None => SpecApprover {
                    name: approver.clone(),
                    kind: Some("User".to_string()),
                    input: "pending".to_string(),
                    ..SpecApprover::default()
                },
            })
            .collect();
        task.status.state = STATE_PENDING.to_string();
        state.tasks.push(task);
        Ok(run)
    }
}

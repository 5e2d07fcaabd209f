//! Run executor: drives a validated plan step by step.
//!
//! At most one run is active process-wide; admission is a compare-and-swap
//! on the active slot, release is unconditional at run end. Per step the
//! executor applies command policy, supervises the child, collects evidence,
//! gates dependency changes, and evaluates executor steps — appending to the
//! run record and rewriting `run.json` after every event.

use crate::bus::EventBus;
use crate::evaluator;
use crate::evidence;
use crate::gate::{DecisionMap, DecisionMode, Delivery};
use crate::planner::{PlanSource, PlannerError};
use crate::store::{RunDir, RunStore};
use crate::supervisor::{self, ChildOutcome, LaunchMode, OutputSink, SpawnSpec};
use chrono::Utc;
use orc_core::events::{
    RunCancelledPayload, RunDecisionPayload, RunDonePayload, RunOutputPayload, RunStepPayload,
};
use orc_core::plan::{ExecutorTool, Plan, Step};
use orc_core::{
    policy, Config, Decision, DecisionResult, Evaluation, Evidence, OrchestratorEvent,
    OutputSource, PlanSummary, RunRecord, StepRecord,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("another run is active")]
    AnotherRunActive,
    #[error("workspace is not set")]
    WorkspaceUnset,
    #[error("plan has no steps")]
    EmptyPlan,
    #[error("not a git repository: {0}")]
    NotARepository(String),
    #[error("autobuild already active")]
    AutobuildActive,
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// What the autobuild controller needs to classify a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub exit_code: i32,
    pub cancelled: bool,
    pub decision_pending: bool,
    pub evaluation: Option<Evaluation>,
}

/// A run that holds the active slot but has not started executing.
pub struct AdmittedRun {
    record: RunRecord,
    plan: Plan,
    workspace: PathBuf,
    run_dir: RunDir,
    cancel: CancellationToken,
    mode: DecisionMode,
}

impl AdmittedRun {
    pub fn run_id(&self) -> &str {
        self.record.run_id.as_ref()
    }
}

impl std::fmt::Debug for AdmittedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmittedRun")
            .field("run_id", &self.record.run_id)
            .finish_non_exhaustive()
    }
}

struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
}

/// Process-wide orchestrator state shared by the HTTP surface, the run
/// executor, and the autobuild controller.
pub struct Orchestrator {
    config: Config,
    bus: EventBus,
    store: RunStore,
    planner: Arc<dyn PlanSource>,
    decisions: DecisionMap,
    active: Mutex<Option<ActiveRun>>,
    autobuild: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        config: Config,
        bus: EventBus,
        store: RunStore,
        planner: Arc<dyn PlanSource>,
    ) -> Self {
        Self {
            config,
            bus,
            store,
            planner,
            decisions: DecisionMap::new(),
            active: Mutex::new(None),
            autobuild: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub async fn generate_plan(&self, requirement: &str) -> Result<Plan, PlannerError> {
        self.planner.generate_plan(requirement).await
    }

    /// Preflight a workspace path: set, and a git repository.
    fn check_workspace(workspace: &str) -> Result<PathBuf, AdmitError> {
        if workspace.trim().is_empty() {
            return Err(AdmitError::WorkspaceUnset);
        }
        let path = PathBuf::from(workspace);
        if !path.join(".git").is_dir() {
            return Err(AdmitError::NotARepository(workspace.to_string()));
        }
        Ok(path)
    }

    /// Admit a plan: preflight, claim the active slot, create the run
    /// record on disk. No events are emitted until [`Self::launch`].
    pub fn admit(
        &self,
        workspace: &str,
        plan: Plan,
        requirement: Option<String>,
        mode: DecisionMode,
    ) -> Result<AdmittedRun, AdmitError> {
        let workspace_path = Self::check_workspace(workspace)?;
        if plan.steps.is_empty() {
            return Err(AdmitError::EmptyPlan);
        }

        let record = RunRecord::new(
            workspace.to_string(),
            requirement.unwrap_or_default(),
            PlanSummary {
                name: plan.name.clone(),
                steps_count: plan.steps.len(),
            },
        );
        let run_id = record.run_id.to_string();
        let cancel = CancellationToken::new();

        {
            let mut active = self.active.lock().unwrap();
            if active.is_some() {
                return Err(AdmitError::AnotherRunActive);
            }
            *active = Some(ActiveRun {
                run_id: run_id.clone(),
                cancel: cancel.clone(),
            });
        }

        self.store.ensure_root()?;
        let run_dir = match self.store.create(&record) {
            Ok(dir) => dir,
            Err(e) => {
                self.release_run(&run_id);
                return Err(e.into());
            }
        };

        info!(run_id, workspace, plan = %record.plan.name, "run admitted");
        Ok(AdmittedRun {
            record,
            plan,
            workspace: workspace_path,
            run_dir,
            cancel,
            mode,
        })
    }

    /// Spawn the step loop for an admitted run.
    pub fn launch(
        self: &Arc<Self>,
        admitted: AdmittedRun,
    ) -> (String, oneshot::Receiver<RunOutcome>) {
        let run_id = admitted.record.run_id.to_string();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let orch = Arc::clone(self);
        tokio::spawn(run_task(
            orch,
            admitted.record,
            admitted.plan,
            admitted.workspace,
            admitted.run_dir,
            admitted.cancel,
            admitted.mode,
            outcome_tx,
        ));
        (run_id, outcome_rx)
    }

    /// Admit a plan and spawn its run task. Returns the run id and a
    /// receiver that resolves with the run's outcome.
    pub fn start_run(
        self: &Arc<Self>,
        workspace: &str,
        plan: Plan,
        requirement: Option<String>,
        mode: DecisionMode,
    ) -> Result<(String, oneshot::Receiver<RunOutcome>), AdmitError> {
        let admitted = self.admit(workspace, plan, requirement, mode)?;
        Ok(self.launch(admitted))
    }

    /// Cancel the active run if the id matches. Resolves any pending
    /// decision as rejected and emits `run:cancelled`.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        let token = {
            let active = self.active.lock().unwrap();
            match active.as_ref() {
                Some(run) if run.run_id == run_id => run.cancel.clone(),
                _ => return false,
            }
        };
        // Cancel first so a parked decision waiter attributes the implicit
        // rejection to the cancel rather than to a human veto.
        token.cancel();
        self.decisions.resolve_rejected(run_id);
        self.bus.emit(OrchestratorEvent::RunCancelled(RunCancelledPayload {
            run_id: run_id.to_string(),
        }));
        true
    }

    /// Cancel whatever run is active, if any.
    pub fn cancel_active_run(&self) -> bool {
        let run_id = {
            let active = self.active.lock().unwrap();
            active.as_ref().map(|run| run.run_id.clone())
        };
        run_id.map(|id| self.cancel_run(&id)).unwrap_or(false)
    }

    /// Deliver a dependency-change decision for a run.
    ///
    /// Synchronous-mode runs receive it through their waiter and merge it
    /// themselves; for runs that already ended with `decision_pending`, the
    /// decision is merged into the stored record here.
    pub fn submit_decision(&self, run_id: &str, result: DecisionResult) -> bool {
        match self.decisions.deliver(run_id, result) {
            Delivery::NotFound => false,
            Delivery::SentToWaiter => true,
            Delivery::Detached { files } => {
                let decision = Decision::dependency_change(result, files);
                if let Err(e) = self.store.merge_decision(run_id, decision) {
                    warn!(run_id, error = %e, "failed to merge decision into run record");
                }
                true
            }
        }
    }

    /// Start an autobuild session. Fails when a run or another autobuild is
    /// already active, or the workspace does not pass preflight.
    pub fn start_autobuild(
        self: &Arc<Self>,
        workspace: &str,
        requirement: &str,
        max_iterations: Option<u32>,
    ) -> Result<(), AdmitError> {
        Self::check_workspace(workspace)?;
        if self.active.lock().unwrap().is_some() {
            return Err(AdmitError::AnotherRunActive);
        }
        let cancel = CancellationToken::new();
        {
            let mut autobuild = self.autobuild.lock().unwrap();
            if autobuild.is_some() {
                return Err(AdmitError::AutobuildActive);
            }
            *autobuild = Some(cancel.clone());
        }

        let orch = Arc::clone(self);
        let params = crate::autobuild::AutobuildParams {
            workspace: workspace.to_string(),
            requirement: requirement.to_string(),
            max_iterations,
        };
        tokio::spawn(crate::autobuild::run(orch, params, cancel));
        Ok(())
    }

    /// Cancel the autobuild session and, if a run is active, that run too.
    pub fn cancel_autobuild(&self) -> bool {
        let token = self.autobuild.lock().unwrap().clone();
        match token {
            Some(token) => {
                token.cancel();
                self.cancel_active_run();
                true
            }
            None => false,
        }
    }

    pub(crate) fn finish_autobuild(&self) {
        *self.autobuild.lock().unwrap() = None;
    }

    fn release_run(&self, run_id: &str) {
        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|run| run.run_id == run_id) {
            *active = None;
        }
    }
}

/// Output sink for one run: appends to `output.log` and emits `run:output`.
struct RunLogger {
    run_id: String,
    bus: EventBus,
    dir: Mutex<RunDir>,
}

impl RunLogger {
    fn system(&self, text: &str) {
        self.line(OutputSource::System, text);
    }

    fn rewrite(&self, record: &RunRecord) {
        if let Err(e) = self.dir.lock().unwrap().rewrite(record) {
            warn!(run_id = self.run_id, error = %e, "failed to rewrite run.json");
        }
    }
}

impl OutputSink for RunLogger {
    fn line(&self, source: OutputSource, text: &str) {
        self.dir.lock().unwrap().append_log(text);
        self.bus.emit(OrchestratorEvent::RunOutput(RunOutputPayload {
            run_id: self.run_id.clone(),
            source,
            text: text.to_string(),
        }));
    }
}

/// Wraps the run logger for executor-tool children, prefixing each line.
struct ExecutorSink<'a> {
    inner: &'a RunLogger,
}

impl OutputSink for ExecutorSink<'_> {
    fn line(&self, source: OutputSource, text: &str) {
        match source {
            OutputSource::Stdout => self.inner.line(source, &format!("[executor] {text}")),
            OutputSource::Stderr => self.inner.line(source, &format!("[executor][stderr] {text}")),
            OutputSource::System => self.inner.line(source, text),
        }
    }
}

/// How the step loop ends after a decision gate.
enum GateEnd {
    Continue,
    Rejected,
    Pending,
}

fn is_content_search_probe(argv: &[String]) -> bool {
    argv.len() >= 2 && argv[0] == "git" && argv[1] == "grep"
}

fn check_cmd_policy(command: &str, allowed: &[String]) -> Result<Vec<String>, String> {
    if !policy::is_command_allowed(command, allowed) {
        return Err("Command not allowed by policy".to_string());
    }
    if let Some(op) = policy::find_forbidden_operator(command) {
        return Err(format!("Command contains forbidden shell operator: {op}"));
    }
    policy::tokenize(command).map_err(|e| format!("Command could not be tokenized: {e}"))
}

fn base_step_record(index: usize, kind: &str, started: chrono::DateTime<Utc>) -> StepRecord {
    StepRecord {
        step_index: index,
        step_type: kind.to_string(),
        started_at: started,
        ended_at: Utc::now(),
        exit_code: 0,
        cancelled: false,
        timeout: false,
        blocked_by_policy: None,
        tool: None,
        instructions_length: None,
        evaluation: None,
        evidence: None,
    }
}

/// Two-phase executor-tool invocation: propose (`exec`), then `apply` only
/// when propose exited cleanly. Both children run detached so descendants
/// die with them.
async fn run_executor_tool(
    tool: ExecutorTool,
    instructions: &str,
    workspace: &Path,
    timeout: Duration,
    grace: Duration,
    sink: &dyn OutputSink,
    cancel: &CancellationToken,
) -> ChildOutcome {
    let ws = workspace.to_string_lossy().into_owned();
    let exec_argv: Vec<String> = vec![
        tool.bin().to_string(),
        "exec".to_string(),
        "-C".to_string(),
        ws.clone(),
        "--full-auto".to_string(),
        instructions.to_string(),
    ];
    let propose = supervisor::supervise(
        SpawnSpec {
            argv: &exec_argv,
            cwd: workspace,
            mode: LaunchMode::DetachedGroup,
            timeout,
            grace,
        },
        sink,
        cancel,
    )
    .await;
    if !propose.completed_ok() || propose.error.is_some() {
        return propose;
    }

    let apply_argv: Vec<String> = vec![
        tool.bin().to_string(),
        "apply".to_string(),
        "-C".to_string(),
        ws,
    ];
    let apply = supervisor::supervise(
        SpawnSpec {
            argv: &apply_argv,
            cwd: workspace,
            mode: LaunchMode::DetachedGroup,
            timeout,
            grace,
        },
        sink,
        cancel,
    )
    .await;

    ChildOutcome {
        exit_code: apply.exit_code,
        cancelled: propose.cancelled || apply.cancelled,
        timed_out: propose.timed_out || apply.timed_out,
        stdout: format!("{}{}", propose.stdout, apply.stdout),
        stderr: format!("{}{}", propose.stderr, apply.stderr),
        error: apply.error,
    }
}

/// Run the dependency-change gate over collected evidence.
async fn run_gate(
    orch: &Orchestrator,
    logger: &RunLogger,
    record: &mut RunRecord,
    evidence: &Evidence,
    mode: DecisionMode,
) -> GateEnd {
    let Some(names_raw) = evidence.diff_names() else {
        return GateEnd::Continue;
    };
    let names = evidence::parse_name_only(names_raw);
    let files = policy::dependency_changes(&names, &orch.config.dependency_files);
    if files.is_empty() {
        return GateEnd::Continue;
    }

    let run_id = record.run_id.to_string();
    // Register before announcing, so a decision delivered immediately after
    // the event always finds the pending entry.
    let waiter = match mode {
        DecisionMode::Asynchronous => {
            orch.decisions.insert_pending(&run_id, files.clone());
            None
        }
        DecisionMode::Synchronous => Some(orch.decisions.insert_waiting(&run_id, files.clone())),
    };
    orch.bus.emit(OrchestratorEvent::RunDecision(RunDecisionPayload {
        run_id: run_id.clone(),
        files: files.clone(),
    }));
    logger.system(&format!(
        "Awaiting approval for dependency file changes: {}",
        files.join(", ")
    ));

    match waiter {
        None => GateEnd::Pending,
        Some(rx) => {
            let result = rx.await.unwrap_or(DecisionResult::Rejected);
            record.decision = Some(Decision::dependency_change(result, files));
            logger.system(&format!("Dependency change {}", result.as_str()));
            logger.rewrite(record);
            match result {
                DecisionResult::Approved => GateEnd::Continue,
                DecisionResult::Rejected => GateEnd::Rejected,
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
    orch: Arc<Orchestrator>,
    mut record: RunRecord,
    plan: Plan,
    workspace: PathBuf,
    run_dir: RunDir,
    cancel: CancellationToken,
    mode: DecisionMode,
    outcome_tx: oneshot::Sender<RunOutcome>,
) {
    let run_id = record.run_id.to_string();
    let logger = RunLogger {
        run_id: run_id.clone(),
        bus: orch.bus.clone(),
        dir: Mutex::new(run_dir),
    };
    let total = plan.steps.len();
    let timeout = Duration::from_secs(u64::from(orch.config.run_timeout_sec));
    let grace = Duration::from_secs(u64::from(orch.config.kill_grace_sec));

    // Set by a content-search cmd step with matches; cleared by any note
    // step. Drives the no-op classification of the following executor step.
    let mut precheck_hit = false;
    let mut precheck_stdout = String::new();

    for (i, step) in plan.steps.iter().enumerate() {
        let index = i + 1;
        if cancel.is_cancelled() {
            record.cancelled = Some(true);
            record.exit_code = Some(-1);
            break;
        }

        orch.bus.emit(OrchestratorEvent::RunStep(RunStepPayload {
            run_id: run_id.clone(),
            step_index: index,
            total,
        }));
        let started = Utc::now();

        match step {
            Step::Note { message } => {
                logger.system(&format!("Note: {message}"));
                precheck_hit = false;
                precheck_stdout.clear();
                record.steps.push(base_step_record(index, "note", started));
                logger.rewrite(&record);
            }

            Step::Cmd { command } => {
                let argv = match check_cmd_policy(command, &orch.config.allowed_commands) {
                    Ok(argv) => argv,
                    Err(reason) => {
                        logger.system(&reason);
                        let ev = evidence::collect(&workspace, &logger).await;
                        let mut step_record = base_step_record(index, "cmd", started);
                        step_record.exit_code = -1;
                        step_record.blocked_by_policy = Some(true);
                        step_record.evidence = Some(ev.clone());
                        record.steps.push(step_record);
                        record.evidence = Some(ev.clone());
                        record.blocked_by_policy = Some(true);
                        record.exit_code = Some(-1);
                        logger.rewrite(&record);
                        // Decision opportunity; with a blocked command this
                        // is almost always a no-op.
                        match run_gate(&orch, &logger, &mut record, &ev, mode).await {
                            GateEnd::Pending => record.decision_pending = Some(true),
                            GateEnd::Rejected => record.cancelled_by_decision = Some(true),
                            GateEnd::Continue => {}
                        }
                        break;
                    }
                };

                let outcome = supervisor::supervise(
                    SpawnSpec {
                        argv: &argv,
                        cwd: &workspace,
                        mode: LaunchMode::Foreground,
                        timeout,
                        grace,
                    },
                    &logger,
                    &cancel,
                )
                .await;
                if let Some(error) = &outcome.error {
                    logger.system(error);
                }

                let probe = is_content_search_probe(&argv);
                // git grep exits 1 on "no match"; that is not a failure.
                let effective_exit = if probe && outcome.exit_code == 1 {
                    0
                } else {
                    outcome.exit_code
                };
                if orch.config.noop_precheck {
                    if probe {
                        precheck_hit = !outcome.stdout.trim().is_empty();
                        precheck_stdout = outcome.stdout.clone();
                    } else {
                        precheck_hit = false;
                        precheck_stdout.clear();
                    }
                }

                let ev = evidence::collect(&workspace, &logger).await;
                let mut step_record = base_step_record(index, "cmd", started);
                step_record.exit_code = effective_exit;
                step_record.cancelled = outcome.cancelled;
                step_record.timeout = outcome.timed_out;
                step_record.evidence = Some(ev.clone());
                record.steps.push(step_record);
                record.evidence = Some(ev.clone());
                logger.rewrite(&record);

                if outcome.cancelled {
                    record.cancelled = Some(true);
                    record.exit_code = Some(-1);
                    break;
                }
                if outcome.timed_out {
                    record.timeout = Some(true);
                    record.exit_code = Some(-1);
                    break;
                }
                if effective_exit != 0 {
                    record.exit_code = Some(effective_exit);
                    break;
                }

                match run_gate(&orch, &logger, &mut record, &ev, mode).await {
                    GateEnd::Continue => {}
                    GateEnd::Rejected => {
                        if cancel.is_cancelled() {
                            record.cancelled = Some(true);
                        } else {
                            record.cancelled_by_decision = Some(true);
                        }
                        record.exit_code = Some(-1);
                        break;
                    }
                    GateEnd::Pending => {
                        record.decision_pending = Some(true);
                        record.exit_code = Some(-1);
                        break;
                    }
                }
            }

            Step::Executor { tool, instructions } => {
                if !policy::is_executor_tool_allowed(*tool) {
                    logger.system("Executor tool not allowed by policy");
                    let ev = evidence::collect(&workspace, &logger).await;
                    let mut step_record = base_step_record(index, "executor", started);
                    step_record.exit_code = -1;
                    step_record.blocked_by_policy = Some(true);
                    step_record.tool = Some(tool.as_str().to_string());
                    step_record.evidence = Some(ev.clone());
                    record.steps.push(step_record);
                    record.evidence = Some(ev);
                    record.blocked_by_policy = Some(true);
                    record.exit_code = Some(-1);
                    logger.rewrite(&record);
                    break;
                }

                let baseline = evidence::changed_files(&workspace).await.unwrap_or_default();
                let executor_sink = ExecutorSink { inner: &logger };
                let outcome = run_executor_tool(
                    *tool,
                    instructions,
                    &workspace,
                    timeout,
                    grace,
                    &executor_sink,
                    &cancel,
                )
                .await;
                if let Some(error) = &outcome.error {
                    logger.system(error);
                }

                let ev = evidence::collect(&workspace, &logger).await;
                let current = ev
                    .diff_names()
                    .map(evidence::parse_name_only)
                    .unwrap_or_default();
                let mut evaluation = evaluator::evaluate(
                    &baseline,
                    &current,
                    outcome.exit_code,
                    precheck_hit && orch.config.noop_precheck,
                );

                if evaluation.no_op {
                    logger.system(
                        "Executor made no changes and the precheck already matched; skipping retry",
                    );
                    if !precheck_stdout.trim().is_empty() {
                        logger.system("Precheck output:");
                        for line in precheck_stdout.lines() {
                            logger.system(line);
                        }
                    }
                } else if evaluation.suspicious_no_change && outcome.completed_ok() {
                    logger.system("Executor made no changes; retrying once with minimal-change instructions");
                    let retry = run_executor_tool(
                        *tool,
                        evaluator::RETRY_INSTRUCTIONS,
                        &workspace,
                        timeout,
                        grace,
                        &executor_sink,
                        &cancel,
                    )
                    .await;
                    if let Some(error) = &retry.error {
                        logger.system(error);
                    }
                    let after = evidence::changed_files(&workspace).await.unwrap_or_default();
                    evaluation.retried = true;
                    evaluation.retry_result = Some(evaluator::retry_outcome(&baseline, &after));
                }

                let mut step_record = base_step_record(index, "executor", started);
                step_record.exit_code = outcome.exit_code;
                step_record.cancelled = outcome.cancelled;
                step_record.timeout = outcome.timed_out;
                step_record.tool = Some(tool.as_str().to_string());
                step_record.instructions_length = Some(instructions.chars().count());
                step_record.evaluation = Some(evaluation);
                step_record.evidence = Some(ev.clone());
                record.steps.push(step_record);
                record.evidence = Some(ev.clone());
                logger.rewrite(&record);

                if outcome.cancelled {
                    record.cancelled = Some(true);
                    record.exit_code = Some(-1);
                    break;
                }
                if outcome.timed_out {
                    record.timeout = Some(true);
                    record.exit_code = Some(-1);
                    break;
                }
                if outcome.exit_code != 0 {
                    record.exit_code = Some(outcome.exit_code);
                    break;
                }

                match run_gate(&orch, &logger, &mut record, &ev, mode).await {
                    GateEnd::Continue => {}
                    GateEnd::Rejected => {
                        if cancel.is_cancelled() {
                            record.cancelled = Some(true);
                        } else {
                            record.cancelled_by_decision = Some(true);
                        }
                        record.exit_code = Some(-1);
                        break;
                    }
                    GateEnd::Pending => {
                        record.decision_pending = Some(true);
                        record.exit_code = Some(-1);
                        break;
                    }
                }
            }
        }
    }

    if record.exit_code.is_none() {
        record.exit_code = Some(0);
    }
    record.end_time = Some(Utc::now());
    logger.rewrite(&record);

    let exit_code = record.exit_code.unwrap_or(-1);
    info!(run_id, exit_code, "run finished");

    // The pending-decision entry outlives the run only when the run ended
    // waiting on it; everything else is completion without a decision.
    if record.decision_pending != Some(true) {
        orch.decisions.remove(&run_id);
    }
    orch.release_run(&run_id);
    orch.bus.emit(OrchestratorEvent::RunDone(RunDonePayload {
        run_id: run_id.clone(),
        exit_code,
    }));

    let _ = outcome_tx.send(RunOutcome {
        run_id,
        exit_code,
        cancelled: record.cancelled.unwrap_or(false),
        decision_pending: record.decision_pending.unwrap_or(false),
        evaluation: record.last_evaluation().cloned(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_search_probe_detection() {
        let argv: Vec<String> = vec!["git".into(), "grep".into(), "-n".into(), "X".into()];
        assert!(is_content_search_probe(&argv));
        let argv: Vec<String> = vec!["git".into(), "status".into()];
        assert!(!is_content_search_probe(&argv));
        let argv: Vec<String> = vec!["git".into()];
        assert!(!is_content_search_probe(&argv));
    }

    #[test]
    fn cmd_policy_blocks_before_tokenizing() {
        let allowed = vec!["git".to_string()];
        assert_eq!(
            check_cmd_policy("rm -rf /", &allowed).unwrap_err(),
            "Command not allowed by policy"
        );
        assert!(check_cmd_policy("git status && rm x", &allowed)
            .unwrap_err()
            .contains("forbidden shell operator"));
        assert_eq!(
            check_cmd_policy("git status", &allowed).unwrap(),
            vec!["git", "status"]
        );
    }
}

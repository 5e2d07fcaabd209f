//! Autobuild controller: a bounded plan → run → classify loop.
//!
//! Each iteration asks the planner for a fresh plan (the last-run summary in
//! the prompt closes the loop), runs it in asynchronous decision mode, and
//! classifies the outcome against the stop taxonomy. Planner failures degrade
//! to a `planning_failed` stop instead of surfacing to the caller.

use crate::executor::Orchestrator;
use crate::gate::DecisionMode;
use orc_core::events::{
    AutobuildDonePayload, AutobuildPlanPayload, AutobuildStatusPayload, IterationSummary,
};
use orc_core::{AutobuildPhase, OrchestratorEvent, StopReason};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AutobuildParams {
    pub workspace: String,
    pub requirement: String,
    pub max_iterations: Option<u32>,
}

fn status(
    orch: &Orchestrator,
    iteration: u32,
    phase: AutobuildPhase,
    message: &str,
    run_id: Option<String>,
) {
    orch.bus()
        .emit(OrchestratorEvent::AutobuildStatus(AutobuildStatusPayload {
            iteration,
            phase,
            message: message.to_string(),
            run_id,
        }));
}

pub async fn run(orch: Arc<Orchestrator>, params: AutobuildParams, cancel: CancellationToken) {
    let max = params
        .max_iterations
        .unwrap_or(orch.config().max_iterations)
        .max(1);
    let mut summaries: Vec<IterationSummary> = Vec::new();
    let mut iterations_run = 0;
    let mut stop = None;

    for iteration in 1..=max {
        if cancel.is_cancelled() {
            stop = Some(StopReason::Cancelled);
            break;
        }

        status(&orch, iteration, AutobuildPhase::Planning, "Generating plan", None);
        let plan = match orch.generate_plan(&params.requirement).await {
            Ok(plan) => plan,
            Err(e) => {
                status(
                    &orch,
                    iteration,
                    AutobuildPhase::Done,
                    &format!("Planning failed: {e}"),
                    None,
                );
                stop = Some(StopReason::PlanningFailed);
                break;
            }
        };
        orch.bus()
            .emit(OrchestratorEvent::AutobuildPlan(AutobuildPlanPayload {
                iteration,
                plan_name: Some(plan.name.clone()),
                plan: plan.clone(),
            }));

        if cancel.is_cancelled() {
            stop = Some(StopReason::Cancelled);
            break;
        }

        // Admit before emitting the running status so the status line can
        // carry the run id and still precede every run event.
        let admitted = match orch.admit(
            &params.workspace,
            plan,
            Some(params.requirement.clone()),
            DecisionMode::Asynchronous,
        ) {
            Ok(admitted) => admitted,
            Err(e) => {
                status(
                    &orch,
                    iteration,
                    AutobuildPhase::Done,
                    &format!("Run admission failed: {e}"),
                    None,
                );
                stop = Some(StopReason::Failed);
                break;
            }
        };
        status(
            &orch,
            iteration,
            AutobuildPhase::Running,
            "Executing plan",
            Some(admitted.run_id().to_string()),
        );
        let (_run_id, outcome_rx) = orch.launch(admitted);
        iterations_run = iteration;

        let Ok(outcome) = outcome_rx.await else {
            stop = Some(StopReason::Failed);
            break;
        };
        summaries.push(IterationSummary {
            iteration,
            run_id: Some(outcome.run_id.clone()),
            exit_code: Some(outcome.exit_code),
        });

        // Classification order is significant; first match wins.
        if outcome.decision_pending {
            stop = Some(StopReason::DecisionPending);
            break;
        }
        if outcome.cancelled {
            stop = Some(StopReason::Cancelled);
            break;
        }
        if let Some(evaluation) = &outcome.evaluation {
            if evaluation.no_op {
                stop = Some(StopReason::NoOp);
                break;
            }
            if evaluation.suspicious_no_change
                && evaluation.retried
                && evaluation
                    .retry_result
                    .as_ref()
                    .map_or(true, |r| !r.has_changes)
            {
                stop = Some(StopReason::RetryNoChange);
                break;
            }
        }
        if outcome.exit_code != 0 {
            if iteration < max {
                continue;
            }
            stop = Some(StopReason::Failed);
            break;
        }
        if iteration == max {
            stop = Some(StopReason::MaxIterationsReached);
            break;
        }
    }

    let stop_reason = stop.unwrap_or(StopReason::MaxIterationsReached);
    info!(stop_reason = stop_reason.as_str(), iterations_run, "autobuild finished");
    orch.bus()
        .emit(OrchestratorEvent::AutobuildDone(AutobuildDonePayload {
            stop_reason,
            iterations_run,
            per_iteration_summary: Some(summaries),
        }));
    orch.finish_autobuild();
}

//! Event channel payloads.
//!
//! Event names and payload shapes are normative for the front-end transport;
//! casing of the wire keys is fixed (`runId`, `stepIndex`, `exitCode`).

use crate::plan::Plan;
use crate::types::{AutobuildPhase, StopReason};
use serde::{Deserialize, Serialize};

/// Source stream of a `run:output` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Stdout,
    Stderr,
    System,
}

impl OutputSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::System => "system",
        }
    }
}

/// Payload for `run:output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutputPayload {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub source: OutputSource,
    pub text: String,
}

/// Payload for `run:step`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStepPayload {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "stepIndex")]
    pub step_index: usize,
    pub total: usize,
}

/// Payload for `run:decision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDecisionPayload {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub files: Vec<String>,
}

/// Payload for `run:done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDonePayload {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
}

/// Payload for `run:cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCancelledPayload {
    #[serde(rename = "runId")]
    pub run_id: String,
}

/// Payload for `autobuild:status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutobuildStatusPayload {
    pub iteration: u32,
    pub phase: AutobuildPhase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Payload for `autobuild:plan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutobuildPlanPayload {
    pub iteration: u32,
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
}

/// One line of the autobuild wrap-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Payload for `autobuild:done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutobuildDonePayload {
    pub stop_reason: StopReason,
    pub iterations_run: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_iteration_summary: Option<Vec<IterationSummary>>,
}

/// Union of every event the orchestrator emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OrchestratorEvent {
    RunOutput(RunOutputPayload),
    RunStep(RunStepPayload),
    RunDecision(RunDecisionPayload),
    RunCancelled(RunCancelledPayload),
    RunDone(RunDonePayload),
    AutobuildStatus(AutobuildStatusPayload),
    AutobuildPlan(AutobuildPlanPayload),
    AutobuildDone(AutobuildDonePayload),
}

impl OrchestratorEvent {
    /// The normative event name carried alongside the payload.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunOutput(_) => "run:output",
            Self::RunStep(_) => "run:step",
            Self::RunDecision(_) => "run:decision",
            Self::RunCancelled(_) => "run:cancelled",
            Self::RunDone(_) => "run:done",
            Self::AutobuildStatus(_) => "autobuild:status",
            Self::AutobuildPlan(_) => "autobuild:plan",
            Self::AutobuildDone(_) => "autobuild:done",
        }
    }

    /// The run id the event concerns, when it concerns one.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::RunOutput(p) => Some(&p.run_id),
            Self::RunStep(p) => Some(&p.run_id),
            Self::RunDecision(p) => Some(&p.run_id),
            Self::RunCancelled(p) => Some(&p.run_id),
            Self::RunDone(p) => Some(&p.run_id),
            Self::AutobuildStatus(p) => p.run_id.as_deref(),
            Self::AutobuildPlan(_) | Self::AutobuildDone(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

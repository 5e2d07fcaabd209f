//! Core types for the orchestrator: run records, evidence, evaluations,
//! decisions, and the autobuild stop taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a run.
///
/// Uses `UUIDv7`: derived from the wall clock at creation, monotonic within a
/// process, and lexicographically sortable — run directories sort in start
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of the three read-only VCS queries collected after a step.
///
/// Serialized either as the query-keyed mapping or as `{ "error": ... }` when
/// any query failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Evidence {
    Collected {
        status: String,
        diff_stat: String,
        diff_names: String,
    },
    Failed {
        error: String,
    },
}

impl Evidence {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The raw `diff --name-only` output, if collection succeeded.
    pub fn diff_names(&self) -> Option<&str> {
        match self {
            Self::Collected { diff_names, .. } => Some(diff_names),
            Self::Failed { .. } => None,
        }
    }
}

/// Outcome of the single-shot executor retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub has_changes: bool,
    pub changed_files: Vec<String>,
}

/// Post-step evaluation attached to executor step records.
///
/// `changed_files` is the set difference current-minus-baseline, preserving
/// the order of the current diff listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub has_changes: bool,
    pub changed_files: Vec<String>,
    pub suspicious_no_change: bool,
    pub no_op: bool,
    pub retried: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_result: Option<RetryOutcome>,
}

/// Result of a dependency-change decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionResult {
    Approved,
    Rejected,
}

impl DecisionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// A delivered decision, merged into the run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "type")]
    pub kind: String,
    pub result: DecisionResult,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<String>,
}

impl Decision {
    pub fn dependency_change(result: DecisionResult, files: Vec<String>) -> Self {
        Self {
            kind: "dependency_change".to_string(),
            result,
            timestamp: Utc::now(),
            files,
        }
    }
}

/// One executed step in a run record.
///
/// `step_index` is 1-based. The `tool` / `instructions_length` / `evaluation`
/// fields are present only for executor steps; `evidence` only for non-note
/// steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: usize,
    #[serde(rename = "type")]
    pub step_type: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub exit_code: i32,
    pub cancelled: bool,
    pub timeout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by_policy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

/// Plan header embedded in the run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub name: String,
    #[serde(rename = "stepsCount")]
    pub steps_count: usize,
}

/// The persisted per-run record (`run.json`).
///
/// Wire key casing is fixed by the persisted layout; do not rename fields
/// without a migration story for existing run directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    #[serde(rename = "workspacePath")]
    pub workspace_path: String,
    pub requirement: String,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub plan: PlanSummary,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    #[serde(rename = "exitCode", default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by_policy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by_decision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_pending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl RunRecord {
    /// A fresh record at admission time, before any step has run.
    pub fn new(workspace_path: String, requirement: String, plan: PlanSummary) -> Self {
        Self {
            run_id: RunId::new(),
            workspace_path,
            requirement,
            start_time: Utc::now(),
            end_time: None,
            plan,
            steps: Vec::new(),
            evidence: None,
            exit_code: None,
            blocked_by_policy: None,
            timeout: None,
            cancelled: None,
            cancelled_by_decision: None,
            decision_pending: None,
            decision: None,
        }
    }

    /// Evaluation of the most recent executor step, if any.
    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.steps.iter().rev().find_map(|s| s.evaluation.as_ref())
    }
}

/// Why an autobuild session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PlanningFailed,
    Cancelled,
    NoOp,
    RetryNoChange,
    Failed,
    MaxIterationsReached,
    DecisionPending,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanningFailed => "planning_failed",
            Self::Cancelled => "cancelled",
            Self::NoOp => "no_op",
            Self::RetryNoChange => "retry_no_change",
            Self::Failed => "failed",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::DecisionPending => "decision_pending",
        }
    }
}

/// Phase reported by `autobuild:status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutobuildPhase {
    Planning,
    Running,
    Done,
}

impl AutobuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Done => "done",
        }
    }
}

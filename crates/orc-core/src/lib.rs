pub mod config;
pub mod events;
pub mod plan;
pub mod policy;
pub mod prompt;
pub mod types;

pub use config::Config;
pub use events::{OrchestratorEvent, OutputSource};
pub use plan::{ExecutorTool, Plan, PlanError, Step, MAX_PLAN_STEPS};
pub use types::{
    AutobuildPhase, Decision, DecisionResult, Evaluation, Evidence, PlanSummary, RetryOutcome,
    RunId, RunRecord, StepRecord, StopReason,
};

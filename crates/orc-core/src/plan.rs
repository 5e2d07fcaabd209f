//! Plan model and validator.
//!
//! Plans arrive as untyped JSON from the planner or from a user-edited
//! buffer; both paths go through the same strict parse. Schema errors carry
//! a field path and reason so the caller can point at the offending field;
//! policy checks run only after the shape is known to be valid.

use crate::policy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard cap on plan length.
pub const MAX_PLAN_STEPS: usize = 8;

/// The closed set of external code-mutation tools an executor step may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorTool {
    Codex,
}

impl ExecutorTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
        }
    }

    /// The binary name invoked for this tool.
    pub fn bin(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "codex" => Some(Self::Codex),
            _ => None,
        }
    }
}

/// One step of a plan.
///
/// `command` and `instructions` preserve caller whitespace verbatim; the
/// tokenizer depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    Note { message: String },
    Cmd { command: String },
    Executor { tool: ExecutorTool, instructions: String },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Note { .. } => "note",
            Self::Cmd { .. } => "cmd",
            Self::Executor { .. } => "executor",
        }
    }
}

/// A validated plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Plan {
    /// True if any cmd step contains a forbidden shell operator.
    pub fn has_forbidden_operators(&self) -> bool {
        self.steps.iter().any(|step| match step {
            Step::Cmd { command } => policy::has_forbidden_shell_operators(command),
            _ => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("schema violation at {path}: {reason}")]
    Schema { path: String, reason: String },
    #[error("policy violation: {0}")]
    Policy(String),
}

fn schema_err(path: impl Into<String>, reason: impl Into<String>) -> PlanError {
    PlanError::Schema {
        path: path.into(),
        reason: reason.into(),
    }
}

/// Parse plan JSON text and run schema checks. Policy checks are separate;
/// use [`parse_and_validate`] for the full pipeline.
pub fn parse_plan(text: &str) -> Result<Plan, PlanError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| PlanError::InvalidJson(e.to_string()))?;
    plan_from_value(&value)
}

/// Strict field-by-field extraction of a plan from an untyped JSON value.
pub fn plan_from_value(value: &Value) -> Result<Plan, PlanError> {
    let obj = value
        .as_object()
        .ok_or_else(|| schema_err("$", "expected a JSON object"))?;

    let name = obj
        .get("name")
        .ok_or_else(|| schema_err("$.name", "missing field"))?
        .as_str()
        .ok_or_else(|| schema_err("$.name", "expected a string"))?;
    if name.trim().is_empty() {
        return Err(schema_err("$.name", "must not be empty"));
    }

    let steps_value = obj
        .get("steps")
        .ok_or_else(|| schema_err("$.steps", "missing field"))?
        .as_array()
        .ok_or_else(|| schema_err("$.steps", "expected an array"))?;
    if steps_value.is_empty() {
        return Err(schema_err("$.steps", "must contain at least one step"));
    }

    let mut steps = Vec::with_capacity(steps_value.len());
    for (i, step_value) in steps_value.iter().enumerate() {
        steps.push(step_from_value(i, step_value)?);
    }

    Ok(Plan {
        name: name.to_string(),
        steps,
    })
}

fn step_from_value(index: usize, value: &Value) -> Result<Step, PlanError> {
    let path = format!("$.steps[{index}]");
    let obj = value
        .as_object()
        .ok_or_else(|| schema_err(&path, "expected a JSON object"))?;

    let step_type = obj
        .get("type")
        .ok_or_else(|| schema_err(format!("{path}.type"), "missing field"))?
        .as_str()
        .ok_or_else(|| schema_err(format!("{path}.type"), "expected a string"))?;

    match step_type {
        "note" => {
            let message = require_string(obj, &path, "message")?;
            Ok(Step::Note { message })
        }
        "cmd" => {
            let command = require_string(obj, &path, "command")?;
            Ok(Step::Cmd { command })
        }
        "executor" => {
            let tool_str = require_string(obj, &path, "tool")?;
            let tool = ExecutorTool::parse(&tool_str).ok_or_else(|| {
                schema_err(format!("{path}.tool"), format!("unknown tool: {tool_str}"))
            })?;
            let instructions = require_string(obj, &path, "instructions")?;
            if instructions.trim().is_empty() {
                return Err(schema_err(
                    format!("{path}.instructions"),
                    "must not be empty",
                ));
            }
            Ok(Step::Executor { tool, instructions })
        }
        other => Err(schema_err(
            format!("{path}.type"),
            format!("unknown step type: {other}"),
        )),
    }
}

fn require_string(
    obj: &serde_json::Map<String, Value>,
    path: &str,
    field: &str,
) -> Result<String, PlanError> {
    obj.get(field)
        .ok_or_else(|| schema_err(format!("{path}.{field}"), "missing field"))?
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| schema_err(format!("{path}.{field}"), "expected a string"))
}

/// Policy checks over a schema-valid plan.
pub fn validate_policy(plan: &Plan, allowed_commands: &[String]) -> Result<(), PlanError> {
    if plan.steps.len() > MAX_PLAN_STEPS {
        return Err(PlanError::Policy(format!(
            "plan has {} steps; the maximum is {MAX_PLAN_STEPS}",
            plan.steps.len()
        )));
    }
    if !plan.steps.iter().any(|s| matches!(s, Step::Note { .. })) {
        return Err(PlanError::Policy(
            "plan must include at least one note step".to_string(),
        ));
    }
    for (i, step) in plan.steps.iter().enumerate() {
        if let Step::Cmd { command } = step {
            if command.trim().is_empty() {
                return Err(PlanError::Policy(format!("step {}: empty command", i + 1)));
            }
            if !policy::is_command_allowed(command, allowed_commands) {
                return Err(PlanError::Policy(format!(
                    "step {}: command not allowed: {command}",
                    i + 1
                )));
            }
        }
    }
    Ok(())
}

/// The full validation pipeline: JSON parse, schema, then policy.
pub fn parse_and_validate(text: &str, allowed_commands: &[String]) -> Result<Plan, PlanError> {
    let plan = parse_plan(text)?;
    validate_policy(&plan, allowed_commands)?;
    Ok(plan)
}

//! Output rendering for the orcctl CLI.

use crate::client::RunListEntry;
use orc_core::plan::{Plan, Step};
use orc_core::RunRecord;

/// Print a generated plan.
pub fn print_plan(plan: &Plan) {
    println!("Plan: {}", plan.name);
    for (i, step) in plan.steps.iter().enumerate() {
        match step {
            Step::Note { message } => println!("  {}. note      {message}", i + 1),
            Step::Cmd { command } => println!("  {}. cmd       {command}", i + 1),
            Step::Executor { tool, instructions } => {
                println!("  {}. executor  [{}] {instructions}", i + 1, tool.as_str());
            }
        }
    }
}

/// Print a list of runs in tabular format.
pub fn print_run_list(runs: &[RunListEntry]) {
    if runs.is_empty() {
        println!("No runs found.");
        return;
    }

    println!("{:<38}  {:<20}  {:<20}  {:<5}", "RUN ID", "STARTED", "ENDED", "EXIT");
    println!("{}", "-".repeat(90));
    for run in runs {
        println!(
            "{:<38}  {:<20}  {:<20}  {:<5}",
            run.run_id,
            format_time(Some(run.start_time)),
            format_time(run.end_time),
            run.exit_code.map_or_else(|| "-".to_string(), |c| c.to_string()),
        );
    }
    println!();
    println!("{} run(s)", runs.len());
}

/// Print one run record in detail.
pub fn print_run_details(record: &RunRecord) {
    println!("Run: {}", record.run_id);
    println!();
    println!("  Workspace:   {}", record.workspace_path);
    if !record.requirement.is_empty() {
        println!("  Requirement: {}", record.requirement);
    }
    println!("  Plan:        {} ({} steps)", record.plan.name, record.plan.steps_count);
    println!("  Started:     {}", format_time(Some(record.start_time)));
    println!("  Ended:       {}", format_time(record.end_time));
    println!(
        "  Exit code:   {}",
        record.exit_code.map_or_else(|| "-".to_string(), |c| c.to_string())
    );
    for (label, flag) in [
        ("blocked_by_policy", record.blocked_by_policy),
        ("timeout", record.timeout),
        ("cancelled", record.cancelled),
        ("cancelled_by_decision", record.cancelled_by_decision),
        ("decision_pending", record.decision_pending),
    ] {
        if flag == Some(true) {
            println!("  Flag:        {label}");
        }
    }
    if let Some(decision) = &record.decision {
        println!(
            "  Decision:    {} ({})",
            decision.result.as_str(),
            decision.files.join(", ")
        );
    }

    if !record.steps.is_empty() {
        println!();
        println!("  Steps:");
        for step in &record.steps {
            let mut flags = Vec::new();
            if step.cancelled {
                flags.push("cancelled");
            }
            if step.timeout {
                flags.push("timeout");
            }
            if step.blocked_by_policy == Some(true) {
                flags.push("blocked");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(","))
            };
            println!(
                "    {}. {:<9} exit {}{}",
                step.step_index, step.step_type, step.exit_code, flags
            );
            if let Some(evaluation) = &step.evaluation {
                println!(
                    "       changes: {}  suspicious: {}  no_op: {}  retried: {}",
                    evaluation.has_changes,
                    evaluation.suspicious_no_change,
                    evaluation.no_op,
                    evaluation.retried
                );
            }
        }
    }
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map_or_else(
        || "-".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

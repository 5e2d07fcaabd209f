//! orcctl - CLI client for the orcd control plane.

mod client;
mod render;

use clap::{Parser, Subcommand};
use client::{Client, ClientError};
use orc_core::DecisionResult;
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_ADDR: &str = "http://127.0.0.1:7433";

/// CLI client for the orcd orchestrator daemon.
#[derive(Parser)]
#[command(name = "orcctl")]
#[command(about = "Control plane for the orcd dev orchestrator")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7433)
    #[arg(long, global = true, env = "ORCD_ADDR")]
    addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a plan from a requirement (does not run it)
    Plan {
        /// The free-text requirement
        requirement: String,
    },

    /// Run a plan JSON file against a workspace
    Run {
        /// Path to the workspace (a git repository)
        workspace: PathBuf,

        /// Path to the plan JSON file
        plan: PathBuf,

        /// Requirement text recorded with the run
        #[arg(long)]
        requirement: Option<String>,
    },

    /// Start an autobuild session
    Autobuild {
        /// Path to the workspace (a git repository)
        workspace: PathBuf,

        /// The free-text requirement
        requirement: String,

        /// Maximum iterations (default: daemon config)
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// List runs
    Runs,

    /// Show one run record
    Show {
        /// Run id
        run_id: String,
    },

    /// Cancel the active run
    Cancel {
        /// Run id
        run_id: String,
    },

    /// Cancel the autobuild session
    CancelAutobuild,

    /// Approve or reject a pending dependency-change decision
    Decide {
        /// Run id
        run_id: String,

        /// approved or rejected
        #[arg(value_parser = parse_decision)]
        result: DecisionResult,
    },

    /// Print the runs-root directory (creating it if missing)
    RunsRoot,

    /// Tail the daemon's event stream
    Events,
}

fn parse_decision(s: &str) -> Result<DecisionResult, String> {
    match s {
        "approved" => Ok(DecisionResult::Approved),
        "rejected" => Ok(DecisionResult::Rejected),
        _ => Err(format!("invalid decision: {s} (use approved or rejected)")),
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let addr = cli.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let client = Client::new(addr);

    match cli.command {
        Command::Plan { requirement } => {
            let plan = client.generate_plan(&requirement).await?;
            render::print_plan(&plan);
        }
        Command::Run {
            workspace,
            plan,
            requirement,
        } => {
            let text = std::fs::read_to_string(&plan)
                .map_err(|e| ClientError::IoError(format!("{}: {e}", plan.display())))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ClientError::IoError(format!("{}: {e}", plan.display())))?;
            let run_id = client
                .run_plan(
                    &workspace.to_string_lossy(),
                    value,
                    requirement.as_deref(),
                )
                .await?;
            println!("Started run: {run_id}");
        }
        Command::Autobuild {
            workspace,
            requirement,
            max_iterations,
        } => {
            client
                .start_autobuild(&workspace.to_string_lossy(), &requirement, max_iterations)
                .await?;
            println!("Autobuild started.");
        }
        Command::Runs => {
            let runs = client.list_runs().await?;
            render::print_run_list(&runs);
        }
        Command::Show { run_id } => {
            let record = client.get_run(&run_id).await?;
            render::print_run_details(&record);
        }
        Command::Cancel { run_id } => {
            if client.cancel_run(&run_id).await? {
                println!("Cancelled run {run_id}.");
            } else {
                println!("Run {run_id} is not active.");
            }
        }
        Command::CancelAutobuild => {
            if client.cancel_autobuild().await? {
                println!("Autobuild cancelled.");
            } else {
                println!("No autobuild session is active.");
            }
        }
        Command::Decide { run_id, result } => {
            if client.submit_decision(&run_id, result).await? {
                println!("Decision delivered.");
            } else {
                println!("No pending decision for run {run_id}.");
            }
        }
        Command::RunsRoot => {
            println!("{}", client.runs_root().await?);
        }
        Command::Events => {
            println!("Tailing events from {} (ctrl-c to stop)", client.addr());
            client
                .tail_events(|name, data| println!("{name} {data}"))
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

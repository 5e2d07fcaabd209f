//! orcd - AI dev orchestrator daemon.
//!
//! Main entry point for the daemon binary.

use clap::Parser;
use orc_core::Config;
use orcd::Daemon;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Workspace-scoped orchestrator daemon.
#[derive(Parser)]
#[command(name = "orcd")]
#[command(about = "AI dev orchestrator daemon")]
#[command(version)]
struct Cli {
    /// Config file (key=value format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the local control plane
    #[arg(long)]
    port: Option<u16>,

    /// Override the runs-root directory
    #[arg(long)]
    runs_root: Option<PathBuf>,
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load config {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(runs_root) = cli.runs_root {
        config.runs_root = Some(runs_root);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    runtime.block_on(async {
        let daemon = Daemon::new(config);
        tokio::select! {
            result = daemon.run() => {
                if let Err(e) = result {
                    error!("daemon error: {e}");
                    std::process::exit(1);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT");
                daemon.shutdown();
            }
        }
    });
}

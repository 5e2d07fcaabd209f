//! orcd - workspace-scoped AI dev orchestrator daemon.
//!
//! Library components for the daemon process: the run executor and its
//! collaborators, the planner client, the autobuild controller, and the
//! local HTTP control plane.

pub mod autobuild;
pub mod bus;
pub mod evaluator;
pub mod evidence;
pub mod executor;
pub mod gate;
pub mod planner;
pub mod server;
pub mod store;
pub mod supervisor;

use std::sync::Arc;

use bus::EventBus;
use executor::Orchestrator;
use orc_core::Config;
use planner::EnvPlanner;
use store::RunStore;

/// Type alias for application-level errors with context.
pub type AppResult<T> = eyre::Result<T>;

/// Daemon wiring: config, store, event bus, orchestrator, HTTP surface.
pub struct Daemon {
    orch: Arc<Orchestrator>,
    port: u16,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").field("port", &self.port).finish()
    }
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let store = RunStore::new(config.resolved_runs_root());
        let planner = Arc::new(EnvPlanner::new(
            config.planner_base_url.clone(),
            config.planner_model.clone(),
            store.clone(),
            config.allowed_commands.clone(),
        ));
        let port = config.port;
        let orch = Arc::new(Orchestrator::new(
            config,
            EventBus::new(),
            store,
            planner,
        ));
        Self { orch, port }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orch)
    }

    /// Serve the control plane until the process is stopped.
    pub async fn run(&self) -> AppResult<()> {
        server::start_server(Arc::clone(&self.orch), self.port).await
    }

    /// Cooperative shutdown: cancel the autobuild session and the active
    /// run (which resolves any pending decision as rejected).
    pub fn shutdown(&self) {
        self.orch.cancel_autobuild();
        self.orch.cancel_active_run();
    }
}

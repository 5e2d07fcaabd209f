//! Decision gate: human approval for dependency-file changes.
//!
//! One process-wide map from run id to pending decision. The run executor
//! inserts an entry when evidence shows dependency-file changes; the entry is
//! removed by decision delivery, by cancellation (which resolves it as
//! rejected), or by run completion without a decision.

use orc_core::DecisionResult;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// How the run executor behaves while a decision is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    /// Suspend the step loop until the decision arrives.
    Synchronous,
    /// Record the pending request and end the run with `decision_pending`.
    Asynchronous,
}

struct PendingDecision {
    files: Vec<String>,
    /// Present in synchronous mode; the run executor is parked on the other
    /// end.
    waiter: Option<oneshot::Sender<DecisionResult>>,
}

/// Outcome of delivering a decision through [`DecisionMap::deliver`].
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// No pending decision for that run id.
    NotFound,
    /// A parked run executor received the decision and will merge it.
    SentToWaiter,
    /// The run had already ended with `decision_pending`; the caller merges
    /// the decision into the stored record.
    Detached { files: Vec<String> },
}

#[derive(Default)]
pub struct DecisionMap {
    inner: Mutex<HashMap<String, PendingDecision>>,
}

impl std::fmt::Debug for DecisionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionMap").finish_non_exhaustive()
    }
}

impl DecisionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous-mode request; the returned receiver resolves
    /// when the decision is delivered (or the run is cancelled).
    pub fn insert_waiting(
        &self,
        run_id: &str,
        files: Vec<String>,
    ) -> oneshot::Receiver<DecisionResult> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(
            run_id.to_string(),
            PendingDecision {
                files,
                waiter: Some(tx),
            },
        );
        rx
    }

    /// Register an asynchronous-mode request; nobody waits.
    pub fn insert_pending(&self, run_id: &str, files: Vec<String>) {
        self.inner.lock().unwrap().insert(
            run_id.to_string(),
            PendingDecision {
                files,
                waiter: None,
            },
        );
    }

    /// Deliver a decision for a run.
    pub fn deliver(&self, run_id: &str, result: DecisionResult) -> Delivery {
        let Some(pending) = self.inner.lock().unwrap().remove(run_id) else {
            return Delivery::NotFound;
        };
        match pending.waiter {
            Some(tx) => {
                // A dropped receiver means the run ended mid-delivery; the
                // decision is simply lost, matching a cancel race.
                let _ = tx.send(result);
                Delivery::SentToWaiter
            }
            None => Delivery::Detached {
                files: pending.files,
            },
        }
    }

    /// Resolve a pending decision as rejected (cancellation path). Returns
    /// the files if an entry existed.
    pub fn resolve_rejected(&self, run_id: &str) -> Option<Vec<String>> {
        let pending = self.inner.lock().unwrap().remove(run_id)?;
        if let Some(tx) = pending.waiter {
            let _ = tx.send(DecisionResult::Rejected);
        }
        Some(pending.files)
    }

    /// Drop any entry for a run that completed without a decision.
    pub fn remove(&self, run_id: &str) {
        self.inner.lock().unwrap().remove(run_id);
    }

    pub fn pending_files(&self, run_id: &str) -> Option<Vec<String>> {
        self.inner
            .lock()
            .unwrap()
            .get(run_id)
            .map(|p| p.files.clone())
    }
}

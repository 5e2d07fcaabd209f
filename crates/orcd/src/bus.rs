//! Event bus: a broadcast channel carrying orchestrator events to the
//! front-end transport.
//!
//! Emission never blocks; events sent with no subscribers are dropped, which
//! is correct for a fire-and-forget notification channel. Ordering per
//! subscriber follows send order.

use orc_core::OrchestratorEvent;
use tokio::sync::broadcast;
use tracing::trace;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        trace!(event = event.name(), "emit");
        // A send error only means there is no subscriber right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::events::{RunDonePayload, RunStepPayload};

    #[tokio::test]
    async fn subscribers_see_events_in_send_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(OrchestratorEvent::RunStep(RunStepPayload {
            run_id: "r".to_string(),
            step_index: 1,
            total: 1,
        }));
        bus.emit(OrchestratorEvent::RunDone(RunDonePayload {
            run_id: "r".to_string(),
            exit_code: 0,
        }));

        assert_eq!(rx.recv().await.unwrap().name(), "run:step");
        assert_eq!(rx.recv().await.unwrap().name(), "run:done");
    }

    #[tokio::test]
    async fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(OrchestratorEvent::RunDone(RunDonePayload {
            run_id: "r".to_string(),
            exit_code: -1,
        }));
    }
}

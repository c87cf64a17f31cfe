//! In-process completion event bus
//!
//! The execution runner publishes one [`PipelineCompleted`] per run;
//! the chain integrator subscribes. Delivery is fire-and-forget over a
//! broadcast channel: no receivers is fine, and a lagging receiver
//! drops events rather than blocking the publisher.

use tokio::sync::broadcast;

use sluice_core::domain::event::PipelineCompleted;

#[derive(Clone)]
pub struct CompletionBus {
    tx: broadcast::Sender<PipelineCompleted>,
}

impl CompletionBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: PipelineCompleted) {
        // Err means no live subscribers, which is not a failure here.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineCompleted> {
        self.tx.subscribe()
    }
}

impl Default for CompletionBus {
    fn default() -> Self {
        Self::new(64)
    }
}

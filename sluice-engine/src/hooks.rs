//! Post-commit side effects
//!
//! Registering or unregistering a live schedule must happen only after
//! the store mutation that created/updated/deleted the trigger row has
//! succeeded, never inline with it. Trigger mutations therefore return
//! an explicit ordered list of deferred actions which the caller
//! flushes into the cron driver afterwards.

use tracing::error;
use uuid::Uuid;

use crate::scheduler::CronDriver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCommitAction {
    RegisterSchedule { trigger_id: Uuid },
    UnregisterSchedule { trigger_id: Uuid },
}

#[derive(Debug, Default)]
pub struct PostCommitActions {
    actions: Vec<PostCommitAction>,
}

impl PostCommitActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: PostCommitAction) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[PostCommitAction] {
        &self.actions
    }

    /// Applies the deferred actions in order. Failures are logged, not
    /// propagated: the row mutation has already succeeded and must not
    /// be reported as failed because of scheduler bookkeeping.
    pub async fn flush(self, driver: &CronDriver) {
        for action in self.actions {
            match action {
                PostCommitAction::RegisterSchedule { trigger_id } => {
                    if let Err(e) = driver.register_by_id(trigger_id).await {
                        error!("Failed to register schedule for trigger {}: {}", trigger_id, e);
                    }
                }
                PostCommitAction::UnregisterSchedule { trigger_id } => {
                    driver.unregister(trigger_id);
                }
            }
        }
    }
}

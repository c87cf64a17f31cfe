//! Trigger audit events and the pipeline completion event

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::ExecutionStatus;

/// Append-only audit record of a trigger decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub pipeline_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub event_type: TriggerEventType,
    pub detail: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl TriggerEvent {
    pub fn new(
        trigger_id: Uuid,
        pipeline_id: Uuid,
        execution_id: Option<Uuid>,
        event_type: TriggerEventType,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            pipeline_id,
            execution_id,
            event_type,
            detail: detail.into(),
            created_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerEventType {
    Fired,
    Skipped,
    Error,
    Missed,
}

/// Published on the in-process completion bus after every run,
/// successful or not. Fire-and-forget; not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCompleted {
    pub pipeline_id: Uuid,
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
}

//! Execution domain types
//!
//! One `Execution` row per pipeline run, one `StepExecution` row per
//! step per run. Both are created up front in `Pending` and only ever
//! transition forward.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single run of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub status: ExecutionStatus,
    pub triggered_by: RunOrigin,
    pub trigger_id: Option<Uuid>,
    /// User who requested the run, for manual runs.
    pub requested_by: Option<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Run status: Pending -> Running -> {Completed, Failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOrigin {
    Manual,
    Schedule,
    Api,
    Webhook,
    PipelineChain,
    DatasetChange,
}

/// Per-step record within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub status: StepStatus,
    pub output_rows: Option<i64>,
    pub log: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl StepExecution {
    /// Creates the initial Pending row for a step.
    pub fn pending(execution_id: Uuid, step_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            status: StepStatus::Pending,
            output_rows: None,
            log: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Step status: Pending -> Running -> {Completed, Failed, Skipped}.
///
/// Skipped means at least one direct dependency did not complete; a
/// Skipped or Failed step is never resurrected within the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

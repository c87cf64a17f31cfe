//! Engine error types
//!
//! Validation errors are raised synchronously to the caller of
//! create/update operations. Once a run or a fire is underway,
//! failures are absorbed locally and recorded as step statuses or
//! trigger events instead.

use uuid::Uuid;

use crate::store::StoreError;

/// Engine error type
#[derive(Debug)]
pub enum EngineError {
    /// The proposed step list contains a dependency cycle.
    CyclicDependency(String),
    /// A chain trigger would close a cycle across pipelines, points at
    /// its own pipeline, or the chain graph is deeper than the cap.
    CyclicTriggerDependency(String),
    PipelineNotFound(Uuid),
    TriggerNotFound(Uuid),
    InvalidConfig(String),
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::CyclicDependency(msg) => {
                write!(f, "cyclic step dependency: {}", msg)
            }
            EngineError::CyclicTriggerDependency(msg) => {
                write!(f, "cyclic trigger dependency: {}", msg)
            }
            EngineError::PipelineNotFound(id) => write!(f, "pipeline {} not found", id),
            EngineError::TriggerNotFound(id) => write!(f, "trigger {} not found", id),
            EngineError::InvalidConfig(msg) => write!(f, "invalid trigger config: {}", msg),
            EngineError::Store(err) => write!(f, "store error: {}", err),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

//! Pipeline and step domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-defined multi-step data pipeline.
///
/// `is_active` gates trigger firing: an inactive pipeline keeps its
/// triggers, but fires against it are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// One step of a pipeline.
///
/// Dependencies are stored as resolved step ids. The human-facing
/// dependency *names* only exist on the create/update request; they
/// are resolved against the submitted step list at save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    /// Unique within the owning pipeline.
    pub name: String,
    pub script_type: ScriptType,
    /// Opaque payload handed to the StepExecutor collaborator.
    pub payload: serde_json::Value,
    /// Dataset the step writes to, if any.
    pub output_dataset_id: Option<Uuid>,
    /// Raw load strategy string; parsed at execution time so an
    /// unrecognized value can fall back to REPLACE with a warning.
    pub load_strategy: String,
    pub depends_on: Vec<Uuid>,
}

/// Kind of work a step performs. Execution itself is delegated to a
/// per-type StepExecutor implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptType {
    Sql,
    Script,
    HttpImport,
}

/// How a step's output is written to its destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStrategy {
    Replace,
    Append,
}

impl LoadStrategy {
    /// Parses the stored strategy string. Returns `None` for anything
    /// unrecognized so the caller can decide on a fallback.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REPLACE" => Some(LoadStrategy::Replace),
            "APPEND" => Some(LoadStrategy::Append),
            _ => None,
        }
    }
}

//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::ScriptType;

/// Request to create a new pipeline with its step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_by: String,
    #[serde(default)]
    pub steps: Vec<CreateStep>,
}

fn default_active() -> bool {
    true
}

/// Request to update a pipeline. A `steps` list, when present,
/// replaces the existing steps wholesale and is DAG-validated first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePipeline {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub steps: Option<Vec<CreateStep>>,
}

/// A proposed step. Dependencies are given by step *name* and resolved
/// to ids when the pipeline is saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStep {
    pub name: String,
    pub script_type: ScriptType,
    pub payload: serde_json::Value,
    pub output_dataset_id: Option<Uuid>,
    #[serde(default = "default_load_strategy")]
    pub load_strategy: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_load_strategy() -> String {
    "REPLACE".to_string()
}

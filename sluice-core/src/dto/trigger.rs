//! Trigger DTOs
//!
//! The create request carries the raw, untyped config map from the
//! transport layer; the trigger service decodes and validates it into
//! the typed `TriggerConfig` union. The untyped map never travels
//! further than that boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::trigger::{Trigger, TriggerType};

/// Request to create a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTrigger {
    pub pipeline_id: Uuid,
    pub trigger_type: TriggerType,
    /// Raw per-type config map, validated by the trigger service.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    pub created_by: String,
}

fn default_enabled() -> bool {
    true
}

/// Request to update a trigger. The trigger's type is immutable; a
/// `config` map, when present, is re-validated under the existing type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTrigger {
    pub is_enabled: Option<bool>,
    pub config: Option<serde_json::Value>,
}

/// Creation response.
///
/// `api_token` is present only for API triggers and only here: the
/// raw token is never stored and cannot be recovered later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedTrigger {
    pub trigger: Trigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

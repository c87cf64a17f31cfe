//! Trigger domain types
//!
//! A trigger connects "something happened" to "maybe start a pipeline
//! run". Configuration is a tagged union with one variant per trigger
//! type; the untyped config map from the transport layer is decoded
//! into it before any business logic sees it. `TriggerState` is the
//! mutable runtime scratch space owned by the cron driver and the
//! dataset poller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub is_enabled: bool,
    pub config: TriggerConfig,
    #[serde(default)]
    pub state: TriggerState,
    pub created_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Trigger {
    pub fn trigger_type(&self) -> TriggerType {
        self.config.trigger_type()
    }
}

/// Trigger kind. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Schedule,
    Api,
    Webhook,
    PipelineChain,
    DatasetChange,
}

/// Validated, type-specific trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerConfig {
    Schedule {
        cron: String,
        timezone: String,
        concurrency_policy: ConcurrencyPolicy,
    },
    Api {
        /// One-way SHA-256 hash of the bearer token. The raw token is
        /// returned to the caller once, at creation, and never stored.
        token_hash: String,
    },
    Webhook {
        /// Public identifier embedded in the inbound webhook URL.
        webhook_id: String,
        /// HMAC secret, encrypted at rest. The plaintext is discarded
        /// at creation time.
        encrypted_secret: Option<String>,
    },
    PipelineChain {
        upstream_pipeline_id: Uuid,
        condition: ChainCondition,
    },
    DatasetChange {
        dataset_ids: Vec<Uuid>,
        polling_interval_seconds: u64,
        debounce_seconds: u64,
    },
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerConfig::Schedule { .. } => TriggerType::Schedule,
            TriggerConfig::Api { .. } => TriggerType::Api,
            TriggerConfig::Webhook { .. } => TriggerType::Webhook,
            TriggerConfig::PipelineChain { .. } => TriggerType::PipelineChain,
            TriggerConfig::DatasetChange { .. } => TriggerType::DatasetChange,
        }
    }
}

/// Whether a SCHEDULE fire is allowed while a previous run of the same
/// pipeline is still Pending/Running. Meaningless for other types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConcurrencyPolicy {
    Skip,
    Allow,
}

/// Upstream outcome a PIPELINE_CHAIN trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainCondition {
    Success,
    Failure,
    Any,
}

/// Mutable runtime state persisted on the trigger row so the process
/// can restart without replaying or losing fires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerState {
    pub last_fired_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Next scheduled occurrence, maintained by the cron driver and
    /// used for missed-fire detection on startup.
    pub next_fire_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_checked_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Approximate row counts per watched dataset from the previous
    /// polling cycle.
    #[serde(default)]
    pub last_snapshot: HashMap<Uuid, i64>,
}

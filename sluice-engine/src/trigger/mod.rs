//! Trigger registry and firing engine
//!
//! Owns trigger configuration and state: validates the per-type config
//! contract at creation, detects cycles across chained pipelines, and
//! exposes [`TriggerService::fire_trigger`], the single best-effort
//! entry point that turns "something happened" into "maybe start a
//! pipeline run". Scheduler (un)registration is returned as deferred
//! [`PostCommitActions`], never performed inline with the row mutation.

pub mod chain;
pub mod poller;

pub use chain::ChainListener;
pub use poller::DatasetPoller;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use sluice_core::domain::event::{TriggerEvent, TriggerEventType};
use sluice_core::domain::execution::RunOrigin;
use sluice_core::domain::trigger::{
    ChainCondition, ConcurrencyPolicy, Trigger, TriggerConfig, TriggerState, TriggerType,
};
use sluice_core::dto::trigger::{CreateTrigger, CreatedTrigger, UpdateTrigger};

use crate::error::{EngineError, Result};
use crate::execution::PipelineLauncher;
use crate::hooks::{PostCommitAction, PostCommitActions};
use crate::scheduler;
use crate::secrets::{self, SecretCipher};
use crate::store::Store;

/// Default timezone for SCHEDULE triggers.
pub const DEFAULT_TIMEZONE: &str = "Asia/Seoul";

/// Chain-graph searches deeper than this fail as cyclic, bounding the
/// worst-case cost of the check.
const MAX_CHAIN_DEPTH: usize = 10;

/// Entry point the cron driver and the integrators fire through.
#[async_trait]
pub trait TriggerFirer: Send + Sync {
    /// Best-effort: never returns an error; every failure mode becomes
    /// a trigger event or a log line.
    async fn fire_trigger(&self, trigger_id: Uuid, params: Value);
}

pub struct TriggerService {
    store: Arc<dyn Store>,
    launcher: Arc<dyn PipelineLauncher>,
    cipher: SecretCipher,
}

impl TriggerService {
    pub fn new(
        store: Arc<dyn Store>,
        launcher: Arc<dyn PipelineLauncher>,
        cipher: SecretCipher,
    ) -> Self {
        Self {
            store,
            launcher,
            cipher,
        }
    }

    /// Create a trigger, validating the per-type config contract.
    ///
    /// For API triggers the returned [`CreatedTrigger`] carries the raw
    /// token; it is not stored and cannot be recovered afterwards.
    pub async fn create_trigger(
        &self,
        req: CreateTrigger,
    ) -> Result<(CreatedTrigger, PostCommitActions)> {
        let _pipeline = self
            .store
            .find_pipeline(req.pipeline_id)
            .await?
            .ok_or(EngineError::PipelineNotFound(req.pipeline_id))?;

        let mut api_token = None;
        let config = match req.trigger_type {
            TriggerType::Schedule => validate_schedule_config(&req.config)?,
            TriggerType::Api => {
                let raw = secrets::generate_token();
                let config = TriggerConfig::Api {
                    token_hash: secrets::hash_token(&raw),
                };
                api_token = Some(raw);
                config
            }
            TriggerType::Webhook => {
                let secret = req.config.get("secret").and_then(Value::as_str);
                let encrypted_secret = match secret {
                    Some(secret) => Some(self.cipher.encrypt(secret)?),
                    None => None,
                };
                TriggerConfig::Webhook {
                    webhook_id: secrets::generate_webhook_id(),
                    encrypted_secret,
                }
            }
            TriggerType::PipelineChain => {
                let config = validate_chain_config(&req.config)?;
                if let TriggerConfig::PipelineChain {
                    upstream_pipeline_id,
                    ..
                } = &config
                {
                    self.ensure_no_chain_cycle(req.pipeline_id, *upstream_pipeline_id)
                        .await?;
                }
                config
            }
            TriggerType::DatasetChange => validate_dataset_change_config(&req.config)?,
        };

        let trigger = Trigger {
            id: Uuid::new_v4(),
            pipeline_id: req.pipeline_id,
            is_enabled: req.is_enabled,
            config,
            state: TriggerState::default(),
            created_by: req.created_by,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_trigger(trigger.clone()).await?;

        tracing::info!(
            "Trigger {} ({:?}) created for pipeline {}",
            trigger.id,
            trigger.trigger_type(),
            trigger.pipeline_id
        );

        let mut actions = PostCommitActions::new();
        if trigger.is_enabled && trigger.trigger_type() == TriggerType::Schedule {
            actions.push(PostCommitAction::RegisterSchedule {
                trigger_id: trigger.id,
            });
        }

        Ok((CreatedTrigger { trigger, api_token }, actions))
    }

    /// Update a trigger. The type is immutable: a supplied config map
    /// is re-validated under the trigger's existing type.
    pub async fn update_trigger(
        &self,
        id: Uuid,
        req: UpdateTrigger,
    ) -> Result<(Trigger, PostCommitActions)> {
        let mut trigger = self
            .store
            .find_trigger(id)
            .await?
            .ok_or(EngineError::TriggerNotFound(id))?;
        let was_live = trigger.is_enabled && trigger.trigger_type() == TriggerType::Schedule;

        if let Some(config) = &req.config {
            trigger.config = match trigger.trigger_type() {
                TriggerType::Schedule => validate_schedule_config(config)?,
                // There is nothing updatable about an API trigger's
                // config; the token hash is kept as-is.
                TriggerType::Api => trigger.config,
                TriggerType::Webhook => {
                    let TriggerConfig::Webhook { webhook_id, encrypted_secret } = trigger.config
                    else {
                        unreachable!("type checked above");
                    };
                    let encrypted_secret = match config.get("secret").and_then(Value::as_str) {
                        Some(secret) => Some(self.cipher.encrypt(secret)?),
                        None => encrypted_secret,
                    };
                    TriggerConfig::Webhook {
                        webhook_id,
                        encrypted_secret,
                    }
                }
                TriggerType::PipelineChain => {
                    let new = validate_chain_config(config)?;
                    if let TriggerConfig::PipelineChain {
                        upstream_pipeline_id,
                        ..
                    } = &new
                    {
                        self.ensure_no_chain_cycle(trigger.pipeline_id, *upstream_pipeline_id)
                            .await?;
                    }
                    new
                }
                TriggerType::DatasetChange => validate_dataset_change_config(config)?,
            };
        }

        if let Some(enabled) = req.is_enabled {
            trigger.is_enabled = enabled;
        }

        self.store.update_trigger(trigger.clone()).await?;

        let mut actions = PostCommitActions::new();
        if trigger.trigger_type() == TriggerType::Schedule {
            if was_live {
                actions.push(PostCommitAction::UnregisterSchedule { trigger_id: id });
            }
            if trigger.is_enabled {
                actions.push(PostCommitAction::RegisterSchedule { trigger_id: id });
            }
        }

        Ok((trigger, actions))
    }

    pub async fn delete_trigger(&self, id: Uuid) -> Result<PostCommitActions> {
        let trigger = self
            .store
            .find_trigger(id)
            .await?
            .ok_or(EngineError::TriggerNotFound(id))?;

        self.store.delete_trigger(id).await?;
        tracing::info!("Trigger {} deleted", id);

        let mut actions = PostCommitActions::new();
        if trigger.trigger_type() == TriggerType::Schedule {
            actions.push(PostCommitAction::UnregisterSchedule { trigger_id: id });
        }
        Ok(actions)
    }

    pub async fn get_trigger(&self, id: Uuid) -> Result<Trigger> {
        self.store
            .find_trigger(id)
            .await?
            .ok_or(EngineError::TriggerNotFound(id))
    }

    // =========================================================================
    // Firing
    // =========================================================================

    /// The single firing entry point; see [`TriggerFirer`].
    ///
    /// The concurrency-policy check and the creation of the Execution
    /// row are not atomic together, so two near-simultaneous fires can
    /// both pass the SKIP check. Single-node best effort, accepted.
    pub async fn fire(&self, trigger_id: Uuid, params: Value) {
        let trigger = match self.store.find_trigger(trigger_id).await {
            Ok(Some(trigger)) => trigger,
            Ok(None) => {
                warn!("Fire requested for unknown trigger {}", trigger_id);
                return;
            }
            Err(e) => {
                error!("Failed to load trigger {}: {}", trigger_id, e);
                return;
            }
        };

        if !trigger.is_enabled {
            debug!("Trigger {} is disabled; ignoring fire", trigger_id);
            return;
        }

        let pipeline_active = match self.store.pipeline_is_active(trigger.pipeline_id).await {
            Ok(active) => active,
            Err(e) => {
                error!(
                    "Failed to check pipeline {} for trigger {}: {}",
                    trigger.pipeline_id, trigger_id, e
                );
                return;
            }
        };
        if !pipeline_active {
            self.record(TriggerEvent::new(
                trigger.id,
                trigger.pipeline_id,
                None,
                TriggerEventType::Skipped,
                "pipeline is inactive",
            ))
            .await;
            return;
        }

        if let TriggerConfig::Schedule {
            concurrency_policy: ConcurrencyPolicy::Skip,
            ..
        } = &trigger.config
        {
            match self.store.has_active_execution(trigger.pipeline_id).await {
                Ok(true) => {
                    self.record(TriggerEvent::new(
                        trigger.id,
                        trigger.pipeline_id,
                        None,
                        TriggerEventType::Skipped,
                        "pipeline already has a pending or running execution",
                    ))
                    .await;
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Concurrency check failed for trigger {}: {}",
                        trigger_id, e
                    );
                    return;
                }
            }
        }

        let origin = run_origin(trigger.trigger_type());
        match self
            .launcher
            .launch(trigger.pipeline_id, origin, Some(trigger.id))
            .await
        {
            Ok(execution_id) => {
                self.record(TriggerEvent::new(
                    trigger.id,
                    trigger.pipeline_id,
                    Some(execution_id),
                    TriggerEventType::Fired,
                    format!("params={}", params),
                ))
                .await;

                let mut state = trigger.state.clone();
                state.last_fired_at = Some(chrono::Utc::now());
                if let Err(e) = self.store.update_trigger_state(trigger.id, state).await {
                    error!(
                        "Failed to update last_fired_at for trigger {}: {}",
                        trigger.id, e
                    );
                }
            }
            Err(e) => {
                self.record(TriggerEvent::new(
                    trigger.id,
                    trigger.pipeline_id,
                    None,
                    TriggerEventType::Error,
                    format!("failed to start execution: {}", e),
                ))
                .await;
            }
        }
    }

    async fn record(&self, event: TriggerEvent) {
        if let Err(e) = self.store.record_event(event).await {
            error!("Failed to record trigger event: {}", e);
        }
    }

    // =========================================================================
    // Inbound adapter lookups
    // =========================================================================

    /// Resolves a raw bearer token to its API trigger via the token's
    /// one-way hash.
    pub async fn resolve_api_token(&self, raw_token: &str) -> Result<Option<Trigger>> {
        let hash = secrets::hash_token(raw_token);
        Ok(self.store.find_trigger_by_token_hash(&hash).await?)
    }

    /// Resolves a public webhook id and verifies the request signature
    /// when the trigger has a secret configured. Returns `None` for an
    /// unknown id or a failed verification.
    pub async fn resolve_webhook(
        &self,
        webhook_id: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<Trigger>> {
        let Some(trigger) = self.store.find_trigger_by_webhook_id(webhook_id).await? else {
            return Ok(None);
        };

        if let TriggerConfig::Webhook {
            encrypted_secret: Some(encrypted),
            ..
        } = &trigger.config
        {
            let secret = self.cipher.decrypt(encrypted)?;
            let verified = signature
                .map(|sig| secrets::verify_signature(secret.as_bytes(), body, sig))
                .unwrap_or(false);
            if !verified {
                warn!("Webhook {} signature verification failed", webhook_id);
                return Ok(None);
            }
        }

        Ok(Some(trigger))
    }

    // =========================================================================
    // Chain cycle detection
    // =========================================================================

    /// Walks the chain graph upward from the proposed upstream: each
    /// pipeline leads to the upstreams of its own enabled chain
    /// triggers. Reaching the trigger's own pipeline means the new
    /// edge would close a cycle; exceeding the depth cap fails too.
    async fn ensure_no_chain_cycle(&self, own_pipeline: Uuid, upstream: Uuid) -> Result<()> {
        if upstream == own_pipeline {
            return Err(EngineError::CyclicTriggerDependency(
                "a chain trigger cannot point at its own pipeline".to_string(),
            ));
        }

        let chain_triggers = self
            .store
            .enabled_triggers_by_type(TriggerType::PipelineChain)
            .await?;

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<(Uuid, usize)> = vec![(upstream, 0)];

        while let Some((pipeline, depth)) = stack.pop() {
            if pipeline == own_pipeline {
                return Err(EngineError::CyclicTriggerDependency(format!(
                    "chaining to pipeline {} would close a cycle",
                    upstream
                )));
            }
            if depth >= MAX_CHAIN_DEPTH {
                return Err(EngineError::CyclicTriggerDependency(format!(
                    "chain graph exceeds the maximum depth of {}",
                    MAX_CHAIN_DEPTH
                )));
            }
            if !visited.insert(pipeline) {
                continue;
            }

            for trigger in chain_triggers.iter().filter(|t| t.pipeline_id == pipeline) {
                if let TriggerConfig::PipelineChain {
                    upstream_pipeline_id,
                    ..
                } = &trigger.config
                {
                    stack.push((*upstream_pipeline_id, depth + 1));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TriggerFirer for TriggerService {
    async fn fire_trigger(&self, trigger_id: Uuid, params: Value) {
        self.fire(trigger_id, params).await;
    }
}

fn run_origin(trigger_type: TriggerType) -> RunOrigin {
    match trigger_type {
        TriggerType::Schedule => RunOrigin::Schedule,
        TriggerType::Api => RunOrigin::Api,
        TriggerType::Webhook => RunOrigin::Webhook,
        TriggerType::PipelineChain => RunOrigin::PipelineChain,
        TriggerType::DatasetChange => RunOrigin::DatasetChange,
    }
}

// =============================================================================
// Per-type config validation
// =============================================================================

fn validate_schedule_config(config: &Value) -> Result<TriggerConfig> {
    let cron = config
        .get("cron")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    if cron.is_empty() {
        return Err(EngineError::InvalidConfig(
            "SCHEDULE triggers require a non-blank 'cron' expression".to_string(),
        ));
    }
    scheduler::parse_schedule(&cron)?;

    let timezone = config
        .get("timezone")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_TIMEZONE)
        .to_string();
    scheduler::parse_timezone(&timezone)?;

    let concurrency_policy = match config.get("concurrency_policy").and_then(Value::as_str) {
        None => ConcurrencyPolicy::Skip,
        Some(raw) => match raw.to_ascii_uppercase().as_str() {
            "SKIP" => ConcurrencyPolicy::Skip,
            "ALLOW" => ConcurrencyPolicy::Allow,
            other => {
                return Err(EngineError::InvalidConfig(format!(
                    "unknown concurrency policy '{}' (expected SKIP or ALLOW)",
                    other
                )));
            }
        },
    };

    Ok(TriggerConfig::Schedule {
        cron,
        timezone,
        concurrency_policy,
    })
}

fn validate_chain_config(config: &Value) -> Result<TriggerConfig> {
    let upstream_pipeline_id = config
        .get("upstream_pipeline_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            EngineError::InvalidConfig(
                "PIPELINE_CHAIN triggers require an 'upstream_pipeline_id'".to_string(),
            )
        })?;

    let condition = match config.get("condition").and_then(Value::as_str) {
        None => ChainCondition::Success,
        Some(raw) => match raw.to_ascii_uppercase().as_str() {
            "SUCCESS" => ChainCondition::Success,
            "FAILURE" => ChainCondition::Failure,
            "ANY" => ChainCondition::Any,
            other => {
                return Err(EngineError::InvalidConfig(format!(
                    "unknown chain condition '{}' (expected SUCCESS, FAILURE or ANY)",
                    other
                )));
            }
        },
    };

    Ok(TriggerConfig::PipelineChain {
        upstream_pipeline_id,
        condition,
    })
}

fn validate_dataset_change_config(config: &Value) -> Result<TriggerConfig> {
    let dataset_ids: Vec<Uuid> = config
        .get("dataset_ids")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        })
        .unwrap_or_default();
    if dataset_ids.is_empty() {
        return Err(EngineError::InvalidConfig(
            "DATASET_CHANGE triggers require a non-empty 'dataset_ids' list".to_string(),
        ));
    }

    let polling_interval_seconds = config
        .get("polling_interval_seconds")
        .and_then(Value::as_u64)
        .unwrap_or(60);
    let debounce_seconds = config
        .get("debounce_seconds")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Ok(TriggerConfig::DatasetChange {
        dataset_ids,
        polling_interval_seconds,
        debounce_seconds,
    })
}

//! Persistence collaborator
//!
//! The engine owns no storage. Everything it persists goes through the
//! [`Store`] trait: CRUD for the six entities plus the graph-shaped
//! queries the trigger subsystem needs. [`MemoryStore`] is the only
//! in-repo implementation, used by the tests and the standalone
//! server wiring.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use sluice_core::domain::event::TriggerEvent;
use sluice_core::domain::execution::{Execution, ExecutionStatus, StepExecution};
use sluice_core::domain::pipeline::{Pipeline, Step};
use sluice_core::domain::trigger::{Trigger, TriggerConfig, TriggerState, TriggerType};

/// Storage-layer error
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait Store: Send + Sync {
    // Pipelines
    async fn insert_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError>;
    async fn update_pipeline(&self, pipeline: Pipeline) -> Result<bool, StoreError>;
    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>, StoreError>;
    async fn pipeline_is_active(&self, id: Uuid) -> Result<bool, StoreError>;

    // Steps
    async fn replace_steps(&self, pipeline_id: Uuid, steps: Vec<Step>) -> Result<(), StoreError>;
    async fn steps_for_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<Step>, StoreError>;

    // Executions
    async fn insert_execution(&self, execution: Execution) -> Result<(), StoreError>;
    async fn update_execution(&self, execution: Execution) -> Result<(), StoreError>;
    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError>;
    /// True when the pipeline has a Pending or Running execution.
    async fn has_active_execution(&self, pipeline_id: Uuid) -> Result<bool, StoreError>;

    // Step executions
    async fn insert_step_execution(&self, row: StepExecution) -> Result<(), StoreError>;
    async fn update_step_execution(&self, row: StepExecution) -> Result<(), StoreError>;
    async fn step_executions_for(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError>;

    // Triggers
    async fn insert_trigger(&self, trigger: Trigger) -> Result<(), StoreError>;
    async fn update_trigger(&self, trigger: Trigger) -> Result<bool, StoreError>;
    async fn delete_trigger(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn find_trigger(&self, id: Uuid) -> Result<Option<Trigger>, StoreError>;
    async fn set_trigger_enabled(&self, id: Uuid, enabled: bool) -> Result<bool, StoreError>;
    async fn update_trigger_state(&self, id: Uuid, state: TriggerState) -> Result<(), StoreError>;
    async fn enabled_triggers_by_type(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, StoreError>;
    /// Enabled PIPELINE_CHAIN triggers whose upstream is the given pipeline.
    async fn enabled_chain_triggers_for_upstream(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Vec<Trigger>, StoreError>;
    async fn find_trigger_by_token_hash(&self, hash: &str)
    -> Result<Option<Trigger>, StoreError>;
    async fn find_trigger_by_webhook_id(
        &self,
        webhook_id: &str,
    ) -> Result<Option<Trigger>, StoreError>;

    // Trigger events (append-only audit log)
    async fn record_event(&self, event: TriggerEvent) -> Result<(), StoreError>;
    async fn events_for_trigger(&self, trigger_id: Uuid) -> Result<Vec<TriggerEvent>, StoreError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    pipelines: HashMap<Uuid, Pipeline>,
    steps: HashMap<Uuid, Vec<Step>>,
    executions: HashMap<Uuid, Execution>,
    step_executions: HashMap<Uuid, StepExecution>,
    triggers: HashMap<Uuid, Trigger>,
    events: Vec<TriggerEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.pipelines.insert(pipeline.id, pipeline);
        Ok(())
    }

    async fn update_pipeline(&self, pipeline: Pipeline) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.pipelines.contains_key(&pipeline.id) {
            return Ok(false);
        }
        inner.pipelines.insert(pipeline.id, pipeline);
        Ok(true)
    }

    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pipelines.get(&id).cloned())
    }

    async fn pipeline_is_active(&self, id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pipelines.get(&id).map(|p| p.is_active).unwrap_or(false))
    }

    async fn replace_steps(&self, pipeline_id: Uuid, steps: Vec<Step>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.steps.insert(pipeline_id, steps);
        Ok(())
    }

    async fn steps_for_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<Step>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.steps.get(&pipeline_id).cloned().unwrap_or_default())
    }

    async fn insert_execution(&self, execution: Execution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn update_execution(&self, execution: Execution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.executions.get(&id).cloned())
    }

    async fn has_active_execution(&self, pipeline_id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.executions.values().any(|e| {
            e.pipeline_id == pipeline_id
                && matches!(e.status, ExecutionStatus::Pending | ExecutionStatus::Running)
        }))
    }

    async fn insert_step_execution(&self, row: StepExecution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.step_executions.insert(row.id, row);
        Ok(())
    }

    async fn update_step_execution(&self, row: StepExecution) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.step_executions.insert(row.id, row);
        Ok(())
    }

    async fn step_executions_for(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .step_executions
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn insert_trigger(&self, trigger: Trigger) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.triggers.insert(trigger.id, trigger);
        Ok(())
    }

    async fn update_trigger(&self, trigger: Trigger) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.triggers.contains_key(&trigger.id) {
            return Ok(false);
        }
        inner.triggers.insert(trigger.id, trigger);
        Ok(true)
    }

    async fn delete_trigger(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.triggers.remove(&id).is_some())
    }

    async fn find_trigger(&self, id: Uuid) -> Result<Option<Trigger>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.triggers.get(&id).cloned())
    }

    async fn set_trigger_enabled(&self, id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.triggers.get_mut(&id) {
            Some(trigger) => {
                trigger.is_enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_trigger_state(&self, id: Uuid, state: TriggerState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(trigger) = inner.triggers.get_mut(&id) {
            trigger.state = state;
        }
        Ok(())
    }

    async fn enabled_triggers_by_type(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .triggers
            .values()
            .filter(|t| t.is_enabled && t.trigger_type() == trigger_type)
            .cloned()
            .collect())
    }

    async fn enabled_chain_triggers_for_upstream(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Vec<Trigger>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .triggers
            .values()
            .filter(|t| {
                t.is_enabled
                    && matches!(
                        &t.config,
                        TriggerConfig::PipelineChain { upstream_pipeline_id, .. }
                            if *upstream_pipeline_id == pipeline_id
                    )
            })
            .cloned()
            .collect())
    }

    async fn find_trigger_by_token_hash(
        &self,
        hash: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .triggers
            .values()
            .find(|t| {
                matches!(&t.config, TriggerConfig::Api { token_hash } if token_hash == hash)
            })
            .cloned())
    }

    async fn find_trigger_by_webhook_id(
        &self,
        webhook_id: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .triggers
            .values()
            .find(|t| {
                matches!(&t.config, TriggerConfig::Webhook { webhook_id: id, .. } if id == webhook_id)
            })
            .cloned())
    }

    async fn record_event(&self, event: TriggerEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(event);
        Ok(())
    }

    async fn events_for_trigger(&self, trigger_id: Uuid) -> Result<Vec<TriggerEvent>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.trigger_id == trigger_id)
            .cloned()
            .collect())
    }
}

//! Chain integrator
//!
//! Listens for pipeline completions and fires downstream PIPELINE_CHAIN
//! triggers whose condition matches the reported status. Runs on its
//! own task, decoupled from the upstream run's completion handling, so
//! a misbehaving downstream trigger cannot touch the upstream result.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use sluice_core::domain::event::PipelineCompleted;
use sluice_core::domain::execution::ExecutionStatus;
use sluice_core::domain::trigger::{ChainCondition, TriggerConfig};

use crate::store::Store;
use crate::trigger::TriggerFirer;

pub struct ChainListener {
    store: Arc<dyn Store>,
    firer: Arc<dyn TriggerFirer>,
}

impl ChainListener {
    pub fn new(store: Arc<dyn Store>, firer: Arc<dyn TriggerFirer>) -> Self {
        Self { store, firer }
    }

    /// Consumes completion events until the bus closes.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<PipelineCompleted>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.on_completion(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Chain listener lagged; {} completion event(s) dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn on_completion(&self, event: PipelineCompleted) {
        let triggers = match self
            .store
            .enabled_chain_triggers_for_upstream(event.pipeline_id)
            .await
        {
            Ok(triggers) => triggers,
            Err(e) => {
                error!(
                    "Failed to load chain triggers for pipeline {}: {}",
                    event.pipeline_id, e
                );
                return;
            }
        };

        for trigger in triggers {
            let TriggerConfig::PipelineChain { condition, .. } = &trigger.config else {
                continue;
            };

            if condition_matches(*condition, event.status) {
                debug!(
                    "Chain trigger {} matched upstream execution {}",
                    trigger.id, event.execution_id
                );
                self.firer
                    .fire_trigger(
                        trigger.id,
                        serde_json::json!({
                            "upstream_execution_id": event.execution_id
                        }),
                    )
                    .await;
            }
        }
    }
}

fn condition_matches(condition: ChainCondition, status: ExecutionStatus) -> bool {
    match condition {
        ChainCondition::Success => status == ExecutionStatus::Completed,
        ChainCondition::Failure => status == ExecutionStatus::Failed,
        ChainCondition::Any => {
            matches!(status, ExecutionStatus::Completed | ExecutionStatus::Failed)
        }
    }
}

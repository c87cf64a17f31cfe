//! Pipeline service
//!
//! Create/update of pipelines and their step lists. The step DAG is
//! validated on every create and on every update that supplies steps;
//! dependency names are resolved to step ids at save time.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use sluice_core::domain::pipeline::{Pipeline, Step};
use sluice_core::dto::pipeline::{CreatePipeline, CreateStep, UpdatePipeline};

use crate::dag::validate_dag;
use crate::error::{EngineError, Result};
use crate::store::Store;

#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn Store>,
}

impl PipelineService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a new pipeline with its steps.
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<Pipeline> {
        validate_pipeline_request(&req)?;
        validate_dag(&req.steps)?;

        let now = chrono::Utc::now();
        let pipeline = Pipeline {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            is_active: req.is_active,
            created_by: req.created_by,
            created_at: now,
            updated_at: now,
        };

        let steps = resolve_steps(pipeline.id, &req.steps);

        self.store.insert_pipeline(pipeline.clone()).await?;
        self.store.replace_steps(pipeline.id, steps).await?;

        tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);

        Ok(pipeline)
    }

    /// Update a pipeline; a supplied step list replaces the old one.
    pub async fn update_pipeline(&self, id: Uuid, req: UpdatePipeline) -> Result<Pipeline> {
        let mut pipeline = self
            .store
            .find_pipeline(id)
            .await?
            .ok_or(EngineError::PipelineNotFound(id))?;

        if let Some(steps) = &req.steps {
            validate_dag(steps)?;
        }

        if let Some(name) = req.name {
            if name.trim().is_empty() {
                return Err(EngineError::InvalidConfig(
                    "pipeline name cannot be empty".to_string(),
                ));
            }
            pipeline.name = name;
        }
        if let Some(description) = req.description {
            pipeline.description = Some(description);
        }
        if let Some(is_active) = req.is_active {
            pipeline.is_active = is_active;
        }
        pipeline.updated_at = chrono::Utc::now();

        self.store.update_pipeline(pipeline.clone()).await?;

        if let Some(steps) = &req.steps {
            let resolved = resolve_steps(id, steps);
            self.store.replace_steps(id, resolved).await?;
        }

        Ok(pipeline)
    }

    pub async fn get_pipeline(&self, id: Uuid) -> Result<Pipeline> {
        self.store
            .find_pipeline(id)
            .await?
            .ok_or(EngineError::PipelineNotFound(id))
    }
}

/// Assigns step ids and resolves dependency names.
///
/// A name that matches no step in the submitted list is dropped with a
/// warning rather than rejected; whether that typo-tolerance is a
/// feature is an open question, so the behavior is kept as-is.
fn resolve_steps(pipeline_id: Uuid, proposed: &[CreateStep]) -> Vec<Step> {
    let ids: Vec<Uuid> = proposed.iter().map(|_| Uuid::new_v4()).collect();
    let id_by_name: HashMap<&str, Uuid> = proposed
        .iter()
        .zip(&ids)
        .map(|(s, id)| (s.name.as_str(), *id))
        .collect();

    proposed
        .iter()
        .zip(&ids)
        .map(|(s, id)| {
            let depends_on = s
                .depends_on
                .iter()
                .filter_map(|name| {
                    let resolved = id_by_name.get(name.as_str()).copied();
                    if resolved.is_none() {
                        warn!(
                            "Step '{}' depends on unknown step '{}'; dropping the edge",
                            s.name, name
                        );
                    }
                    resolved
                })
                .collect();

            Step {
                id: *id,
                pipeline_id,
                name: s.name.clone(),
                script_type: s.script_type,
                payload: s.payload.clone(),
                output_dataset_id: s.output_dataset_id,
                load_strategy: s.load_strategy.clone(),
                depends_on,
            }
        })
        .collect()
}

// =============================================================================
// Validation
// =============================================================================

fn validate_pipeline_request(req: &CreatePipeline) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(EngineError::InvalidConfig(
            "pipeline name cannot be empty".to_string(),
        ));
    }

    if req.name.len() > 255 {
        return Err(EngineError::InvalidConfig(
            "pipeline name is too long (max 255 characters)".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for step in &req.steps {
        if step.name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "step name cannot be empty".to_string(),
            ));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(EngineError::InvalidConfig(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
    }

    Ok(())
}

//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management and manual runs.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sluice_core::domain::execution::{Execution, RunOrigin, StepExecution};
use sluice_core::domain::pipeline::Pipeline;
use sluice_core::dto::pipeline::{CreatePipeline, UpdatePipeline};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /pipeline/create
/// Create a new pipeline
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Creating pipeline: {}", req.name);

    let pipeline = state.pipelines.create_pipeline(req).await?;
    Ok(Json(pipeline))
}

/// PUT /pipeline/{id}
/// Update a pipeline, optionally replacing its steps
pub async fn update_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePipeline>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Updating pipeline: {}", id);

    let pipeline = state.pipelines.update_pipeline(id, req).await?;
    Ok(Json(pipeline))
}

/// GET /pipeline/{id}
/// Get pipeline by ID
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    let pipeline = state.pipelines.get_pipeline(id).await?;
    Ok(Json(pipeline))
}

#[derive(Debug, Deserialize, Default)]
pub struct RunPipeline {
    pub requested_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunStarted {
    pub execution_id: Uuid,
}

/// POST /pipeline/{id}/run
/// Start a manual run; returns immediately with the execution id
pub async fn run_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RunPipeline>,
) -> ApiResult<Json<RunStarted>> {
    tracing::info!("Manual run requested for pipeline: {}", id);

    let execution_id = state
        .runner
        .start(id, req.requested_by, RunOrigin::Manual, None)
        .await?;
    Ok(Json(RunStarted { execution_id }))
}

#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: Execution,
    pub steps: Vec<StepExecution>,
}

/// GET /execution/{id}
/// Get an execution with its per-step results
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionDetail>> {
    tracing::debug!("Getting execution: {}", id);

    let execution = state
        .store
        .find_execution(id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Execution {} not found", id)))?;
    let steps = state
        .store
        .step_executions_for(id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(ExecutionDetail { execution, steps }))
}

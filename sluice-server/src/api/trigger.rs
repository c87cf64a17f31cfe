//! Trigger API Handlers
//!
//! HTTP endpoints for trigger management. Every mutation flushes the
//! service's post-commit actions into the cron driver after the store
//! write has succeeded, so live schedules track the rows.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use sluice_core::domain::trigger::Trigger;
use sluice_core::dto::trigger::{CreateTrigger, CreatedTrigger, UpdateTrigger};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /trigger/create
/// Create a trigger; an API trigger's plaintext token appears only in
/// this response
pub async fn create_trigger(
    State(state): State<AppState>,
    Json(req): Json<CreateTrigger>,
) -> ApiResult<Json<CreatedTrigger>> {
    tracing::info!(
        "Creating {:?} trigger for pipeline {}",
        req.trigger_type,
        req.pipeline_id
    );

    let (created, actions) = state.triggers.create_trigger(req).await?;
    actions.flush(&state.cron).await;
    Ok(Json(created))
}

/// PUT /trigger/{id}
/// Update a trigger's config and/or enabled flag
pub async fn update_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTrigger>,
) -> ApiResult<Json<Trigger>> {
    tracing::info!("Updating trigger: {}", id);

    let (trigger, actions) = state.triggers.update_trigger(id, req).await?;
    actions.flush(&state.cron).await;
    Ok(Json(trigger))
}

#[derive(Debug, serde::Deserialize)]
pub struct SetEnabled {
    pub enabled: bool,
}

/// POST /trigger/{id}/enabled
/// Enable or disable a trigger without touching its config
pub async fn set_trigger_enabled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetEnabled>,
) -> ApiResult<Json<Trigger>> {
    tracing::info!("Setting trigger {} enabled = {}", id, req.enabled);

    let update = UpdateTrigger {
        is_enabled: Some(req.enabled),
        config: None,
    };
    let (trigger, actions) = state.triggers.update_trigger(id, update).await?;
    actions.flush(&state.cron).await;
    Ok(Json(trigger))
}

/// DELETE /trigger/{id}
pub async fn delete_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting trigger: {}", id);

    let actions = state.triggers.delete_trigger(id).await?;
    actions.flush(&state.cron).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /trigger/{id}
pub async fn get_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Trigger>> {
    tracing::debug!("Getting trigger: {}", id);

    let trigger = state.triggers.get_trigger(id).await?;
    Ok(Json(trigger))
}

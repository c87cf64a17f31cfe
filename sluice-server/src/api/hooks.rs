//! Inbound trigger endpoints
//!
//! The two externally-facing fire paths: token-authenticated API
//! triggers and signed webhooks. Both resolve the credential to a
//! trigger, hand off to the firing engine, and return 202 without
//! waiting for the run.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
};
use serde_json::{Value, json};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

pub const SIGNATURE_HEADER: &str = "x-sluice-signature";

/// POST /hooks/api
/// Fire an API trigger; authenticated by `Authorization: Bearer <token>`
pub async fn fire_api_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let trigger = state
        .triggers
        .resolve_api_token(token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))?;

    let params = parse_params(&body);
    state.triggers.fire(trigger.id, params).await;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

/// POST /hooks/webhook/{webhook_id}
/// Fire a webhook trigger; verified against the trigger's shared
/// secret when one is configured
pub async fn fire_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let trigger = state
        .triggers
        .resolve_webhook(&webhook_id, &body, signature)
        .await?
        .ok_or_else(|| {
            // Unknown id and bad signature are indistinguishable to the
            // caller.
            ApiError::Unauthorized("Unknown webhook or invalid signature".to_string())
        })?;

    let params = parse_params(&body);
    state.triggers.fire(trigger.id, params).await;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

fn parse_params(body: &Bytes) -> Value {
    if body.is_empty() {
        return json!({});
    }
    serde_json::from_slice(body).unwrap_or_else(|_| json!({}))
}

//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod hooks;
pub mod pipeline;
pub mod trigger;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use sluice_engine::execution::ExecutionRunner;
use sluice_engine::pipeline::PipelineService;
use sluice_engine::scheduler::CronDriver;
use sluice_engine::store::Store;
use sluice_engine::trigger::TriggerService;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipelines: Arc<PipelineService>,
    pub triggers: Arc<TriggerService>,
    pub runner: ExecutionRunner,
    pub cron: Arc<CronDriver>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipeline/create", post(pipeline::create_pipeline))
        .route("/pipeline/{id}", get(pipeline::get_pipeline))
        .route("/pipeline/{id}", put(pipeline::update_pipeline))
        .route("/pipeline/{id}/run", post(pipeline::run_pipeline))
        .route("/execution/{id}", get(pipeline::get_execution))
        // Trigger management
        .route("/trigger/create", post(trigger::create_trigger))
        .route("/trigger/{id}", get(trigger::get_trigger))
        .route("/trigger/{id}", put(trigger::update_trigger))
        .route("/trigger/{id}", delete(trigger::delete_trigger))
        .route("/trigger/{id}/enabled", post(trigger::set_trigger_enabled))
        // Inbound fire paths
        .route("/hooks/api", post(hooks::fire_api_trigger))
        .route("/hooks/webhook/{webhook_id}", post(hooks::fire_webhook))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

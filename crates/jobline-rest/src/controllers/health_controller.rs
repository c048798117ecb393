//! Health check controller.

use crate::state::AppState;
use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Application version.
    pub version: String,
    /// Jobs currently running.
    pub active_runs: usize,
    /// Jobs waiting on a backoff retry.
    pub pending_retries: usize,
    /// Connected subscribers.
    pub subscribers: usize,
}

/// Creates the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let engine = &state.engine;
    Json(HealthResponse {
        status: if engine.is_shutting_down() {
            "shutting_down".to_string()
        } else {
            "healthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_runs: engine.active_runs().len(),
        pending_retries: engine.pending_retries().len(),
        subscribers: engine.subscriber_count(),
    })
}

/// Readiness check endpoint. Not ready once shutdown has begun.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

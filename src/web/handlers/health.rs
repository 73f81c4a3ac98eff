//! Health check HTTP handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::web::{
    AppState,
    responses::{HealthResponse, ok},
};

/// Health check endpoint
///
/// Reports version, uptime and how many providers are registered. The service
/// has no backing store, so it is healthy whenever it can answer.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.start_time;
    ok(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.source_service.provider_count(),
        uptime_seconds: uptime.num_seconds(),
    })
}

/// Kubernetes liveness probe
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

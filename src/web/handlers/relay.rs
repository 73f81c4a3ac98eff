//! Relay handlers
//!
//! `GET`/`HEAD /api/v1/relay?d=...&s=...[&headers=...]` and its CORS preflight.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};

use crate::proxy::{RelayQuery, relay::preflight_response};
use crate::web::AppState;

pub async fn relay_stream(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
    headers: HeaderMap,
) -> Response {
    state.relay_service.relay(&query, &headers).await
}

pub async fn relay_preflight() -> Response {
    preflight_response()
}

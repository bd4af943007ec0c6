// src/routes/health.rs
//! Liveness endpoint for the telemetry service.
//!
//! `GET /health` answers as long as the HTTP server runs and reports
//! whether the realtime feed subscription is currently open, so a
//! container orchestrator can tell a live-but-deaf service apart.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize, serde::Deserialize, PartialEq)]
struct HealthResponse {
    status: String,
    feed_subscribed: bool,
    readings: usize,
}

/// Handle `GET /health`.
async fn health(State((aggregator, _)): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        feed_subscribed: aggregator.is_subscribed(),
        readings: aggregator.series_len(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

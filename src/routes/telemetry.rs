use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::AppState;
use crate::TimeWindow;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/telemetry/view", get(view))
        .route("/api/telemetry/latest", get(latest))
        .route("/api/telemetry/dashboard", get(dashboard))
        .route("/api/telemetry/window", get(current_window).put(select_window))
}

/// Moisture chart for the active window.
async fn view(State((aggregator, _)): State<AppState>) -> impl IntoResponse {
    // ---
    let view = aggregator.filtered_view();
    debug!(
        "GET /api/telemetry/view - {} point(s) in {}",
        view.values.len(),
        view.window
    );
    Json(view)
}

async fn latest(State((aggregator, _)): State<AppState>) -> impl IntoResponse {
    Json(aggregator.latest())
}

async fn dashboard(State((aggregator, _)): State<AppState>) -> impl IntoResponse {
    Json(aggregator.dashboard())
}

/// Body of `PUT /api/telemetry/window`.
#[derive(Debug, Deserialize)]
pub struct WindowRequest {
    window: String,
}

/// Active window after a selection, and whether the selection took.
#[derive(Debug, Serialize, Deserialize)]
pub struct WindowResponse {
    window: TimeWindow,
    applied: bool,
}

/// Body of `GET /api/telemetry/window`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentWindow {
    window: TimeWindow,
}

async fn current_window(State((aggregator, _)): State<AppState>) -> impl IntoResponse {
    Json(CurrentWindow {
        window: aggregator.window(),
    })
}

async fn select_window(
    State((aggregator, _)): State<AppState>,
    Json(request): Json<WindowRequest>,
) -> impl IntoResponse {
    // ---
    let applied = aggregator.set_window_token(&request.window);
    let window = aggregator.window();
    info!(
        "PUT /api/telemetry/window - '{}' applied={} active={}",
        request.window, applied, window
    );

    // Unknown tokens are not an error; the window just stays put.
    (StatusCode::OK, Json(WindowResponse { window, applied }))
}

// src/routes/monitor.rs
//! Write side of the in-process realtime store.
//!
//! The irrigation controller posts its monitor document here when the
//! service hosts the store itself. The document is published at the
//! aggregator's feed path and reaches it through the normal subscription,
//! exactly as a remote store would deliver it. With a remote store
//! configured the controller writes there instead and this route answers
//! `503`.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::AppState;

#[derive(Serialize)]
struct PublishResponse {
    delivered: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/monitor", post(publish))
}

async fn publish(
    State((aggregator, store)): State<AppState>,
    Json(document): Json<Value>,
) -> impl IntoResponse {
    // ---
    let Some(store) = store else {
        warn!("POST /api/monitor - realtime store is remote, rejecting write");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json("Realtime store is external"),
        )
            .into_response();
    };

    let path = &aggregator.options().feed_path;
    let payload = (!document.is_null()).then_some(document);
    let delivered = store.publish(path, payload);
    debug!("POST /api/monitor - delivered to {} subscriber(s)", delivered);

    (StatusCode::ACCEPTED, Json(PublishResponse { delivered })).into_response()
}

//! Route gateway for the telemetry API.
//!
//! Each sibling module exports a subrouter over the shared application
//! state; this module merges them and binds the state once.

use axum::Router;

use crate::{ChannelSource, TelemetryAggregator};

mod health;
mod monitor;
mod telemetry;

/// Shared by every handler: the aggregator, and the in-process realtime
/// store when the service hosts one.
pub type AppState = (TelemetryAggregator, Option<ChannelSource>);

// ---

pub fn router(aggregator: TelemetryAggregator, store: Option<ChannelSource>) -> Router {
    // ---
    Router::new()
        .merge(telemetry::router())
        .merge(monitor::router())
        .merge(health::router())
        .with_state((aggregator, store))
}

#[cfg(test)]
pub(crate) async fn spawn_test_server(app: Router) -> String {
    // ---
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

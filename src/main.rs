//! Application entry point for the `garden-telemetry` service.
//!
//! This binary runs the live sensor backend of the garden dashboard:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the realtime store, remote or in-process
//! - Subscribing the telemetry aggregator to the monitor document
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Serving until Ctrl-C, then releasing the feed subscription
//!
//! # Environment Variables
//! - `REALTIME_DB_URL` (optional) – remote realtime database base URL
//! - `FEED_PATH`, `FEED_POLL_MS`, `PUMP_TRIGGER`, `LABEL_UTC_OFFSET_MINUTES`,
//!   `PORT` (optional) – see `config`
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating configuration parsing to `config`, store access to `feed`,
//! series state to `aggregator`, and route registration to `routes`.
use std::{env, net::SocketAddr};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod aggregator;
mod config;
mod feed;
mod models;
mod routes;

// Re-exported for routes/*.rs and config.rs, which only know their parent
// module (main.rs) and not each other.
pub use aggregator::{AggregatorOptions, TelemetryAggregator};
pub use feed::{ChannelSource, HttpPollSource};
pub use models::TimeWindow;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let aggregator = TelemetryAggregator::new(cfg.aggregator_options()?);

    // Either the service hosts the store and exposes its write side, or it
    // reads a remote one.
    let local_store = match &cfg.realtime_db_url {
        Some(url) => {
            let remote = HttpPollSource::new(url.clone(), cfg.poll_interval());
            aggregator.start(&remote)?;
            None
        }
        None => {
            let store = ChannelSource::new();
            aggregator.start(&store)?;
            Some(store)
        }
    };

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(aggregator.clone(), local_store);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    aggregator.stop();
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// Called once at startup, before any logging macro runs.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

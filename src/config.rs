//! Configuration loader for the `garden-telemetry` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller), so `env::var` calls do not spread through the
//! codebase.
//!
use std::{env, time::Duration};

use anyhow::{anyhow, Result};
use chrono::FixedOffset;

use crate::AggregatorOptions;

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable, treating blank as unset.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name).ok().filter(|v| !v.trim().is_empty())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Remote realtime database base URL. `None` hosts the store in-process.
    pub realtime_db_url: Option<String>,

    /// Document path the dashboard subscribes to.
    pub feed_path: String,

    /// Poll interval for the remote realtime database, in milliseconds.
    pub feed_poll_ms: u64,

    /// Pump threshold percentage shown on the dashboard.
    pub pump_trigger: u32,

    /// Offset from UTC used for chart labels, in minutes.
    pub label_utc_offset_minutes: i32,

    /// HTTP listen port.
    pub port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `REALTIME_DB_URL` – remote realtime database (default: in-process store)
/// - `FEED_PATH` – subscribed document path (default: `monitor`)
/// - `FEED_POLL_MS` – remote poll interval (default: 2000)
/// - `PUMP_TRIGGER` – pump threshold percentage (default: 30)
/// - `LABEL_UTC_OFFSET_MINUTES` – chart label offset (default: 0)
/// - `PORT` – HTTP port (default: 8080)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let realtime_db_url = optional_env!("REALTIME_DB_URL");
    let feed_path = optional_env!("FEED_PATH").unwrap_or_else(|| "monitor".to_string());
    let feed_poll_ms = parse_env!("FEED_POLL_MS", u64, 2000);
    let pump_trigger = parse_env!("PUMP_TRIGGER", u32, 30);
    let label_utc_offset_minutes = parse_env!("LABEL_UTC_OFFSET_MINUTES", i32, 0);
    let port = parse_env!("PORT", u16, 8080);

    let cfg = Config {
        realtime_db_url,
        feed_path,
        feed_poll_ms,
        pump_trigger,
        label_utc_offset_minutes,
        port,
    };
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    // ---
    fn validate(&self) -> Result<()> {
        // ---
        if self.feed_poll_ms == 0 {
            return Err(anyhow!("FEED_POLL_MS must be greater than zero"));
        }
        if self.pump_trigger > 100 {
            return Err(anyhow!(
                "PUMP_TRIGGER must be a percentage, got {}",
                self.pump_trigger
            ));
        }
        self.label_offset()?;
        Ok(())
    }

    pub fn label_offset(&self) -> Result<FixedOffset> {
        self.label_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                anyhow!(
                    "LABEL_UTC_OFFSET_MINUTES out of range: {}",
                    self.label_utc_offset_minutes
                )
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed_poll_ms)
    }

    pub fn aggregator_options(&self) -> Result<AggregatorOptions> {
        Ok(AggregatorOptions {
            feed_path: self.feed_path.clone(),
            label_offset: self.label_offset()?,
            pump_trigger: self.pump_trigger,
        })
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the query string of the realtime database URL, which is where
    /// its auth token travels.
    pub fn log_config(&self) {
        // ---
        let realtime = self
            .realtime_db_url
            .as_deref()
            .map(mask_query)
            .unwrap_or_else(|| "(in-process)".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  REALTIME_DB_URL          : {}", realtime);
        tracing::info!("  FEED_PATH                : {}", self.feed_path);
        tracing::info!("  FEED_POLL_MS             : {}", self.feed_poll_ms);
        tracing::info!("  PUMP_TRIGGER             : {}", self.pump_trigger);
        tracing::info!("  LABEL_UTC_OFFSET_MINUTES : {}", self.label_utc_offset_minutes);
        tracing::info!("  PORT                     : {}", self.port);
    }
}

fn mask_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?****", base),
        None => url.to_string(),
    }
}

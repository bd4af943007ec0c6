//! Data models for the garden telemetry service.

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ---

/// Document pushed by the realtime store at the `monitor` path.
///
/// Field names follow the irrigation controller firmware, which writes
/// this document on every sensor cycle.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorPayload {
    // ---
    #[serde(rename = "SoilMoisture")]
    pub soil_moisture: f64,
    #[serde(rename = "temp")]
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "pumpStatus")]
    pub pump_status: bool,
}

impl MonitorPayload {
    // ---
    /// Decode and validate a raw feed document.
    ///
    /// Returns `None` for anything that is not a usable sample: a JSON
    /// `null`, a missing or mistyped field, a non-finite number, or a
    /// percentage outside `[0, 100]`.
    pub fn from_value(value: &Value) -> Option<Self> {
        // ---
        if value.is_null() {
            return None;
        }
        let payload: MonitorPayload = match serde_json::from_value(value.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Dropping monitor payload: {}", e);
                return None;
            }
        };

        for (field, v) in [
            ("SoilMoisture", payload.soil_moisture),
            ("humidity", payload.humidity),
        ] {
            if !(v.is_finite() && (0.0..=100.0).contains(&v)) {
                debug!("Dropping monitor payload: {} out of range ({})", field, v);
                return None;
            }
        }
        if !payload.temperature.is_finite() {
            debug!("Dropping monitor payload: temp is not finite");
            return None;
        }
        Some(payload)
    }

    pub fn to_reading(&self, timestamp: DateTime<Utc>) -> Reading {
        // ---
        Reading {
            timestamp,
            moisture: self.soil_moisture,
            temperature: self.temperature,
            humidity: self.humidity,
            pump_on: self.pump_status,
        }
    }
}

/// One sensor sample, stamped with its local ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    // ---
    pub timestamp: DateTime<Utc>,
    pub moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pump_on: bool,
}

/// The most recently ingested scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatestSnapshot {
    // ---
    pub moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pump_on: bool,
}

impl Default for LatestSnapshot {
    fn default() -> Self {
        // Gauge values shown before the first sample arrives.
        Self {
            moisture: 0.0,
            temperature: -10.0,
            humidity: 0.0,
            pump_on: false,
        }
    }
}

impl From<&Reading> for LatestSnapshot {
    fn from(r: &Reading) -> Self {
        Self {
            moisture: r.moisture,
            temperature: r.temperature,
            humidity: r.humidity,
            pump_on: r.pump_on,
        }
    }
}

/// Lookback selector for the moisture chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeWindow {
    // ---
    #[default]
    #[serde(rename = "1H")]
    OneHour,
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "7D")]
    SevenDays,
    #[serde(rename = "15D")]
    FifteenDays,
}

impl TimeWindow {
    // ---
    /// The longest selectable window; bounds how much history is kept.
    pub const LONGEST: TimeWindow = TimeWindow::FifteenDays;

    pub fn duration(self) -> Duration {
        match self {
            TimeWindow::OneHour => Duration::hours(1),
            TimeWindow::OneDay => Duration::days(1),
            TimeWindow::SevenDays => Duration::days(7),
            TimeWindow::FifteenDays => Duration::days(15),
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            TimeWindow::OneHour => "1H",
            TimeWindow::OneDay => "1D",
            TimeWindow::SevenDays => "7D",
            TimeWindow::FifteenDays => "15D",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for TimeWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1H" => Ok(TimeWindow::OneHour),
            "1D" => Ok(TimeWindow::OneDay),
            "7D" => Ok(TimeWindow::SevenDays),
            "15D" => Ok(TimeWindow::FifteenDays),
            other => Err(anyhow!("Unknown time window '{}'", other)),
        }
    }
}

/// Window-filtered moisture series shaped as parallel chart arrays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredView {
    // ---
    pub window: TimeWindow,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

/// Two-slice doughnut dataset: the reading and the remainder of its scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gauge {
    // ---
    pub value: f64,
    pub data: [f64; 2],
}

impl Gauge {
    pub fn with_scale(value: f64, full_scale: f64) -> Self {
        Self {
            value,
            data: [value, full_scale - value],
        }
    }
}

/// Everything a single dashboard render pass consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardFrame {
    // ---
    pub chart: FilteredView,
    pub latest: LatestSnapshot,
    pub moisture_gauge: Gauge,
    pub temperature_gauge: Gauge,
    pub humidity_gauge: Gauge,
    pub pump_on: bool,
    pub pump_trigger: u32,
}

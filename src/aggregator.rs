//! Telemetry series aggregator.
//!
//! Owns the in-memory history of sensor readings for the dashboard,
//! the latest scalar values and the selected chart window. Readings
//! arrive through a [`RealtimeSource`] subscription opened by
//! [`TelemetryAggregator::start`] and released by
//! [`TelemetryAggregator::stop`].
//!
//! The aggregator is a cheap handle: clones share the same state, so the
//! feed task and every HTTP handler see one series. The feed task is the
//! only writer of the series; nothing awaits while the state lock is held.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::feed::RealtimeSource;
use crate::models::{
    DashboardFrame, FilteredView, Gauge, LatestSnapshot, MonitorPayload, Reading, TimeWindow,
};

// ---

/// Source of "now" for timestamps and window bounds.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tunables for ingestion and presentation.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    // ---
    /// Realtime store document the aggregator subscribes to.
    pub feed_path: String,

    /// Offset applied when rendering chart labels.
    pub label_offset: FixedOffset,

    /// Pump threshold percentage shown on the dashboard.
    pub pump_trigger: u32,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            feed_path: "monitor".to_string(),
            label_offset: Utc.fix(),
            pump_trigger: 30,
        }
    }
}

/// Live feed subscription; aborting the task releases the feed receiver.
struct Subscription {
    // ---
    id: Uuid,
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct State {
    // ---
    series: VecDeque<Reading>,
    latest: LatestSnapshot,
    window: TimeWindow,
    subscription: Option<Subscription>,
}

impl State {
    // ---
    fn ingest(&mut self, raw: Option<&Value>, now: DateTime<Utc>) -> bool {
        // ---
        let Some(payload) = raw.and_then(MonitorPayload::from_value) else {
            debug!("Ignoring absent or malformed monitor payload");
            return false;
        };

        let reading = payload.to_reading(now);
        self.latest = LatestSnapshot::from(&reading);
        self.series.push_back(reading);

        // Anything older than the longest window can never be displayed.
        let horizon = now - TimeWindow::LONGEST.duration();
        while self
            .series
            .front()
            .is_some_and(|oldest| oldest.timestamp < horizon)
        {
            self.series.pop_front();
        }

        trace!(
            "Ingested reading, series length {}, moisture {}",
            self.series.len(),
            self.latest.moisture
        );
        true
    }

    /// Ingest a delivery from the subscription `id`.
    ///
    /// Returns `false`, changing nothing, once `id` is no longer the
    /// active subscription.
    fn deliver(&mut self, id: Uuid, raw: Option<&Value>, now: DateTime<Utc>) -> bool {
        // ---
        if self.subscription.as_ref().map(|s| s.id) != Some(id) {
            debug!("Dropping delivery from stale subscription {}", id);
            return false;
        }
        self.ingest(raw, now);
        true
    }
}

/// Shared handle to the dashboard's telemetry state.
#[derive(Clone)]
pub struct TelemetryAggregator {
    // ---
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    options: AggregatorOptions,
}

impl TelemetryAggregator {
    // ---
    pub fn new(options: AggregatorOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: AggregatorOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            options,
        }
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to the configured feed path on `source`.
    ///
    /// Each delivered document is ingested as by [`Self::on_update`]. A
    /// second call while subscribed does nothing. Fails outside a tokio
    /// runtime or when the source refuses the subscription.
    pub fn start(&self, source: &dyn RealtimeSource) -> Result<()> {
        // ---
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("Feed subscription needs a tokio runtime: {}", e))?;

        let mut state = self.lock();
        if let Some(sub) = &state.subscription {
            debug!("Already subscribed ({}), ignoring start", sub.id);
            return Ok(());
        }

        let mut rx = source.subscribe(&self.options.feed_path)?;
        let id = Uuid::new_v4();
        let weak: Weak<Mutex<State>> = Arc::downgrade(&self.state);
        let clock = Arc::clone(&self.clock);

        let task = runtime.spawn(async move {
            while let Some(raw) = rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);

                // A delivery racing with `stop` must not touch the series.
                if !state.deliver(id, raw.as_ref(), clock.now()) {
                    break;
                }
            }
            debug!("Feed task {} finished", id);
        });

        info!("Subscribed to '{}' ({})", self.options.feed_path, id);
        state.subscription = Some(Subscription { id, task });
        Ok(())
    }

    /// Release the feed subscription. Further calls are no-ops.
    ///
    /// The series is kept.
    pub fn stop(&self) {
        // ---
        let released = self.lock().subscription.take();
        if let Some(sub) = released {
            info!("Unsubscribed from '{}' ({})", self.options.feed_path, sub.id);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock().subscription.is_some()
    }

    /// Ingest one feed document, stamped with the current time.
    ///
    /// Returns `false`, leaving all state untouched, when the document is
    /// absent or malformed.
    pub fn on_update(&self, raw: Option<&Value>) -> bool {
        let now = self.clock.now();
        self.lock().ingest(raw, now)
    }

    pub fn set_window(&self, window: TimeWindow) {
        let mut state = self.lock();
        if state.window != window {
            debug!("Chart window {} -> {}", state.window, window);
        }
        state.window = window;
    }

    /// Select the window named by `token`; unknown tokens change nothing.
    pub fn set_window_token(&self, token: &str) -> bool {
        // ---
        match token.parse::<TimeWindow>() {
            Ok(window) => {
                self.set_window(window);
                true
            }
            Err(e) => {
                debug!("{}; keeping current window", e);
                false
            }
        }
    }

    pub fn window(&self) -> TimeWindow {
        self.lock().window
    }

    pub fn latest(&self) -> LatestSnapshot {
        self.lock().latest
    }

    pub fn series_len(&self) -> usize {
        self.lock().series.len()
    }

    /// Readings within the active window, as chart labels and moisture
    /// values. Evaluated against the clock on every call.
    pub fn filtered_view(&self) -> FilteredView {
        // ---
        let state = self.lock();
        let filter_time = self.clock.now() - state.window.duration();

        let (labels, values) = state
            .series
            .iter()
            .filter(|r| r.timestamp >= filter_time)
            .map(|r| (self.time_label(r.timestamp), r.moisture))
            .unzip();

        FilteredView {
            window: state.window,
            labels,
            values,
        }
    }

    /// Chart, gauges and pump state for one dashboard render.
    pub fn dashboard(&self) -> DashboardFrame {
        // ---
        let chart = self.filtered_view();
        let latest = self.latest();

        DashboardFrame {
            chart,
            latest,
            moisture_gauge: Gauge::with_scale(latest.moisture, 100.0),
            temperature_gauge: Gauge::with_scale(latest.temperature, 50.0),
            humidity_gauge: Gauge::with_scale(latest.humidity, 100.0),
            pump_on: latest.pump_on,
            pump_trigger: self.options.pump_trigger,
        }
    }

    fn time_label(&self, timestamp: DateTime<Utc>) -> String {
        timestamp
            .with_timezone(&self.options.label_offset)
            .format("%H:%M:%S")
            .to_string()
    }
}

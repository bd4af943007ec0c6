//! End-to-end checks against a running deployment.
//!
//! These need a live service hosting its in-process store (no
//! `REALTIME_DB_URL`) at `BASE_URL`, so they only run on demand:
//! `cargo test -- --ignored`.

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct FilteredView {
    window: String,
    labels: Vec<String>,
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct LatestSnapshot {
    moisture: f64,
    temperature: f64,
    humidity: f64,
    pump_on: bool,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
#[ignore = "requires a running service at BASE_URL"]
async fn posted_reading_shows_up_in_view() -> Result<()> {
    // ---
    let base = base_url();
    let client = Client::new();

    let response = client
        .post(format!("{}/api/monitor", base))
        .json(&json!({"SoilMoisture": 63.0, "temp": 21.0, "humidity": 58.0, "pumpStatus": false}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Delivery to the aggregator is asynchronous
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let latest: LatestSnapshot = client
        .get(format!("{}/api/telemetry/latest", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(latest.moisture, 63.0);
    assert_eq!(latest.temperature, 21.0);
    assert_eq!(latest.humidity, 58.0);
    assert!(!latest.pump_on);

    let view: FilteredView = client
        .get(format!("{}/api/telemetry/view", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(view.labels.len(), view.values.len());
    assert_eq!(view.values.last().copied(), Some(63.0));

    Ok(())
}

#[tokio::test]
#[ignore = "requires a running service at BASE_URL"]
async fn window_selection_is_sticky() -> Result<()> {
    // ---
    let base = base_url();
    let client = Client::new();
    let url = format!("{}/api/telemetry/window", base);

    let response = client.put(&url).json(&json!({"window": "15D"})).send().await?;
    tokio_test::assert_ok!(response.error_for_status_ref());

    // Unknown token leaves 15D in place
    client.put(&url).json(&json!({"window": "1Y"})).send().await?;

    let view: FilteredView = client
        .get(format!("{}/api/telemetry/view", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(view.window, "15D");

    client.put(&url).json(&json!({"window": "1H"})).send().await?;
    Ok(())
}

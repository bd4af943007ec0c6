//! Realtime store sources feeding the telemetry aggregator.
//!
//! A source turns a document path into a push stream of raw JSON
//! documents, one message per change, in write order. `None` stands for
//! an absent document. Two sources are provided:
//! - [`ChannelSource`]: an in-process store; writers call
//!   [`ChannelSource::publish`] (the `/api/monitor` route does this).
//! - [`HttpPollSource`]: a remote realtime database that serves documents
//!   as `{base_url}/{path}.json`.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Receiving end of a document subscription.
pub type FeedReceiver = mpsc::UnboundedReceiver<Option<Value>>;

/// A push-based realtime store.
pub trait RealtimeSource: Send + Sync {
    /// Subscribe to the document at `path`.
    ///
    /// The subscription lives as long as the returned receiver; dropping
    /// it releases the source-side resources.
    fn subscribe(&self, path: &str) -> Result<FeedReceiver>;
}

// ---

type Subscribers = Vec<(String, mpsc::UnboundedSender<Option<Value>>)>;

/// In-process realtime store.
#[derive(Clone, Default)]
pub struct ChannelSource {
    // ---
    subscribers: Arc<Mutex<Subscribers>>,
}

impl ChannelSource {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every live subscriber of `path`.
    ///
    /// Returns how many subscribers received it. Subscribers whose
    /// receiver was dropped are forgotten.
    pub fn publish(&self, path: &str, payload: Option<Value>) -> usize {
        // ---
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subscribers.retain(|(_, tx)| !tx.is_closed());

        let delivered = subscribers
            .iter()
            .filter(|(p, _)| p == path)
            .filter(|(_, tx)| tx.send(payload.clone()).is_ok())
            .count();

        trace!("Published to '{}', delivered to {} subscriber(s)", path, delivered);
        delivered
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.len()
    }
}

impl RealtimeSource for ChannelSource {
    fn subscribe(&self, path: &str) -> Result<FeedReceiver> {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_string(), tx));

        debug!("In-process subscription opened on '{}'", path);
        Ok(rx)
    }
}

// ---

/// Remote realtime database read through its REST interface.
///
/// The document is polled at a fixed interval and pushed to the
/// subscriber only when its value changes. A request that has not
/// answered within the request timeout is abandoned and retried on the
/// next tick.
#[derive(Clone)]
pub struct HttpPollSource {
    // ---
    client: reqwest::Client,
    base_url: String,
    poll_interval: std::time::Duration,
    request_timeout: std::time::Duration,
}

/// Lower bound for the per-request timeout.
const MIN_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

impl HttpPollSource {
    // ---
    pub fn new(base_url: impl Into<String>, poll_interval: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            poll_interval,
            request_timeout: poll_interval.max(MIN_REQUEST_TIMEOUT),
        }
    }

    #[cfg(test)]
    pub fn with_request_timeout(mut self, request_timeout: std::time::Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// REST location of the document at `path`, keeping any query string
    /// (e.g. an auth token) from the base URL.
    pub fn document_url(&self, path: &str) -> String {
        // ---
        let (base, query) = match self.base_url.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (self.base_url.as_str(), None),
        };
        let url = format!(
            "{}/{}.json",
            base.trim_end_matches('/'),
            path.trim_matches('/')
        );
        match query {
            Some(q) => format!("{}?{}", url, q),
            None => url,
        }
    }
}

impl RealtimeSource for HttpPollSource {
    fn subscribe(&self, path: &str) -> Result<FeedReceiver> {
        // ---
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("HTTP poll subscription needs a tokio runtime: {}", e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let url = self.document_url(path);
        info!(
            "Polling '{}' every {} ms",
            path,
            self.poll_interval.as_millis()
        );
        runtime.spawn(poll_document(
            self.client.clone(),
            url,
            self.poll_interval,
            self.request_timeout,
            tx,
        ));
        Ok(rx)
    }
}

async fn poll_document(
    client: reqwest::Client,
    url: String,
    period: std::time::Duration,
    request_timeout: std::time::Duration,
    tx: mpsc::UnboundedSender<Option<Value>>,
) {
    // ---
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Last document pushed downstream; `None` until the first delivery.
    let mut last: Option<Value> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tx.closed() => break,
        }

        let fetched = tokio::select! {
            result = timeout(request_timeout, fetch_document(&client, &url)) => result,
            _ = tx.closed() => break,
        };

        let document = match fetched {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => {
                warn!("Failed to poll realtime document: {}", e);
                continue;
            }
            Err(_) => {
                warn!(
                    "Realtime document poll timed out after {} ms",
                    request_timeout.as_millis()
                );
                continue;
            }
        };

        if last.as_ref() == Some(&document) {
            trace!("Document unchanged, skipping");
            continue;
        }

        let payload = (!document.is_null()).then(|| document.clone());
        if tx.send(payload).is_err() {
            break;
        }
        last = Some(document);
    }

    debug!("Poll task for subscription finished");
}

async fn fetch_document(client: &reqwest::Client, url: &str) -> Result<Value> {
    // ---
    let document = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use axum::{extract::State, routing::get, Json, Router};
    use serde_json::json;
    use std::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn test_document_url() {
        // ---
        let period = Duration::from_millis(100);

        let source = HttpPollSource::new("https://garden.example.com/", period);
        assert_eq!(
            source.document_url("monitor"),
            "https://garden.example.com/monitor.json"
        );

        let source = HttpPollSource::new("https://garden.example.com?auth=secret", period);
        assert_eq!(
            source.document_url("/monitor/"),
            "https://garden.example.com/monitor.json?auth=secret"
        );
    }

    #[test]
    fn test_http_subscribe_without_runtime_fails() {
        // ---
        let source = HttpPollSource::new("http://127.0.0.1:9", Duration::from_millis(10));
        assert!(source.subscribe("monitor").is_err());
    }

    #[tokio::test]
    async fn test_channel_publish_reaches_path_subscribers() {
        // ---
        let source = ChannelSource::new();
        assert_eq!(source.publish("monitor", Some(json!(1))), 0);

        let mut a = source.subscribe("monitor").unwrap();
        let mut b = source.subscribe("monitor").unwrap();
        let mut other = source.subscribe("valve").unwrap();

        assert_eq!(source.publish("monitor", Some(json!({"x": 1}))), 2);
        assert_eq!(source.publish("monitor", None), 2);

        assert_eq!(a.recv().await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(a.recv().await.unwrap(), None);
        assert_eq!(b.recv().await.unwrap(), Some(json!({"x": 1})));
        assert!(matches!(other.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_channel_forgets_dropped_subscribers() {
        // ---
        let source = ChannelSource::new();
        let keep = source.subscribe("monitor").unwrap();
        let gone = source.subscribe("monitor").unwrap();
        assert_eq!(source.subscriber_count(), 2);

        drop(gone);
        assert_eq!(source.publish("monitor", Some(json!(7))), 1);
        assert_eq!(source.subscriber_count(), 1);
        drop(keep);
        assert_eq!(source.subscriber_count(), 0);
    }

    type Document = Arc<Mutex<Value>>;

    async fn serve_document(document: Document) -> String {
        // ---
        async fn monitor(State(doc): State<Document>) -> Json<Value> {
            Json(doc.lock().unwrap().clone())
        }

        let app = Router::new()
            .route("/monitor.json", get(monitor))
            .with_state(document);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_poll_delivers_only_changes() {
        // ---
        let document: Document = Arc::new(Mutex::new(json!({"SoilMoisture": 40})));
        let base = serve_document(document.clone()).await;

        let source = HttpPollSource::new(base, Duration::from_millis(20));
        let mut rx = source.subscribe("monitor").unwrap();

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first, Some(Some(json!({"SoilMoisture": 40}))));

        // Several polls of an unchanged document push nothing
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        *document.lock().unwrap() = json!({"SoilMoisture": 55});
        let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(second, Some(Some(json!({"SoilMoisture": 55}))));

        *document.lock().unwrap() = Value::Null;
        let third = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(third, Some(None));
    }

    async fn serve_hanging_once(calls: Arc<AtomicUsize>) -> String {
        // ---
        async fn monitor(State(calls): State<Arc<AtomicUsize>>) -> Json<Value> {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Json(json!({"SoilMoisture": 61}))
        }

        let app = Router::new()
            .route("/monitor.json", get(monitor))
            .with_state(calls);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_poll_recovers_from_stalled_request() {
        // ---
        let calls = Arc::new(AtomicUsize::new(0));
        let base = serve_hanging_once(calls.clone()).await;

        let source = HttpPollSource::new(base, Duration::from_millis(20))
            .with_request_timeout(Duration::from_millis(100));
        let mut rx = source.subscribe("monitor").unwrap();

        let delivered = timeout(Duration::from_secs(3), rx.recv()).await.unwrap();
        assert_eq!(delivered, Some(Some(json!({"SoilMoisture": 61}))));
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_http_poll_stops_during_stalled_request() {
        // ---
        let calls = Arc::new(AtomicUsize::new(0));
        let base = serve_hanging_once(calls.clone()).await;

        // Long request timeout: only the closed receiver can end the wait
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(poll_document(
            reqwest::Client::new(),
            format!("{}/monitor.json", base),
            Duration::from_millis(20),
            Duration::from_secs(60),
            tx,
        ));

        timeout(Duration::from_secs(3), async {
            while calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        drop(rx);

        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_timeout_has_floor() {
        // ---
        let fast = HttpPollSource::new("http://localhost", Duration::from_millis(20));
        assert_eq!(fast.request_timeout, MIN_REQUEST_TIMEOUT);

        let slow = HttpPollSource::new("http://localhost", Duration::from_secs(30));
        assert_eq!(slow.request_timeout, Duration::from_secs(30));
    }
}

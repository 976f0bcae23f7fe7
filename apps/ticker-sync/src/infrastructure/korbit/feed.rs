//! Feed Client
//!
//! Produces the two raw update streams consumed by the synchronizer:
//!
//! - **Snapshots**: one pair of REST bodies (tickers, currencies) per poll
//!   tick. A tick that finds the previous fetch still running is skipped,
//!   never queued. Fetch failures are logged and the stream carries on.
//! - **Incremental updates**: every text frame received over the
//!   [`Connection`]. A pump task follows the connection across sessions and
//!   re-sends the current subscription each time a new session opens,
//!   whether it was opened by `reconnect` or by self-heal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::connection::{
    ConnectError, Connection, ConnectionState, ConnectionStatus, NotConnectedError,
};
use super::rest::SnapshotSource;
use crate::domain::ticker::Symbol;
use crate::infrastructure::metrics;

/// Raw bodies fetched in one snapshot cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPayload {
    /// Ticker envelope body.
    pub tickers: String,
    /// Currency envelope body, absent when that fetch failed.
    pub currencies: Option<String>,
    /// When the cycle completed.
    pub fetched_at: DateTime<Utc>,
}

impl SnapshotPayload {
    /// Time elapsed since the cycle completed, zero if `now` is earlier.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Feed client tuning.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Snapshot payloads buffered for the consumer.
    pub snapshot_buffer: usize,
    /// Incremental frames buffered for the consumer.
    pub update_buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshot_buffer: 4,
            update_buffer: 1024,
        }
    }
}

/// Handle to the feed. Clones share state.
#[derive(Clone)]
pub struct FeedClient {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    source: Arc<dyn SnapshotSource>,
    connection: Connection,
    codec: JsonCodec,
    config: FeedConfig,
    subscription: RwLock<Vec<Symbol>>,
    updates_tx: mpsc::Sender<String>,
    updates_rx: Mutex<Option<mpsc::Receiver<String>>>,
    pump: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    cancel: CancellationToken,
}

impl FeedClient {
    /// Create a feed over `source` and `connection`.
    #[must_use]
    pub fn new(source: Arc<dyn SnapshotSource>, connection: Connection, config: FeedConfig) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(config.update_buffer.max(1));
        Self {
            inner: Arc::new(FeedInner {
                source,
                connection,
                codec: JsonCodec::new(),
                config,
                subscription: RwLock::new(Vec::new()),
                updates_tx,
                updates_rx: Mutex::new(Some(updates_rx)),
                pump: tokio::sync::Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Current subscription.
    #[must_use]
    pub fn subscription(&self) -> Vec<Symbol> {
        self.inner.subscription.read().clone()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Poll the REST source every `interval`, starting immediately.
    ///
    /// The stream ends on [`shutdown`](Self::shutdown) or when dropped.
    #[must_use]
    pub fn snapshot_stream(&self, interval: Duration) -> ReceiverStream<SnapshotPayload> {
        let (tx, rx) = mpsc::channel(self.inner.config.snapshot_buffer.max(1));
        tokio::spawn(poll_snapshots(
            Arc::clone(&self.inner.source),
            interval,
            tx,
            self.inner.cancel.child_token(),
        ));
        ReceiverStream::new(rx)
    }

    // -------------------------------------------------------------------------
    // Incremental updates
    // -------------------------------------------------------------------------

    /// Open the stream connection and start forwarding its frames.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the endpoint is malformed or refused.
    pub async fn connect(&self, endpoint: &str) -> Result<(), ConnectError> {
        self.inner.connection.open(endpoint).await?;
        self.ensure_pump().await;
        Ok(())
    }

    /// Raw frames from every session, in arrival order.
    ///
    /// Taken once; later calls get an already-finished stream.
    ///
    /// # Errors
    ///
    /// Returns `NotConnectedError` unless the connection is open.
    pub fn incremental_stream(&self) -> Result<ReceiverStream<String>, NotConnectedError> {
        if self.inner.connection.state() != ConnectionState::Connected {
            return Err(NotConnectedError);
        }
        if let Some(rx) = self.inner.updates_rx.lock().take() {
            return Ok(ReceiverStream::new(rx));
        }
        tracing::warn!("Incremental stream already taken");
        let (_tx, rx) = mpsc::channel(1);
        Ok(ReceiverStream::new(rx))
    }

    /// Replace the subscription and send it if a session is open.
    pub async fn subscribe(&self, symbols: Vec<Symbol>) {
        let symbols = {
            let mut current = self.inner.subscription.write();
            *current = symbols;
            current.clone()
        };
        metrics::set_subscribed_symbols(symbols.len());
        if self.inner.connection.state() == ConnectionState::Connected {
            self.inner.send_subscription(&symbols).await;
        }
    }

    /// Stop forwarding and close the connection.
    pub async fn disconnect(&self) {
        self.stop_pump().await;
        self.inner.connection.close().await;
    }

    /// Re-open the connection. The subscription is re-sent once the new
    /// session is up.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the connection cannot be re-established.
    pub async fn reconnect(&self) -> Result<(), ConnectError> {
        self.inner.connection.reconnect().await?;
        self.ensure_pump().await;
        Ok(())
    }

    /// Stop every feed activity.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.disconnect().await;
    }

    async fn ensure_pump(&self) {
        let mut pump = self.inner.pump.lock().await;
        if pump.as_ref().is_some_and(|(_, task)| !task.is_finished()) {
            return;
        }
        let cancel = self.inner.cancel.child_token();
        let task = tokio::spawn(pump_frames(Arc::clone(&self.inner), cancel.clone()));
        *pump = Some((cancel, task));
    }

    async fn stop_pump(&self) {
        let pump = self.inner.pump.lock().await.take();
        if let Some((cancel, task)) = pump {
            cancel.cancel();
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Frame pump failed");
            }
        }
    }
}

impl FeedInner {
    async fn send_subscription(&self, symbols: &[Symbol]) {
        if symbols.is_empty() {
            return;
        }
        let frame = match self.codec.encode_subscribe(symbols) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode subscription");
                return;
            }
        };
        match self.connection.send(frame).await {
            Ok(()) => tracing::info!(symbols = symbols.len(), "Subscribed to tickers"),
            Err(e) => tracing::debug!(error = %e, "Subscription deferred until connected"),
        }
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

async fn pump_frames(inner: Arc<FeedInner>, cancel: CancellationToken) {
    let mut status_rx = inner.connection.watch_status();
    let mut last_generation = 0;

    loop {
        let status: ConnectionStatus = tokio::select! {
            () = cancel.cancelled() => return,
            changed = status_rx.wait_for(|s| {
                s.state == ConnectionState::Connected && s.generation != last_generation
            }) => match changed {
                Ok(status) => *status,
                Err(_) => return,
            },
        };
        last_generation = status.generation;

        let mut frames = inner.connection.receive();
        let symbols = inner.subscription.read().clone();
        inner.send_subscription(&symbols).await;

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return,
                frame = frames.next() => frame,
            };
            let Some(frame) = frame else {
                tracing::debug!(generation = status.generation, "Session frames ended");
                break;
            };
            if inner.updates_tx.send(frame).await.is_err() {
                tracing::trace!("Incremental consumer gone");
            }
        }
    }
}

async fn poll_snapshots(
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    tx: mpsc::Sender<SnapshotPayload>,
    cancel: CancellationToken,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval_at(Instant::now(), interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if tx.is_closed() {
            break;
        }
        if in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("Snapshot fetch still in flight, skipping tick");
            metrics::record_snapshot_tick_skipped();
            continue;
        }

        let guard = InFlight(Arc::clone(&in_flight));
        let source = Arc::clone(&source);
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let payload = tokio::select! {
                () = cancel.cancelled() => return,
                payload = fetch_cycle(source.as_ref()) => payload,
            };
            if let Some(payload) = payload
                && tx.send(payload).await.is_err()
            {
                tracing::trace!("Snapshot consumer gone");
            }
        });
    }
    tracing::debug!("Snapshot poll stopped");
}

async fn fetch_cycle(source: &dyn SnapshotSource) -> Option<SnapshotPayload> {
    let (tickers, currencies) = tokio::join!(source.fetch_tickers(), source.fetch_currencies());

    let tickers = match tickers {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Ticker snapshot fetch failed, skipping cycle");
            metrics::record_snapshot_fetch_failed("tickers");
            return None;
        }
    };
    let currencies = match currencies {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::warn!(error = %e, "Currency fetch failed, keeping known names");
            metrics::record_snapshot_fetch_failed("currencies");
            None
        }
    };

    Some(SnapshotPayload {
        tickers,
        currencies,
        fetched_at: Utc::now(),
    })
}

/// Clears the in-flight flag when the fetch task ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::infrastructure::korbit::connection::ConnectionConfig;
    use crate::infrastructure::korbit::rest::RestError;
    use crate::infrastructure::korbit::transport::{SessionHalves, Transport, TransportError};

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn connect(&self, _endpoint: &reqwest::Url) -> Result<SessionHalves, TransportError> {
            Err(TransportError::Connect("offline".to_string()))
        }
    }

    /// Source whose fetches take `latency` and count calls.
    struct SlowSource {
        latency: Duration,
        ticker_calls: AtomicUsize,
        fail_currencies: bool,
    }

    impl SlowSource {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                ticker_calls: AtomicUsize::new(0),
                fail_currencies: false,
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for SlowSource {
        async fn fetch_tickers(&self) -> Result<String, RestError> {
            let n = self.ticker_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            Ok(format!("tickers-{n}"))
        }

        async fn fetch_currencies(&self) -> Result<String, RestError> {
            if self.fail_currencies {
                return Err(RestError::Setup("down".to_string()));
            }
            Ok("currencies".to_string())
        }
    }

    fn feed(source: Arc<dyn SnapshotSource>) -> FeedClient {
        let connection = Connection::new(Arc::new(NoTransport), ConnectionConfig::default());
        FeedClient::new(source, connection, FeedConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_skips_ticks_instead_of_queueing() {
        let source = Arc::new(SlowSource::new(Duration::from_millis(2_500)));
        let client = feed(source.clone());
        let mut snapshots = client.snapshot_stream(Duration::from_secs(1));

        let first = snapshots.next().await.unwrap();
        assert_eq!(first.tickers, "tickers-0");
        assert_eq!(first.currencies.as_deref(), Some("currencies"));

        let second = snapshots.next().await.unwrap();
        assert_eq!(second.tickers, "tickers-1");

        // Ticks at 1s and 2s found the first fetch running; the second
        // fetch started at 3s and finished at 5.5s.
        assert_eq!(source.ticker_calls.load(Ordering::SeqCst), 2);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn currency_failure_still_yields_tickers() {
        let source = Arc::new(SlowSource {
            fail_currencies: true,
            ..SlowSource::new(Duration::from_millis(10))
        });
        let client = feed(source);
        let mut snapshots = client.snapshot_stream(Duration::from_secs(1));

        let payload = snapshots.next().await.unwrap();
        assert_eq!(payload.tickers, "tickers-0");
        assert!(payload.currencies.is_none());
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_snapshot_stream() {
        let client = feed(Arc::new(SlowSource::new(Duration::from_millis(10))));
        let mut snapshots = client.snapshot_stream(Duration::from_secs(1));
        snapshots.next().await.unwrap();

        client.shutdown().await;

        while snapshots.next().await.is_some() {}
    }

    #[test]
    fn payload_age_is_measured_from_fetch_and_never_negative() {
        let fetched_at = Utc::now();
        let payload = SnapshotPayload {
            tickers: String::new(),
            currencies: None,
            fetched_at,
        };

        assert_eq!(
            payload.age(fetched_at + chrono::Duration::milliseconds(250)),
            Duration::from_millis(250)
        );
        assert_eq!(
            payload.age(fetched_at - chrono::Duration::seconds(1)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn incremental_stream_requires_connection() {
        let client = feed(Arc::new(SlowSource::new(Duration::ZERO)));
        assert!(matches!(client.incremental_stream(), Err(NotConnectedError)));
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_is_remembered() {
        let client = feed(Arc::new(SlowSource::new(Duration::ZERO)));
        client
            .subscribe(vec!["btc_krw".to_string(), "eth_krw".to_string()])
            .await;
        assert_eq!(client.subscription(), ["btc_krw", "eth_krw"]);
    }
}

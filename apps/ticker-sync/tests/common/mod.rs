//! Shared fakes for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::{Notify, mpsc};

use ticker_sync::infrastructure::korbit::{
    FrameSink, FrameSource, Inbound, RestError, SessionHalves, Transport, TransportError,
};
use ticker_sync::{BookmarkStore, OverlayError, SnapshotSource};

// =============================================================================
// Scripted Transport
// =============================================================================

#[derive(Default)]
struct Script {
    attempts: AtomicUsize,
    connects: AtomicUsize,
    probes: AtomicUsize,
    closes: AtomicUsize,
    refuse: AtomicBool,
    silent: AtomicBool,
    held: AtomicBool,
    release: Notify,
    sent: Mutex<Vec<String>>,
    peer: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
}

/// In-process transport. Answers probes with a pong unless silenced and
/// records everything written to it.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Arc<Script>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handshakes attempted, refused ones included.
    pub fn attempts(&self) -> usize {
        self.script.attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened.
    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    /// Probes written across all sessions.
    pub fn probes(&self) -> usize {
        self.script.probes.load(Ordering::SeqCst)
    }

    /// Sessions closed from our side.
    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    /// Text frames written across all sessions.
    pub fn sent(&self) -> Vec<String> {
        self.script.sent.lock().clone()
    }

    /// Refuse every following handshake.
    pub fn refuse(&self, refuse: bool) {
        self.script.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Park every following handshake until released with `false`.
    pub fn hold_handshakes(&self, hold: bool) {
        self.script.held.store(hold, Ordering::SeqCst);
        if !hold {
            self.script.release.notify_one();
        }
    }

    /// Stop answering probes.
    pub fn go_silent(&self) {
        self.script.silent.store(true, Ordering::SeqCst);
    }

    /// Deliver a text frame on the current session.
    pub fn push(&self, text: &str) {
        if let Some(peer) = self.script.peer.lock().as_ref() {
            let _ = peer.send(Inbound::Text(text.to_string()));
        }
    }

    /// Close the current session from the peer's side.
    pub fn drop_session(&self) {
        if let Some(peer) = self.script.peer.lock().take() {
            let _ = peer.send(Inbound::Close);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _endpoint: &Url) -> Result<SessionHalves, TransportError> {
        self.script.attempts.fetch_add(1, Ordering::SeqCst);
        while self.script.held.load(Ordering::SeqCst) {
            self.script.release.notified().await;
        }
        if self.script.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        self.script.connects.fetch_add(1, Ordering::SeqCst);

        let (peer, inbound) = mpsc::unbounded_channel();
        *self.script.peer.lock() = Some(peer.clone());
        Ok((
            Box::new(FakeSink {
                script: Arc::clone(&self.script),
                peer,
            }),
            Box::new(FakeSource { inbound }),
        ))
    }
}

struct FakeSink {
    script: Arc<Script>,
    peer: mpsc::UnboundedSender<Inbound>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.script.sent.lock().push(text);
        Ok(())
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        self.script.probes.fetch_add(1, Ordering::SeqCst);
        if !self.script.silent.load(Ordering::SeqCst) {
            let _ = self.peer.send(Inbound::Pong);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeSource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn next_frame(&mut self) -> Option<Result<Inbound, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }
}

// =============================================================================
// Snapshot Source
// =============================================================================

/// Serves fixed REST bodies that tests can swap between cycles.
#[derive(Default)]
pub struct StaticSource {
    tickers: Mutex<String>,
    currencies: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(tickers: &str, currencies: &str) -> Self {
        Self {
            tickers: Mutex::new(tickers.to_string()),
            currencies: Mutex::new(Some(currencies.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_tickers(&self, tickers: &str) {
        *self.tickers.lock() = tickers.to_string();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn fetch_tickers(&self) -> Result<String, RestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tickers.lock().clone())
    }

    async fn fetch_currencies(&self) -> Result<String, RestError> {
        self.currencies.lock().clone().ok_or_else(|| RestError::Network {
            url: "currencies".to_string(),
            reason: "unavailable".to_string(),
        })
    }
}

// =============================================================================
// Bookmark Store
// =============================================================================

/// In-memory store that counts calls.
#[derive(Default)]
pub struct CountingStore {
    symbols: Mutex<HashSet<String>>,
    pub adds: AtomicUsize,
    pub removes: AtomicUsize,
    pub clears: AtomicUsize,
}

impl CountingStore {
    pub fn with(symbols: &[&str]) -> Self {
        Self {
            symbols: Mutex::new(symbols.iter().map(ToString::to_string).collect()),
            ..Self::default()
        }
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookmarkStore for CountingStore {
    async fn is_bookmarked(&self, id: &str) -> Result<bool, OverlayError> {
        Ok(self.symbols.lock().contains(id))
    }

    async fn add(&self, id: &str) -> Result<(), OverlayError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.symbols.lock().insert(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), OverlayError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.symbols.lock().remove(id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), OverlayError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.symbols.lock().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, OverlayError> {
        Ok(self.symbols.lock().len())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// REST ticker envelope with one row per `(symbol, close)`.
pub fn tickers_body(rows: &[(&str, &str)]) -> String {
    let data: Vec<serde_json::Value> = rows
        .iter()
        .map(|(symbol, close)| {
            serde_json::json!({
                "symbol": symbol,
                "close": close,
                "priceChangePercent": "0.5",
                "quoteVolume": "1000",
                "lastTradedAt": 1_700_000_000_000_i64,
            })
        })
        .collect();
    serde_json::json!({ "success": true, "data": data }).to_string()
}

/// REST currency envelope.
pub fn currencies_body(rows: &[(&str, &str)]) -> String {
    let data: Vec<serde_json::Value> = rows
        .iter()
        .map(|(name, full_name)| serde_json::json!({ "name": name, "fullName": full_name }))
        .collect();
    serde_json::json!({ "success": true, "data": data }).to_string()
}

/// One streaming ticker push.
pub fn ticker_frame(symbol: &str, close: &str) -> String {
    serde_json::json!({
        "type": "ticker",
        "symbol": symbol,
        "data": { "close": close, "priceChangePercent": "0.5", "quoteVolume": "1000" },
    })
    .to_string()
}

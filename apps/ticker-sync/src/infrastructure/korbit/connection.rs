//! Streaming Connection
//!
//! Owns one logical streaming session to a remote endpoint.
//!
//! # States
//!
//! ```text
//! Disconnected ──open──► Connecting ──► Connected ──close──► Disconnected
//!                             ▲             │
//!                             │   fault / keep-alive timeout / reconnect
//!                             │             ▼
//!                             └──────── Reconnecting
//! ```
//!
//! Every handshake attempt runs in `Connecting`. A refused self-heal
//! attempt drops back to `Reconnecting` until the next retry.
//!
//! Each session runs in its own task that owns both halves of the socket
//! and the session's keep-alive timer. The task ends on close or on the
//! first transport fault; a fault is reported to the healer task, which
//! re-opens the last endpoint with backoff. Open, close and reconnect are
//! serialized by one async mutex, and tearing a session down waits for its
//! task (and therefore its timer) to finish, so at most one keep-alive
//! timer is ever live.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::keepalive::{KeepAlive, KeepAliveConfig, KeepAliveEvent, Liveness, TimerCounters};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::transport::{FrameSink, FrameSource, Inbound, Transport};
use crate::infrastructure::metrics;

/// Outbound frames queued per session.
const OUTBOUND_BUFFER: usize = 64;

// =============================================================================
// Configuration and Status
// =============================================================================

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Keep-alive timing.
    pub keep_alive: KeepAliveConfig,
    /// Backoff for self-heal.
    pub reconnect: ReconnectConfig,
    /// Upper bound on one handshake.
    pub connect_timeout: Duration,
    /// Inbound frames buffered per session before new ones are dropped.
    pub frame_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keep_alive: KeepAliveConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            frame_buffer: 1024,
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session and none pending.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session open.
    Connected,
    /// Session lost or being replaced; waiting to re-open.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Observable status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Sessions established so far; bumps every time a session opens.
    pub generation: u64,
}

// =============================================================================
// Errors
// =============================================================================

/// Failure to establish a session. Surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Endpoint is not a `ws://` or `wss://` URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as given.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Transport refused the handshake.
    #[error("connection refused: {0}")]
    Refused(String),

    /// Handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// `reconnect` before any `open`.
    #[error("no endpoint to reconnect to")]
    NoEndpoint,
}

/// Operation needs an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection is not established")]
pub struct NotConnectedError;

/// Inbound text frames of one session.
pub type FrameStream = ReceiverStream<String>;

// =============================================================================
// Connection
// =============================================================================

/// Handle to a streaming connection. Clones share the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    control: tokio::sync::Mutex<Control>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    frames: Mutex<Option<mpsc::Receiver<String>>>,
    timers: Arc<TimerCounters>,
    root: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[derive(Default)]
struct Control {
    endpoint: Option<Url>,
    session: Option<Session>,
    healer: Option<Healer>,
    generation: u64,
}

struct Session {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Healer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    fault_tx: mpsc::UnboundedSender<u64>,
}

impl Connection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            generation: 0,
        });
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                status_tx,
                control: tokio::sync::Mutex::new(Control::default()),
                outbound: Mutex::new(None),
                frames: Mutex::new(None),
                timers: Arc::new(TimerCounters::default()),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    /// Watch status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Keep-alive timer counters.
    #[must_use]
    pub fn keep_alive_timers(&self) -> &TimerCounters {
        &self.inner.timers
    }

    /// Open a session to `endpoint`.
    ///
    /// No-op when already connected to the same endpoint. Connected to a
    /// different endpoint, the current session is closed first.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the endpoint is malformed or the transport
    /// refuses. The connection is left disconnected.
    pub async fn open(&self, endpoint: &str) -> Result<(), ConnectError> {
        let url = parse_endpoint(endpoint)?;
        let mut control = self.inner.control.lock().await;

        if self.state() == ConnectionState::Connected
            && control.session.is_some()
            && control.endpoint.as_ref() == Some(&url)
        {
            tracing::debug!(endpoint = %url, "Already connected");
            return Ok(());
        }

        self.inner.teardown(&mut control).await;
        control.endpoint = Some(url);
        self.inner.ensure_healer(&mut control);
        self.inner.set_state(ConnectionState::Connecting);

        let result = self.inner.establish(&mut control).await;
        if result.is_err() {
            self.inner.set_state(ConnectionState::Disconnected);
        }
        result
    }

    /// Close the current session and re-open the last endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::NoEndpoint` before the first `open`, or the
    /// handshake failure.
    pub async fn reconnect(&self) -> Result<(), ConnectError> {
        let mut control = self.inner.control.lock().await;
        if control.endpoint.is_none() {
            return Err(ConnectError::NoEndpoint);
        }

        self.inner.teardown(&mut control).await;
        self.inner.ensure_healer(&mut control);
        self.inner.set_state(ConnectionState::Reconnecting);
        metrics::record_reconnect("requested");
        self.inner.set_state(ConnectionState::Connecting);

        let result = self.inner.establish(&mut control).await;
        if result.is_err() {
            self.inner.set_state(ConnectionState::Disconnected);
        }
        result
    }

    /// Close the session, stop its timer and the healer. Idempotent.
    pub async fn close(&self) {
        let healer = {
            let mut control = self.inner.control.lock().await;
            self.inner.teardown(&mut control).await;
            self.inner.set_state(ConnectionState::Disconnected);
            control.healer.take()
        };

        if let Some(healer) = healer {
            healer.cancel.cancel();
            if let Err(e) = healer.task.await {
                tracing::warn!(error = %e, "Healer task failed");
            }
        }
    }

    /// Queue one outbound text frame.
    ///
    /// Transport failures while writing are handled by self-heal, not
    /// reported here.
    ///
    /// # Errors
    ///
    /// Returns `NotConnectedError` unless a session is open.
    pub async fn send(&self, message: String) -> Result<(), NotConnectedError> {
        if self.state() != ConnectionState::Connected {
            return Err(NotConnectedError);
        }
        let tx = self.inner.outbound.lock().clone().ok_or(NotConnectedError)?;
        tx.send(message).await.map_err(|_| NotConnectedError)
    }

    /// Inbound frames of the current session.
    ///
    /// The stream ends when the session does. It can be taken once per
    /// session; later calls get an already-finished stream.
    #[must_use]
    pub fn receive(&self) -> FrameStream {
        match self.inner.frames.lock().take() {
            Some(rx) => ReceiverStream::new(rx),
            None => {
                let (_tx, rx) = mpsc::channel(1);
                ReceiverStream::new(rx)
            }
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ConnectError> {
    let invalid = |reason: String| ConnectError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

// =============================================================================
// Session Management
// =============================================================================

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.status_tx.send_modify(|status| status.state = state);
        metrics::set_connected(state == ConnectionState::Connected);
    }

    fn ensure_healer(self: &Arc<Self>, control: &mut Control) {
        if control.healer.is_some() {
            return;
        }
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let cancel = self.root.child_token();
        let task = tokio::spawn(heal_loop(Arc::downgrade(self), fault_rx, cancel.clone()));
        control.healer = Some(Healer {
            cancel,
            task,
            fault_tx,
        });
    }

    async fn establish(&self, control: &mut Control) -> Result<(), ConnectError> {
        let url = control.endpoint.clone().ok_or(ConnectError::NoEndpoint)?;
        tracing::info!(endpoint = %url, "Connecting to ticker stream");

        let (sink, source) =
            match tokio::time::timeout(self.config.connect_timeout, self.transport.connect(&url))
                .await
            {
                Ok(Ok(halves)) => halves,
                Ok(Err(e)) => return Err(ConnectError::Refused(e.to_string())),
                Err(_) => return Err(ConnectError::Timeout(self.config.connect_timeout)),
            };

        control.generation += 1;
        let generation = control.generation;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (frames_tx, frames_rx) = mpsc::channel(self.config.frame_buffer.max(1));
        *self.outbound.lock() = Some(outbound_tx);
        *self.frames.lock() = Some(frames_rx);

        let cancel = self.root.child_token();
        let task = tokio::spawn(run_session(SessionContext {
            generation,
            sink,
            source,
            outbound_rx,
            frames_tx,
            fault_tx: control.healer.as_ref().map(|h| h.fault_tx.clone()),
            cancel: cancel.clone(),
            keep_alive: self.config.keep_alive.clone(),
            timers: Arc::clone(&self.timers),
        }));
        control.session = Some(Session {
            generation,
            cancel,
            task,
        });

        self.status_tx.send_modify(|status| {
            status.state = ConnectionState::Connected;
            status.generation = generation;
        });
        metrics::set_connected(true);
        tracing::info!(endpoint = %url, generation, "Ticker stream connected");
        Ok(())
    }

    async fn teardown(&self, control: &mut Control) {
        self.outbound.lock().take();
        self.frames.lock().take();

        if let Some(session) = control.session.take() {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                tracing::warn!(error = %e, generation = session.generation, "Session task failed");
            }
            tracing::debug!(generation = session.generation, "Session closed");
        }
    }

    async fn self_heal(&self, failed: u64, cancel: &CancellationToken) {
        {
            let mut control = self.control.lock().await;
            let current = control.session.as_ref().map(|s| s.generation);
            if cancel.is_cancelled() || current != Some(failed) {
                return;
            }
            self.teardown(&mut control).await;
            self.set_state(ConnectionState::Reconnecting);
        }
        metrics::record_reconnect("self_heal");

        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        loop {
            {
                let mut control = self.control.lock().await;
                if cancel.is_cancelled() || control.session.is_some() {
                    return;
                }
                self.set_state(ConnectionState::Connecting);
                match self.establish(&mut control).await {
                    Ok(()) => {
                        tracing::info!(retries = policy.attempts(), "Ticker stream restored");
                        return;
                    }
                    Err(e @ (ConnectError::InvalidEndpoint { .. } | ConnectError::NoEndpoint)) => {
                        tracing::error!(error = %e, "Cannot restore ticker stream");
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt = policy.attempts() + 1, "Reconnect attempt failed");
                        self.set_state(ConnectionState::Reconnecting);
                    }
                }
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(attempts = policy.attempts(), "Giving up on ticker stream");
                self.set_state(ConnectionState::Disconnected);
                return;
            };
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn heal_loop(
    inner: Weak<Inner>,
    mut fault_rx: mpsc::UnboundedReceiver<u64>,
    cancel: CancellationToken,
) {
    loop {
        let failed = tokio::select! {
            () = cancel.cancelled() => return,
            fault = fault_rx.recv() => match fault {
                Some(generation) => generation,
                None => return,
            },
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.self_heal(failed, &cancel).await;
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct SessionContext {
    generation: u64,
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
    outbound_rx: mpsc::Receiver<String>,
    frames_tx: mpsc::Sender<String>,
    fault_tx: Option<mpsc::UnboundedSender<u64>>,
    cancel: CancellationToken,
    keep_alive: KeepAliveConfig,
    timers: Arc<TimerCounters>,
}

enum SessionEnd {
    Closed,
    Fault(String),
}

async fn run_session(mut ctx: SessionContext) {
    let liveness = Arc::new(Liveness::new());
    let (timer_tx, mut timer_rx) = mpsc::channel(4);
    let timer_cancel = CancellationToken::new();
    let timer = KeepAlive::new(
        ctx.keep_alive.clone(),
        Arc::clone(&liveness),
        timer_tx,
        timer_cancel.clone(),
        &ctx.timers,
    );
    let timer_task = tokio::spawn(timer.run());

    let end = loop {
        tokio::select! {
            biased;

            () = ctx.cancel.cancelled() => break SessionEnd::Closed,

            Some(text) = ctx.outbound_rx.recv() => {
                if let Err(e) = ctx.sink.send_text(text).await {
                    break SessionEnd::Fault(e.to_string());
                }
            }

            event = timer_rx.recv() => match event {
                Some(KeepAliveEvent::Probe) => {
                    liveness.record_probe();
                    if let Err(e) = ctx.sink.probe().await {
                        break SessionEnd::Fault(e.to_string());
                    }
                    tracing::trace!(generation = ctx.generation, "Keep-alive probe sent");
                }
                Some(KeepAliveEvent::Expired) | None => {
                    metrics::record_keep_alive_failure();
                    break SessionEnd::Fault("keep-alive acknowledgement timed out".to_string());
                }
            },

            inbound = ctx.source.next_frame() => match inbound {
                Some(Ok(Inbound::Text(text))) => {
                    liveness.record_ack();
                    deliver(&ctx.frames_tx, text);
                }
                Some(Ok(Inbound::Pong | Inbound::Ping)) => liveness.record_ack(),
                Some(Ok(Inbound::Close)) => break SessionEnd::Fault("peer closed the session".to_string()),
                Some(Err(e)) => break SessionEnd::Fault(e.to_string()),
                None => break SessionEnd::Fault("stream ended".to_string()),
            },
        }
    };

    timer_cancel.cancel();
    if let Err(e) = timer_task.await {
        tracing::warn!(error = %e, "Keep-alive timer task failed");
    }
    ctx.sink.close().await;

    if let SessionEnd::Fault(reason) = end {
        tracing::warn!(generation = ctx.generation, reason = %reason, "Ticker stream session failed");
        metrics::record_stream_error();
        if let Some(fault_tx) = ctx.fault_tx {
            let _ = fault_tx.send(ctx.generation);
        }
    }
}

fn deliver(frames_tx: &mpsc::Sender<String>, text: String) {
    match frames_tx.try_send(text) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Inbound frame buffer full, dropping frame");
            metrics::record_frame_dropped();
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::trace!("No frame consumer, dropping frame");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Sync Engine
//!
//! Wires the feed's two streams into the synchronizer:
//!
//! ```text
//! REST poll ──► snapshot loop ──┐
//!                               ├──► SyncHandle (serialized) ──► TableView
//! WebSocket ──► update loop ────┘
//!                  ▲
//!                  └── subscribe(symbols) whenever a snapshot adds symbols
//! ```
//!
//! Both loops only feed the synchronizer's queue; neither touches the table.

use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::synchronizer::{SyncError, SyncHandle};
use crate::infrastructure::korbit::{ConnectError, FeedClient, NotConnectedError, SnapshotPayload};
use crate::infrastructure::metrics;

/// Engine startup errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Stream endpoint refused or malformed.
    #[error("failed to connect stream: {0}")]
    Connect(#[from] ConnectError),

    /// Stream dropped before the update loop could attach.
    #[error("stream unavailable: {0}")]
    NotConnected(#[from] NotConnectedError),
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Streaming endpoint.
    pub stream_url: String,
    /// Snapshot poll interval.
    pub poll_interval: Duration,
}

/// Running engine.
pub struct SyncEngine {
    feed: FeedClient,
    sync: SyncHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Connect the stream, then start the snapshot and update loops.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the stream cannot be opened.
    pub async fn start(
        feed: FeedClient,
        sync: SyncHandle,
        settings: EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<Self, EngineError> {
        feed.connect(&settings.stream_url).await?;
        let updates = feed.incremental_stream()?;
        let snapshots = feed.snapshot_stream(settings.poll_interval);
        let cancel = cancel.child_token();

        tracing::info!(
            stream_url = %settings.stream_url,
            poll_interval_ms = u64::try_from(settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Sync engine started"
        );

        let tasks = vec![
            tokio::spawn(snapshot_loop(
                snapshots,
                feed.clone(),
                sync.clone(),
                cancel.clone(),
            )),
            tokio::spawn(update_loop(updates, sync.clone(), cancel.clone())),
        ];

        Ok(Self {
            feed,
            sync,
            cancel,
            tasks,
        })
    }

    /// Handle to the synchronizer.
    #[must_use]
    pub const fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    /// Feed client.
    #[must_use]
    pub const fn feed(&self) -> &FeedClient {
        &self.feed
    }

    /// Stop both loops, close the feed and clear the table.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.feed.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Engine task failed");
            }
        }
        self.sync.shutdown().await;
        tracing::info!("Sync engine stopped");
    }
}

async fn snapshot_loop(
    mut snapshots: impl Stream<Item = SnapshotPayload> + Unpin,
    feed: FeedClient,
    sync: SyncHandle,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            () = cancel.cancelled() => break,
            payload = snapshots.next() => payload,
        };
        let Some(payload) = payload else { break };

        match sync.ingest_snapshot(&payload).await {
            Ok(outcome) => {
                let lag = payload.age(Utc::now());
                metrics::record_snapshot_freshness(payload.fetched_at, lag);
                tracing::trace!(
                    fetched_at = %payload.fetched_at,
                    lag_ms = u64::try_from(lag.as_millis()).unwrap_or(u64::MAX),
                    "Snapshot merged"
                );
                if outcome.universe_changed() {
                    let symbols = sync.view().symbols();
                    tracing::info!(symbols = symbols.len(), "Symbol universe changed, resubscribing");
                    feed.subscribe(symbols).await;
                }
            }
            Err(SyncError::Stopped) => break,
            Err(e) => tracing::debug!(error = %e, "Snapshot cycle skipped"),
        }
    }
    tracing::debug!("Snapshot loop stopped");
}

async fn update_loop(
    mut updates: impl Stream<Item = String> + Unpin,
    sync: SyncHandle,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = updates.next() => frame,
        };
        let Some(frame) = frame else { break };

        match sync.ingest_frame(&frame).await {
            Ok(_) => {}
            Err(SyncError::Stopped) => break,
            Err(e) => tracing::debug!(error = %e, "Stream frame skipped"),
        }
    }
    tracing::debug!("Update loop stopped");
}

//! Prometheus Metrics Module
//!
//! Exposes synchronization metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Snapshots**: Poll cycles applied, skipped and failed
//! - **Updates**: Incremental updates by merge outcome
//! - **Connection**: Session state, reconnects, keep-alive failures
//! - **Table**: Row count and merge latency
//!
//! Recording before [`init_metrics`] is a no-op, so library code can record
//! unconditionally.
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_sync_snapshots_applied_total",
        "Snapshot cycles merged into the table"
    );
    describe_counter!(
        "ticker_sync_snapshot_ticks_skipped_total",
        "Poll ticks skipped because the previous fetch was still running"
    );
    describe_counter!(
        "ticker_sync_snapshot_fetch_failures_total",
        "REST fetch failures by resource"
    );
    describe_counter!(
        "ticker_sync_updates_total",
        "Incremental updates by merge outcome"
    );
    describe_counter!(
        "ticker_sync_decode_errors_total",
        "Payloads that failed to decode by source"
    );

    describe_gauge!(
        "ticker_sync_stream_connected",
        "1 while a streaming session is open"
    );
    describe_gauge!(
        "ticker_sync_subscribed_symbols",
        "Symbols in the current stream subscription"
    );
    describe_counter!(
        "ticker_sync_reconnects_total",
        "Stream reconnects by trigger"
    );
    describe_counter!(
        "ticker_sync_keepalive_failures_total",
        "Sessions dropped after an unanswered keep-alive probe"
    );
    describe_counter!(
        "ticker_sync_stream_errors_total",
        "Sessions dropped by transport faults"
    );
    describe_counter!(
        "ticker_sync_frames_dropped_total",
        "Inbound frames dropped because the consumer fell behind"
    );

    describe_gauge!("ticker_sync_table_rows", "Rows in the ticker table");
    describe_gauge!(
        "ticker_sync_last_snapshot_timestamp_seconds",
        "Unix time the last merged snapshot was fetched"
    );
    describe_histogram!(
        "ticker_sync_snapshot_lag_seconds",
        "Time from snapshot fetch to merge"
    );
    describe_histogram!(
        "ticker_sync_merge_seconds",
        "Time to merge one payload into the table"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Where a merged payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// REST snapshot.
    Snapshot,
    /// Streaming push.
    Stream,
}

impl UpdateSource {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Stream => "stream",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a snapshot cycle merged into the table.
pub fn record_snapshot_applied() {
    counter!("ticker_sync_snapshots_applied_total").increment(1);
}

/// Record a poll tick skipped while a fetch was in flight.
pub fn record_snapshot_tick_skipped() {
    counter!("ticker_sync_snapshot_ticks_skipped_total").increment(1);
}

/// Record a failed REST fetch of `resource`.
pub fn record_snapshot_fetch_failed(resource: &'static str) {
    counter!(
        "ticker_sync_snapshot_fetch_failures_total",
        "resource" => resource
    )
    .increment(1);
}

/// Record one incremental update with its merge outcome.
pub fn record_update(outcome: &'static str) {
    counter!(
        "ticker_sync_updates_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a payload that failed to decode.
pub fn record_decode_error(source: UpdateSource) {
    counter!(
        "ticker_sync_decode_errors_total",
        "source" => source.as_str()
    )
    .increment(1);
}

/// Set the stream connection gauge.
pub fn set_connected(connected: bool) {
    gauge!("ticker_sync_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Set the subscribed symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("ticker_sync_subscribed_symbols").set(count as f64);
}

/// Record a reconnect, labelled by what triggered it.
pub fn record_reconnect(trigger: &'static str) {
    counter!(
        "ticker_sync_reconnects_total",
        "trigger" => trigger
    )
    .increment(1);
}

/// Record a session lost to an unanswered keep-alive probe.
pub fn record_keep_alive_failure() {
    counter!("ticker_sync_keepalive_failures_total").increment(1);
}

/// Record a session lost to a transport fault.
pub fn record_stream_error() {
    counter!("ticker_sync_stream_errors_total").increment(1);
}

/// Record an inbound frame dropped under backpressure.
pub fn record_frame_dropped() {
    counter!("ticker_sync_frames_dropped_total").increment(1);
}

/// Set the table row count.
#[allow(clippy::cast_precision_loss)]
pub fn set_table_rows(count: usize) {
    gauge!("ticker_sync_table_rows").set(count as f64);
}

/// Record a merged snapshot's fetch time and how long it waited to merge.
#[allow(clippy::cast_precision_loss)]
pub fn record_snapshot_freshness(fetched_at: DateTime<Utc>, lag: Duration) {
    gauge!("ticker_sync_last_snapshot_timestamp_seconds")
        .set(fetched_at.timestamp_millis() as f64 / 1_000.0);
    histogram!("ticker_sync_snapshot_lag_seconds").record(lag.as_secs_f64());
}

/// Record how long one merge took.
pub fn record_merge_duration(source: UpdateSource, duration: Duration) {
    histogram!(
        "ticker_sync_merge_seconds",
        "source" => source.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

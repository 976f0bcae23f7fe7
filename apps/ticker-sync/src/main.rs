//! Ticker Sync Binary
//!
//! Starts the ticker synchronization engine against Korbit.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-sync
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//!
//! - `TICKER_SYNC_TICKER_URL`: REST ticker snapshot endpoint
//! - `TICKER_SYNC_CURRENCY_URL`: REST currency reference endpoint
//! - `TICKER_SYNC_STREAM_URL`: WebSocket endpoint
//! - `TICKER_SYNC_POLL_INTERVAL_MS`: Snapshot interval (default: 1000)
//! - `TICKER_SYNC_REQUEST_TIMEOUT_MS`: REST timeout (default: 5000)
//! - `TICKER_SYNC_KEEPALIVE_SECS`: Keep-alive period (default: 30)
//! - `TICKER_SYNC_KEEPALIVE_TIMEOUT_SECS`: Pong deadline (default: 10)
//! - `TICKER_SYNC_RECONNECT_INITIAL_MS` / `_MAX_MS` / `_MULTIPLIER`: Backoff
//! - `TICKER_SYNC_RECONNECT_MAX_ATTEMPTS`: Self-heal retries before giving up (default: unlimited)
//! - `TICKER_SYNC_QUOTE_SUFFIX`: Suffix stripped to join currency names (default: `_krw`)
//! - `TICKER_SYNC_STALENESS`: `last-write-wins` | `reject-older` (default: last-write-wins)
//! - `TICKER_SYNC_BOOKMARKS_PATH`: JSON bookmark file (default: in-memory)
//! - `TICKER_SYNC_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use ticker_sync::infrastructure::telemetry;
use ticker_sync::{
    BookmarkStore, Connection, EngineSettings, FeedClient, FeedConfig, HealthServer,
    HealthServerState, InMemoryBookmarkStore, JsonFileBookmarkStore, KorbitRestClient,
    SyncConfig, SyncEngine, SyncHandle, SyncSettings, TableEvent, WsTransport, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(otlp = telemetry_guard.is_exporting(), "Starting Ticker Sync");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = SyncConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn BookmarkStore> = match &config.bookmarks_path {
        Some(path) => Arc::new(JsonFileBookmarkStore::open(path).await?),
        None => Arc::new(InMemoryBookmarkStore::new()),
    };

    let rest = KorbitRestClient::new(
        config.endpoints.ticker_url.clone(),
        config.endpoints.currency_url.clone(),
        config.poll.request_timeout,
    )?;
    let connection = Connection::new(Arc::new(WsTransport), config.connection_config());
    let feed = FeedClient::new(Arc::new(rest), connection.clone(), FeedConfig::default());

    let sync = SyncHandle::spawn(
        store,
        SyncSettings {
            quote_suffix: config.quote_suffix.clone(),
            staleness: config.staleness,
            ..SyncSettings::default()
        },
    );

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        sync.watch(),
        connection.watch_status(),
    ));
    let health_server = HealthServer::new(
        config.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn table event logger
    tokio::spawn(log_table_events(sync.clone(), shutdown_token.clone()));

    let engine = SyncEngine::start(
        feed,
        sync,
        EngineSettings {
            stream_url: config.endpoints.stream_url.clone(),
            poll_interval: config.poll.interval,
        },
        &shutdown_token,
    )
    .await?;

    tracing::info!("Ticker sync ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, engine.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Engine did not stop in time"
        );
    }

    tracing::info!("Ticker sync stopped");
    Ok(())
}

/// Log table changes until shutdown.
async fn log_table_events(sync: SyncHandle, cancel: CancellationToken) {
    let mut events = sync.subscribe();
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(TableEvent::SnapshotApplied {
                inserted,
                replaced,
                first_load,
            }) => {
                if first_load {
                    tracing::info!(rows = inserted.len(), "Initial snapshot loaded");
                } else {
                    tracing::debug!(inserted = inserted.len(), replaced, "Snapshot applied");
                }
            }
            Ok(TableEvent::RowChanged(ticker)) => {
                tracing::trace!(symbol = %ticker.symbol, close = %ticker.data.close, "Row changed");
            }
            Ok(TableEvent::Notice(notice)) => {
                tracing::info!(message = notice.message(), "Notice");
            }
            Ok(TableEvent::PayloadRejected { source, reason }) => {
                tracing::warn!(source = source.as_str(), reason = %reason, "Payload rejected");
            }
            Ok(other) => tracing::debug!(event = ?other, "Table event"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Table event logger lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        poll_interval_ms = u64::try_from(config.poll.interval.as_millis()).unwrap_or(u64::MAX),
        keep_alive_secs = config.stream.keep_alive_interval.as_secs(),
        keep_alive_timeout_secs = config.stream.keep_alive_timeout.as_secs(),
        reconnect_max_attempts = config
            .stream
            .reconnect_max_attempts
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
        staleness = config.staleness.as_str(),
        bookmarks = config
            .bookmarks_path
            .as_ref()
            .map_or_else(|| "memory".to_string(), |p| p.display().to_string()),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ticker_url = %config.endpoints.ticker_url,
        currency_url = %config.endpoints.currency_url,
        stream_url = %config.endpoints.stream_url,
        "Korbit endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

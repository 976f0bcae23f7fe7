#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Ticker Sync - Real-time Market Ticker Synchronization
//!
//! Maintains one consistent, sortable ticker table for every symbol listed
//! on Korbit, fed by two upstream channels: a periodic REST snapshot and a
//! push-based WebSocket stream. Per-symbol bookmark flags live in an
//! external store and survive every merge.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Ticker table, merge rules, ordering and notices
//!   - `ticker`: Ticker entity and currency reference join
//!   - `table`: Snapshot/update merge with staleness rule
//!   - `sorting`: Sort keys, direction flipping and comparator
//!   - `notice`: Transient bookmark notices
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Bookmark store contract
//!   - `services`: Serialized synchronizer and the engine wiring it to the feed
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `korbit`: REST snapshots, WebSocket connection and feed client
//!   - `bookmarks`: In-memory and JSON file bookmark stores
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Korbit REST ──(every 1s)──┐
//!                           ├──► Synchronizer ──► TableView (watch)
//! Korbit WS ──(push)────────┘          │
//!                                      └──► TableEvent (broadcast)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Ticker table and merge rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::notice::{Notice, NoticeKind};
pub use domain::sorting::{SortDirection, SortKey, SortOrder};
pub use domain::table::{MergeOutcome, SnapshotOutcome, StalenessPolicy};
pub use domain::ticker::{CurrencyRef, Symbol, Ticker, TickerData, TickerUpdate};

// Application
pub use application::ports::{BookmarkStore, OverlayError};
pub use application::services::{
    EngineError, EngineSettings, SyncEngine, SyncError, SyncHandle, SyncSettings, TableEvent,
    TableView,
};

// Korbit adapters
pub use infrastructure::korbit::{
    Connection, ConnectionConfig, ConnectionState, ConnectionStatus, FeedClient, FeedConfig,
    KorbitRestClient, SnapshotPayload, SnapshotSource, WsTransport,
};

// Bookmark stores
pub use infrastructure::bookmarks::{InMemoryBookmarkStore, JsonFileBookmarkStore};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, EndpointSettings, PollSettings, StreamSettings, SyncConfig,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{UpdateSource, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

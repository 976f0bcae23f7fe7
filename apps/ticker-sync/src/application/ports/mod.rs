//! Port Interfaces
//!
//! Contracts the application layer depends on and infrastructure adapters
//! implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`BookmarkStore`]: persisted per-symbol bookmark flags

use async_trait::async_trait;

/// Failure reported by a bookmark store.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// Backing storage could not be read or written.
    #[error("bookmark storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bookmarks could not be parsed.
    #[error("bookmark storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Store refused the operation.
    #[error("bookmark store unavailable: {0}")]
    Unavailable(String),
}

/// Externally persisted bookmark flags keyed by symbol.
///
/// Implementations must tolerate concurrent calls; the storage mechanism
/// is their own business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Whether `id` is bookmarked.
    async fn is_bookmarked(&self, id: &str) -> Result<bool, OverlayError>;

    /// Bookmark `id`.
    async fn add(&self, id: &str) -> Result<(), OverlayError>;

    /// Remove the bookmark on `id`.
    async fn remove(&self, id: &str) -> Result<(), OverlayError>;

    /// Remove every bookmark.
    async fn clear_all(&self) -> Result<(), OverlayError>;

    /// Number of bookmarks.
    async fn count(&self) -> Result<usize, OverlayError>;
}

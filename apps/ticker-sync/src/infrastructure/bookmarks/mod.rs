//! Bookmark Store Adapters
//!
//! Implementations of [`BookmarkStore`]:
//!
//! - [`InMemoryBookmarkStore`]: process-local set, lost on exit
//! - [`JsonFileBookmarkStore`]: JSON array of symbols on disk, rewritten
//!   atomically (temp file + rename) on every change

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::application::ports::{BookmarkStore, OverlayError};

// =============================================================================
// In-Memory Store
// =============================================================================

/// Bookmarks held in memory.
#[derive(Debug, Default)]
pub struct InMemoryBookmarkStore {
    symbols: RwLock<HashSet<String>>,
}

impl InMemoryBookmarkStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `symbols`.
    #[must_use]
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: RwLock::new(symbols.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl BookmarkStore for InMemoryBookmarkStore {
    async fn is_bookmarked(&self, id: &str) -> Result<bool, OverlayError> {
        Ok(self.symbols.read().contains(id))
    }

    async fn add(&self, id: &str) -> Result<(), OverlayError> {
        self.symbols.write().insert(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), OverlayError> {
        self.symbols.write().remove(id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), OverlayError> {
        self.symbols.write().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, OverlayError> {
        Ok(self.symbols.read().len())
    }
}

// =============================================================================
// JSON File Store
// =============================================================================

/// Bookmarks persisted as a sorted JSON array of symbols.
#[derive(Debug)]
pub struct JsonFileBookmarkStore {
    path: PathBuf,
    symbols: Mutex<BTreeSet<String>>,
}

impl JsonFileBookmarkStore {
    /// Load bookmarks from `path`. A missing file is an empty store; the
    /// file is created on the first change.
    ///
    /// # Errors
    ///
    /// Returns `OverlayError::Io` if the file exists but cannot be read and
    /// `OverlayError::Corrupt` if it is not a JSON array of strings.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, OverlayError> {
        let path = path.into();
        let symbols = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<BTreeSet<String>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), bookmarks = symbols.len(), "Loaded bookmarks");

        Ok(Self {
            path,
            symbols: Mutex::new(symbols),
        })
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` and persist. Memory is only updated once the file
    /// write succeeded.
    async fn update(
        &self,
        change: impl FnOnce(&mut BTreeSet<String>) -> bool,
    ) -> Result<(), OverlayError> {
        let mut symbols = self.symbols.lock().await;
        let mut next = symbols.clone();
        if !change(&mut next) {
            return Ok(());
        }
        write_atomically(&self.path, &next).await?;
        *symbols = next;
        Ok(())
    }
}

async fn write_atomically(path: &Path, symbols: &BTreeSet<String>) -> Result<(), OverlayError> {
    let body = serde_json::to_vec_pretty(symbols)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!(path = %path.display(), bookmarks = symbols.len(), "Persisted bookmarks");
    Ok(())
}

#[async_trait]
impl BookmarkStore for JsonFileBookmarkStore {
    async fn is_bookmarked(&self, id: &str) -> Result<bool, OverlayError> {
        Ok(self.symbols.lock().await.contains(id))
    }

    async fn add(&self, id: &str) -> Result<(), OverlayError> {
        self.update(|s| s.insert(id.to_string())).await
    }

    async fn remove(&self, id: &str) -> Result<(), OverlayError> {
        self.update(|s| s.remove(id)).await
    }

    async fn clear_all(&self) -> Result<(), OverlayError> {
        self.update(|s| {
            let changed = !s.is_empty();
            s.clear();
            changed
        })
        .await
    }

    async fn count(&self) -> Result<usize, OverlayError> {
        Ok(self.symbols.lock().await.len())
    }
}

// =============================================================================
// Tests
// =============================================================================

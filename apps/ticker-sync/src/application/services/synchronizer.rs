//! Ticker Synchronizer
//!
//! Single owner of the ticker table. Snapshot merges, incremental merges,
//! bookmark mutations and sort changes are commands on one queue and are
//! applied strictly one at a time by the actor task.
//!
//! Readers never see the table itself:
//!
//! - [`SyncHandle::view`] / [`SyncHandle::watch`] return an immutable,
//!   sorted [`TableView`] replaced after every effective change.
//! - [`SyncHandle::subscribe`] yields [`TableEvent`]s, one per change.
//!
//! # Ordering
//!
//! A snapshot merge or sort change re-sorts the view. An incremental merge
//! replaces its row in place and keeps the current order until the next
//! re-sort.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::application::ports::{BookmarkStore, OverlayError};
use crate::domain::filter;
use crate::domain::notice::{Notice, NoticeKind};
use crate::domain::sorting::{SortKey, SortOrder};
use crate::domain::table::{
    MergeOutcome, ResolvedRow, SnapshotOutcome, StalenessPolicy, TickerTable,
};
use crate::domain::ticker::{
    CurrencyRef, DEFAULT_QUOTE_SUFFIX, ReferenceIndex, Symbol, Ticker, TickerUpdate,
};
use crate::infrastructure::korbit::{DecodeError, JsonCodec, SnapshotPayload};
use crate::infrastructure::metrics::{self, UpdateSource};

const COMMAND_BUFFER: usize = 1024;
const EVENT_BUFFER: usize = 1024;

// =============================================================================
// Errors
// =============================================================================

/// Synchronizer errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Payload could not be decoded; nothing was merged.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Bookmark store failed; the table is unchanged.
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    /// Symbol has no row.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),

    /// Synchronizer has shut down.
    #[error("synchronizer stopped")]
    Stopped,
}

// =============================================================================
// Observed State
// =============================================================================

/// Change notifications, in the order changes were applied.
#[derive(Debug, Clone, PartialEq)]
pub enum TableEvent {
    /// A snapshot was merged and the view re-sorted.
    SnapshotApplied {
        /// Symbols seen for the first time.
        inserted: Vec<Symbol>,
        /// Rows replaced.
        replaced: usize,
        /// Whether this was the first snapshot.
        first_load: bool,
    },
    /// One row's display fields changed.
    RowChanged(Ticker),
    /// One row's bookmark flag changed.
    BookmarkChanged {
        /// Row symbol.
        symbol: Symbol,
        /// New flag.
        bookmarked: bool,
    },
    /// Every bookmark was cleared.
    BookmarksCleared {
        /// Symbols whose rows were bookmarked.
        symbols: Vec<Symbol>,
    },
    /// A transient notice to show until its deadline.
    Notice(Notice),
    /// Sort order changed and the view was re-sorted.
    SortChanged(SortOrder),
    /// A payload was discarded.
    PayloadRejected {
        /// Which feed delivered it.
        source: UpdateSource,
        /// Why it was discarded.
        reason: String,
    },
}

/// Immutable, sorted copy of the table.
#[derive(Debug, Clone, Default)]
pub struct TableView {
    rows: Vec<Ticker>,
    positions: HashMap<Symbol, usize>,
    sort: SortOrder,
    loaded: bool,
    version: u64,
}

impl TableView {
    /// Rows in display order.
    #[must_use]
    pub fn rows(&self) -> &[Ticker] {
        &self.rows
    }

    /// Row for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Ticker> {
        self.positions.get(symbol).map(|&i| &self.rows[i])
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the first snapshot has been applied.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Order the rows are in.
    #[must_use]
    pub const fn sort(&self) -> SortOrder {
        self.sort
    }

    /// Bumped on every published change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Every symbol, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.positions.keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Rows whose display name or symbol contains `query`, in display order.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&Ticker> {
        self.rows
            .iter()
            .filter(|row| filter::matches(row, query))
            .collect()
    }

    /// Bookmarked rows matching `query`, in display order.
    #[must_use]
    pub fn bookmarked(&self, query: &str) -> Vec<&Ticker> {
        self.rows
            .iter()
            .filter(|row| row.bookmark && filter::matches(row, query))
            .collect()
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Synchronizer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Suffix stripped from symbols to join currency names.
    pub quote_suffix: String,
    /// Staleness rule.
    pub staleness: StalenessPolicy,
    /// Initial sort.
    pub sort: SortOrder,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            quote_suffix: DEFAULT_QUOTE_SUFFIX.to_string(),
            staleness: StalenessPolicy::default(),
            sort: SortOrder::default(),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    ApplySnapshot {
        rows: Vec<TickerUpdate>,
        references: Vec<CurrencyRef>,
        reply: oneshot::Sender<SnapshotOutcome>,
    },
    ApplyUpdate {
        update: TickerUpdate,
        reply: oneshot::Sender<MergeOutcome>,
    },
    ToggleBookmark {
        symbol: Symbol,
        reply: oneshot::Sender<Result<Notice, SyncError>>,
    },
    ClearBookmarks {
        reply: oneshot::Sender<Result<Notice, SyncError>>,
    },
    SelectSort {
        key: SortKey,
        reply: oneshot::Sender<SortOrder>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the synchronizer actor.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<Arc<TableView>>,
    events: broadcast::Sender<TableEvent>,
    codec: JsonCodec,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.view.borrow();
        f.debug_struct("SyncHandle")
            .field("rows", &view.len())
            .field("loaded", &view.is_loaded())
            .field("version", &view.version())
            .finish_non_exhaustive()
    }
}

impl SyncHandle {
    /// Start the actor with an empty table.
    #[must_use]
    pub fn spawn(store: Arc<dyn BookmarkStore>, settings: SyncSettings) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let initial = TableView {
            sort: settings.sort,
            ..TableView::default()
        };
        let (view_tx, view) = watch::channel(Arc::new(initial));

        let actor = Synchronizer {
            table: TickerTable::new(settings.staleness),
            order: settings.sort,
            rows: Vec::new(),
            positions: HashMap::new(),
            version: 0,
            store,
            quote_suffix: settings.quote_suffix,
            view_tx,
            events_tx: events.clone(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            commands,
            view,
            events,
            codec: JsonCodec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Merges
    // -------------------------------------------------------------------------

    /// Merge a decoded snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Stopped` after shutdown.
    pub async fn apply_snapshot(
        &self,
        rows: Vec<TickerUpdate>,
        references: Vec<CurrencyRef>,
    ) -> Result<SnapshotOutcome, SyncError> {
        self.request(|reply| Command::ApplySnapshot {
            rows,
            references,
            reply,
        })
        .await
    }

    /// Merge one decoded incremental update.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Stopped` after shutdown.
    pub async fn apply_incremental_update(
        &self,
        update: TickerUpdate,
    ) -> Result<MergeOutcome, SyncError> {
        self.request(|reply| Command::ApplyUpdate { update, reply })
            .await
    }

    /// Decode and merge a raw snapshot cycle.
    ///
    /// A currency payload that is missing or undecodable leaves names
    /// unresolved for this cycle; known names are kept by the merge.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Decode` if the ticker payload is unusable; the
    /// table keeps its prior state.
    pub async fn ingest_snapshot(
        &self,
        payload: &SnapshotPayload,
    ) -> Result<SnapshotOutcome, SyncError> {
        let rows = match self.codec.decode_tickers(&payload.tickers) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping snapshot cycle");
                self.reject(UpdateSource::Snapshot, &e);
                return Err(e.into());
            }
        };

        let references = match payload.currencies.as_deref().map(|body| self.codec.decode_currencies(body)) {
            Some(Ok(references)) => references,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Currency payload unusable, names unresolved this cycle");
                self.reject(UpdateSource::Snapshot, &e);
                Vec::new()
            }
            None => Vec::new(),
        };

        self.apply_snapshot(rows, references).await
    }

    /// Decode a raw stream frame and merge every update in it.
    ///
    /// Malformed entries are logged and skipped without blocking the rest.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Decode` if the frame is not JSON, or
    /// `SyncError::Stopped` after shutdown.
    pub async fn ingest_frame(&self, frame: &str) -> Result<Vec<MergeOutcome>, SyncError> {
        let decoded = match self.codec.decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping stream frame");
                self.reject(UpdateSource::Stream, &e);
                return Err(e.into());
            }
        };

        for e in &decoded.rejected {
            tracing::warn!(error = %e, "Dropping malformed ticker entry");
            self.reject(UpdateSource::Stream, e);
        }

        let mut outcomes = Vec::with_capacity(decoded.updates.len());
        for update in decoded.updates {
            outcomes.push(self.apply_incremental_update(update).await?);
        }
        Ok(outcomes)
    }

    // -------------------------------------------------------------------------
    // Bookmarks and Sorting
    // -------------------------------------------------------------------------

    /// Flip the bookmark of `symbol` in the store and in the table.
    ///
    /// The returned notice expires 0.7s after issue; the caller hides it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownSymbol` if the symbol has no row and
    /// `SyncError::Overlay` if the store fails.
    pub async fn toggle_bookmark(&self, symbol: impl Into<Symbol>) -> Result<Notice, SyncError> {
        let symbol = symbol.into();
        self.request(|reply| Command::ToggleBookmark { symbol, reply })
            .await?
    }

    /// Clear every bookmark.
    ///
    /// Returns "nothing to clear" without touching the store's `clear_all`
    /// when no bookmark exists. Either notice expires 1s after issue.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Overlay` if the store fails.
    pub async fn clear_all_bookmarks(&self) -> Result<Notice, SyncError> {
        self.request(|reply| Command::ClearBookmarks { reply })
            .await?
    }

    /// Select a sort key: same key flips direction, another key sorts
    /// descending.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Stopped` after shutdown.
    pub async fn select_sort(&self, key: SortKey) -> Result<SortOrder, SyncError> {
        self.request(|reply| Command::SelectSort { key, reply })
            .await
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Current view.
    #[must_use]
    pub fn view(&self) -> Arc<TableView> {
        Arc::clone(&self.view.borrow())
    }

    /// View updates.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<TableView>> {
        self.view.clone()
    }

    /// Change notifications from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.events.subscribe()
    }

    /// Clear the table and stop the actor. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .request(|reply| Command::Shutdown { reply })
            .await
            .is_err()
        {
            tracing::debug!("Synchronizer already stopped");
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SyncError::Stopped)?;
        rx.await.map_err(|_| SyncError::Stopped)
    }

    fn reject(&self, source: UpdateSource, error: &DecodeError) {
        metrics::record_decode_error(source);
        // No subscribers is fine.
        let _ = self.events.send(TableEvent::PayloadRejected {
            source,
            reason: error.to_string(),
        });
    }
}

// =============================================================================
// Actor
// =============================================================================

struct Synchronizer {
    table: TickerTable,
    order: SortOrder,
    rows: Vec<Ticker>,
    positions: HashMap<Symbol, usize>,
    version: u64,
    store: Arc<dyn BookmarkStore>,
    quote_suffix: String,
    view_tx: watch::Sender<Arc<TableView>>,
    events_tx: broadcast::Sender<TableEvent>,
}

impl Synchronizer {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!(policy = %self.table.policy(), "Synchronizer started");

        while let Some(command) = commands.recv().await {
            match command {
                Command::ApplySnapshot {
                    rows,
                    references,
                    reply,
                } => {
                    let outcome = self.apply_snapshot(rows, &references).await;
                    let _ = reply.send(outcome);
                }
                Command::ApplyUpdate { update, reply } => {
                    let _ = reply.send(self.apply_update(update));
                }
                Command::ToggleBookmark { symbol, reply } => {
                    let _ = reply.send(self.toggle_bookmark(symbol).await);
                }
                Command::ClearBookmarks { reply } => {
                    let _ = reply.send(self.clear_bookmarks().await);
                }
                Command::SelectSort { key, reply } => {
                    let _ = reply.send(self.select_sort(key));
                }
                Command::Shutdown { reply } => {
                    self.table.clear();
                    self.resort();
                    tracing::info!("Synchronizer stopped, table cleared");
                    let _ = reply.send(());
                    return;
                }
            }
        }
        tracing::debug!("All handles dropped, synchronizer exiting");
    }

    async fn apply_snapshot(
        &mut self,
        rows: Vec<TickerUpdate>,
        references: &[CurrencyRef],
    ) -> SnapshotOutcome {
        let started = Instant::now();
        let index = ReferenceIndex::new(references, &self.quote_suffix);

        let mut resolved = Vec::with_capacity(rows.len());
        for update in rows {
            let full_name = index.resolve(&update.symbol).map(str::to_string);
            let bookmark = match self.store.is_bookmarked(&update.symbol).await {
                Ok(flag) => Some(flag),
                Err(e) => {
                    tracing::warn!(symbol = %update.symbol, error = %e, "Bookmark lookup failed, keeping current flag");
                    None
                }
            };
            resolved.push(ResolvedRow {
                update,
                full_name,
                bookmark,
            });
        }

        let outcome = self.table.apply_snapshot(resolved);
        self.resort();

        metrics::record_snapshot_applied();
        metrics::set_table_rows(self.table.len());
        metrics::record_merge_duration(UpdateSource::Snapshot, started.elapsed());
        if outcome.first_load {
            tracing::info!(rows = self.table.len(), "Ticker table loaded");
        }
        tracing::debug!(
            inserted = outcome.inserted.len(),
            replaced = outcome.replaced.len(),
            stale = outcome.stale.len(),
            "Snapshot applied"
        );

        self.emit(TableEvent::SnapshotApplied {
            inserted: outcome.inserted.clone(),
            replaced: outcome.replaced.len(),
            first_load: outcome.first_load,
        });
        outcome
    }

    fn apply_update(&mut self, update: TickerUpdate) -> MergeOutcome {
        let started = Instant::now();
        let symbol = update.symbol.clone();
        let outcome = self.table.apply_update(update);
        metrics::record_update(outcome.as_str());

        match &outcome {
            MergeOutcome::Applied(row) => {
                self.replace_row(row.clone());
                metrics::record_merge_duration(UpdateSource::Stream, started.elapsed());
                self.emit(TableEvent::RowChanged(row.clone()));
            }
            MergeOutcome::UnknownSymbol => {
                tracing::trace!(symbol = %symbol, "Dropping update for unknown symbol");
            }
            MergeOutcome::Unchanged | MergeOutcome::Stale => {
                tracing::trace!(symbol = %symbol, outcome = outcome.as_str(), "Update not applied");
            }
        }
        outcome
    }

    async fn toggle_bookmark(&mut self, symbol: Symbol) -> Result<Notice, SyncError> {
        if !self.table.contains(&symbol) {
            return Err(SyncError::UnknownSymbol(symbol));
        }

        let was_bookmarked = self.store.is_bookmarked(&symbol).await?;
        if was_bookmarked {
            self.store.remove(&symbol).await?;
        } else {
            self.store.add(&symbol).await?;
        }
        let bookmarked = !was_bookmarked;

        if let Some(row) = self.table.set_bookmark(&symbol, bookmarked) {
            self.replace_row(row);
        }
        tracing::debug!(symbol = %symbol, bookmarked, "Bookmark toggled");

        let notice = Notice::toggled(symbol.clone(), bookmarked);
        self.emit(TableEvent::BookmarkChanged { symbol, bookmarked });
        self.emit(TableEvent::Notice(notice.clone()));
        Ok(notice)
    }

    async fn clear_bookmarks(&mut self) -> Result<Notice, SyncError> {
        if self.store.count().await? == 0 {
            let notice = Notice::issue(NoticeKind::NothingToClear, None);
            self.emit(TableEvent::Notice(notice.clone()));
            return Ok(notice);
        }

        self.store.clear_all().await?;
        let symbols = self.table.clear_bookmarks();
        for symbol in &symbols {
            if let Some(row) = self.table.get(symbol).cloned() {
                self.patch_row(row);
            }
        }
        self.publish();
        tracing::info!(cleared = symbols.len(), "Bookmarks cleared");

        let notice = Notice::issue(NoticeKind::BookmarksCleared, None);
        self.emit(TableEvent::BookmarksCleared { symbols });
        self.emit(TableEvent::Notice(notice.clone()));
        Ok(notice)
    }

    fn select_sort(&mut self, key: SortKey) -> SortOrder {
        self.order = self.order.select(key);
        self.resort();
        tracing::debug!(key = key.as_str(), direction = ?self.order.direction, "Sort changed");
        self.emit(TableEvent::SortChanged(self.order));
        self.order
    }

    // -------------------------------------------------------------------------
    // View Publication
    // -------------------------------------------------------------------------

    fn resort(&mut self) {
        self.rows = self.table.ordered(&self.order);
        self.positions = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.symbol.clone(), i))
            .collect();
        self.publish();
    }

    fn replace_row(&mut self, row: Ticker) {
        if self.patch_row(row) {
            self.publish();
        }
    }

    fn patch_row(&mut self, row: Ticker) -> bool {
        match self.positions.get(&row.symbol) {
            Some(&i) => {
                self.rows[i] = row;
                true
            }
            None => false,
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        self.view_tx.send_replace(Arc::new(TableView {
            rows: self.rows.clone(),
            positions: self.positions.clone(),
            sort: self.order,
            loaded: self.table.is_loaded(),
            version: self.version,
        }));
    }

    fn emit(&self, event: TableEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

// =============================================================================
// Tests
// =============================================================================

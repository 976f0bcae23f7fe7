//! Ticker Table
//!
//! The authoritative symbol → [`Ticker`] map and the merge rules applied to
//! it. Everything here is synchronous and side-effect free apart from the
//! table itself; overlay lookups happen before a merge and arrive as
//! [`ResolvedRow`]s, so each merge call is atomic.
//!
//! # Merge rules
//!
//! - Snapshots insert new symbols and replace the upstream fields of known
//!   ones. Overlay fields are replaced only by resolved values.
//! - Incremental updates never add symbols. An update that leaves every
//!   display field unchanged is a no-op.
//! - Overlay fields are never cleared by a data-only merge.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::sorting::SortOrder;
use super::ticker::{Symbol, Ticker, TickerUpdate};

// =============================================================================
// Staleness Policy
// =============================================================================

/// How merges treat payloads whose `last_traded_at` is older than the row's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StalenessPolicy {
    /// Apply every payload in dequeue order.
    #[default]
    LastWriteWins,
    /// Skip upstream fields older than the current row's.
    RejectOlder,
}

impl StalenessPolicy {
    /// Configuration label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastWriteWins => "last-write-wins",
            Self::RejectOlder => "reject-older",
        }
    }

    const fn rejects(self, current: i64, incoming: i64) -> bool {
        matches!(self, Self::RejectOlder) && incoming < current
    }
}

impl fmt::Display for StalenessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized staleness policy label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown staleness policy '{0}' (expected last-write-wins or reject-older)")]
pub struct ParseStalenessError(pub String);

impl FromStr for StalenessPolicy {
    type Err = ParseStalenessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-write-wins" | "lww" => Ok(Self::LastWriteWins),
            "reject-older" => Ok(Self::RejectOlder),
            other => Err(ParseStalenessError(other.to_string())),
        }
    }
}

// =============================================================================
// Merge Inputs and Outcomes
// =============================================================================

/// A snapshot row with its overlay fields already looked up.
///
/// `None` means the overlay value could not be resolved for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRow {
    /// Upstream payload.
    pub update: TickerUpdate,
    /// Joined display name.
    pub full_name: Option<String>,
    /// Bookmark state reported by the overlay.
    pub bookmark: Option<bool>,
}

/// Result of a snapshot merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    /// Symbols seen for the first time.
    pub inserted: Vec<Symbol>,
    /// Known symbols whose rows were replaced.
    pub replaced: Vec<Symbol>,
    /// Known symbols whose upstream fields were kept because the payload was older.
    pub stale: Vec<Symbol>,
    /// Whether this merge flipped the table to loaded.
    pub first_load: bool,
}

impl SnapshotOutcome {
    /// Whether the symbol universe grew.
    #[must_use]
    pub fn universe_changed(&self) -> bool {
        !self.inserted.is_empty()
    }
}

/// Result of an incremental merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Row changed; carries the new row.
    Applied(Ticker),
    /// Display fields identical; row untouched.
    Unchanged,
    /// Payload older than the row under [`StalenessPolicy::RejectOlder`].
    Stale,
    /// Symbol not in the table; update dropped.
    UnknownSymbol,
}

impl MergeOutcome {
    /// Metrics label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Unchanged => "unchanged",
            Self::Stale => "stale",
            Self::UnknownSymbol => "unknown_symbol",
        }
    }
}

// =============================================================================
// Table
// =============================================================================

/// Symbol-keyed ticker rows plus the first-load gate.
#[derive(Debug, Clone, Default)]
pub struct TickerTable {
    rows: HashMap<Symbol, Ticker>,
    loaded: bool,
    policy: StalenessPolicy,
}

impl TickerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(policy: StalenessPolicy) -> Self {
        Self {
            rows: HashMap::new(),
            loaded: false,
            policy,
        }
    }

    /// Merge a full snapshot.
    pub fn apply_snapshot(&mut self, incoming: Vec<ResolvedRow>) -> SnapshotOutcome {
        let mut outcome = SnapshotOutcome::default();

        for row in incoming {
            let ResolvedRow {
                update,
                full_name,
                bookmark,
            } = row;

            if let Some(existing) = self.rows.get_mut(&update.symbol) {
                if full_name.is_some() {
                    existing.full_name = full_name;
                }
                if let Some(flag) = bookmark {
                    existing.bookmark = flag;
                }
                if self
                    .policy
                    .rejects(existing.data.last_traded_at, update.data.last_traded_at)
                {
                    outcome.stale.push(update.symbol);
                } else {
                    existing.data = update.data;
                    outcome.replaced.push(update.symbol);
                }
            } else {
                let symbol = update.symbol.clone();
                let mut ticker = Ticker::from_update(update);
                ticker.full_name = full_name;
                ticker.bookmark = bookmark.unwrap_or(false);
                self.rows.insert(symbol.clone(), ticker);
                outcome.inserted.push(symbol);
            }
        }

        outcome.first_load = !self.loaded;
        self.loaded = true;
        outcome
    }

    /// Merge one incremental update.
    pub fn apply_update(&mut self, update: TickerUpdate) -> MergeOutcome {
        let Some(existing) = self.rows.get_mut(&update.symbol) else {
            return MergeOutcome::UnknownSymbol;
        };
        if self
            .policy
            .rejects(existing.data.last_traded_at, update.data.last_traded_at)
        {
            return MergeOutcome::Stale;
        }
        if !existing.data.differs_for_display(&update.data) {
            return MergeOutcome::Unchanged;
        }
        existing.data = update.data;
        MergeOutcome::Applied(existing.clone())
    }

    /// Set the bookmark flag of `symbol`. Returns the updated row.
    pub fn set_bookmark(&mut self, symbol: &str, bookmarked: bool) -> Option<Ticker> {
        let row = self.rows.get_mut(symbol)?;
        row.bookmark = bookmarked;
        Some(row.clone())
    }

    /// Clear every bookmark flag. Returns the symbols that were bookmarked.
    pub fn clear_bookmarks(&mut self) -> Vec<Symbol> {
        let mut cleared: Vec<Symbol> = self
            .rows
            .values_mut()
            .filter(|row| row.bookmark)
            .map(|row| {
                row.bookmark = false;
                row.symbol.clone()
            })
            .collect();
        cleared.sort_unstable();
        cleared
    }

    /// Row for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Ticker> {
        self.rows.get(symbol)
    }

    /// Whether `symbol` has a row.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.rows.contains_key(symbol)
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

    /// Whether a snapshot has been applied since creation or the last clear.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Active staleness policy.
    #[must_use]
    pub const fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// All symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.rows.keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Rows ordered by `order`.
    #[must_use]
    pub fn ordered(&self, order: &SortOrder) -> Vec<Ticker> {
        let mut rows: Vec<Ticker> = self.rows.values().cloned().collect();
        order.sort(&mut rows);
        rows
    }

    /// Drop every row and reset the first-load gate.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.loaded = false;
    }
}

// =============================================================================
// Tests
// =============================================================================

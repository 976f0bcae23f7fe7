//! Table Ordering
//!
//! Total order over ticker rows, parameterized by a [`SortKey`] and a
//! [`SortDirection`]. Rows whose primary keys compare equal always fall back
//! to ascending symbol order, whatever the direction, so every ordering is
//! deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::ticker::Ticker;

/// Column a table can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    /// Display name (full name, else symbol), case-insensitive.
    Symbol,
    /// Last traded price.
    ClosePrice,
    /// Percentage change.
    ChangePercent,
    /// Quote-currency volume.
    QuoteVolume,
}

impl SortKey {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::ClosePrice => "close_price",
            Self::ChangePercent => "change_percent",
            Self::QuoteVolume => "quote_volume",
        }
    }
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// The other direction.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

/// Active ordering of the observed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOrder {
    /// Primary key.
    pub key: SortKey,
    /// Direction applied to the primary key.
    pub direction: SortDirection,
}

impl Default for SortOrder {
    /// Highest quote volume first.
    fn default() -> Self {
        Self::new(SortKey::QuoteVolume, SortDirection::Descending)
    }
}

impl SortOrder {
    /// Create an ordering.
    #[must_use]
    pub const fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Ordering after the user picks `key`.
    ///
    /// Picking the active key flips direction; picking another key starts
    /// descending.
    #[must_use]
    pub fn select(self, key: SortKey) -> Self {
        if self.key == key {
            Self::new(key, self.direction.flipped())
        } else {
            Self::new(key, SortDirection::Descending)
        }
    }

    /// Compare two rows.
    #[must_use]
    pub fn compare(&self, a: &Ticker, b: &Ticker) -> Ordering {
        let primary = match self.key {
            SortKey::Symbol => compare_names(a.display_name(), b.display_name()),
            SortKey::ClosePrice => compare_numeric(&a.data.close, &b.data.close),
            SortKey::ChangePercent => {
                compare_numeric(&a.data.price_change_percent, &b.data.price_change_percent)
            }
            SortKey::QuoteVolume => compare_numeric(&a.data.quote_volume, &b.data.quote_volume),
        };
        let primary = match self.direction {
            SortDirection::Ascending => primary,
            SortDirection::Descending => primary.reverse(),
        };
        primary.then_with(|| a.symbol.cmp(&b.symbol))
    }

    /// Sort `rows` in place.
    pub fn sort(&self, rows: &mut [Ticker]) {
        rows.sort_by(|a, b| self.compare(a, b));
    }
}

/// Parse an upstream numeric field. Unparsable and non-finite values count as zero.
#[must_use]
pub fn numeric_value(text: &str) -> f64 {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    numeric_value(a).total_cmp(&numeric_value(b))
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

// =============================================================================
// Tests
// =============================================================================

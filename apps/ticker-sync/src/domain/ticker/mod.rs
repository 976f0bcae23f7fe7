//! Ticker Entity
//!
//! Canonical per-symbol ticker row plus the upstream field block it is
//! refreshed from. Numeric fields are kept as the text the exchange sends;
//! interpretation happens at the edges (sorting, display).
//!
//! A [`Ticker`] carries two kinds of data:
//!
//! - **Upstream fields** ([`TickerData`]): replaced wholesale on every merge.
//! - **Overlay fields** (`full_name`, `bookmark`): locally owned, never
//!   supplied by the stream, copied forward across merges.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Trading symbol, e.g. `btc_krw`.
pub type Symbol = String;

/// Quote-currency suffix stripped from a symbol before joining currency names.
pub const DEFAULT_QUOTE_SUFFIX: &str = "_krw";

// =============================================================================
// Upstream Field Block
// =============================================================================

/// Fields sourced from the exchange, identical across REST and stream payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerData {
    /// Opening price.
    #[serde(default)]
    pub open: String,
    /// Session high.
    #[serde(default)]
    pub high: String,
    /// Session low.
    #[serde(default)]
    pub low: String,
    /// Last traded price.
    #[serde(default)]
    pub close: String,
    /// Previous session close.
    #[serde(default)]
    pub prev_close: String,
    /// Absolute change versus previous close.
    #[serde(default)]
    pub price_change: String,
    /// Percentage change versus previous close.
    #[serde(default)]
    pub price_change_percent: String,
    /// Base-currency volume.
    #[serde(default)]
    pub volume: String,
    /// Quote-currency volume.
    #[serde(default)]
    pub quote_volume: String,
    /// Best bid.
    #[serde(default)]
    pub best_bid_price: String,
    /// Best ask.
    #[serde(default)]
    pub best_ask_price: String,
    /// Last trade time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_traded_at: i64,
}

impl TickerData {
    /// Whether any field that drives re-render differs from `other`.
    ///
    /// Only `close`, `price_change_percent` and `quote_volume` are compared;
    /// changes confined to other fields do not count as a row change.
    #[must_use]
    pub fn differs_for_display(&self, other: &Self) -> bool {
        self.close != other.close
            || self.price_change_percent != other.price_change_percent
            || self.quote_volume != other.quote_volume
    }
}

/// One symbol's upstream payload, as carried by a snapshot row or a stream push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerUpdate {
    /// Symbol the payload belongs to.
    pub symbol: Symbol,
    /// Upstream fields.
    #[serde(flatten)]
    pub data: TickerData,
}

impl TickerUpdate {
    /// Create an update for `symbol`.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, data: TickerData) -> Self {
        Self {
            symbol: symbol.into(),
            data,
        }
    }
}

// =============================================================================
// Ticker Row
// =============================================================================

/// A row of the ticker table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Unique, immutable key.
    pub symbol: Symbol,
    /// Upstream fields from the latest merge.
    #[serde(flatten)]
    pub data: TickerData,
    /// Display name joined from the currency reference set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Whether the user bookmarked this symbol.
    #[serde(default)]
    pub bookmark: bool,
}

impl Ticker {
    /// Build a fresh row with no overlay information.
    #[must_use]
    pub fn from_update(update: TickerUpdate) -> Self {
        Self {
            symbol: update.symbol,
            data: update.data,
            full_name: None,
            bookmark: false,
        }
    }

    /// Name shown to users: the resolved full name, falling back to the symbol.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.symbol)
    }
}

// =============================================================================
// Currency Reference
// =============================================================================

/// Currency metadata used to resolve a ticker's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRef {
    /// Currency code, e.g. `btc`.
    pub name: String,
    /// Human readable name, e.g. `Bitcoin`.
    #[serde(default)]
    pub full_name: String,
}

impl CurrencyRef {
    /// Create a reference entry.
    #[must_use]
    pub fn new(name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_name: full_name.into(),
        }
    }
}

/// Lookup from currency code to display name, keyed the way symbols join.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    names: HashMap<String, String>,
    quote_suffix: String,
}

impl ReferenceIndex {
    /// Index `references`, stripping `quote_suffix` from symbols at lookup time.
    ///
    /// Entries with an empty full name are skipped so they never resolve.
    #[must_use]
    pub fn new(references: &[CurrencyRef], quote_suffix: &str) -> Self {
        let names = references
            .iter()
            .filter(|r| !r.full_name.is_empty())
            .map(|r| (r.name.clone(), r.full_name.clone()))
            .collect();
        Self {
            names,
            quote_suffix: quote_suffix.to_string(),
        }
    }

    /// Join key for a symbol: the symbol with the quote suffix removed.
    #[must_use]
    pub fn join_key<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.strip_suffix(self.quote_suffix.as_str()).unwrap_or(symbol)
    }

    /// Resolve the display name for `symbol`.
    #[must_use]
    pub fn resolve(&self, symbol: &str) -> Option<&str> {
        self.names.get(self.join_key(symbol)).map(String::as_str)
    }

    /// Number of resolvable currencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no currency resolves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn data(close: &str, pct: &str, qv: &str) -> TickerData {
        TickerData {
            close: close.to_string(),
            price_change_percent: pct.to_string(),
            quote_volume: qv.to_string(),
            ..TickerData::default()
        }
    }

    #[test]
    fn display_fields_drive_change_detection() {
        let base = data("100", "1.0", "5000");
        assert!(!base.differs_for_display(&base.clone()));
        assert!(base.differs_for_display(&data("101", "1.0", "5000")));
        assert!(base.differs_for_display(&data("100", "1.1", "5000")));
        assert!(base.differs_for_display(&data("100", "1.0", "5001")));
    }

    #[test]
    fn non_display_fields_are_ignored() {
        let base = data("100", "1.0", "5000");
        let mut other = base.clone();
        other.volume = "42".to_string();
        other.best_bid_price = "99".to_string();
        other.last_traded_at = 12;
        assert!(!base.differs_for_display(&other));
    }

    #[test]
    fn join_key_strips_quote_suffix_only_at_end() {
        let index = ReferenceIndex::new(&[], DEFAULT_QUOTE_SUFFIX);
        assert_eq!(index.join_key("btc_krw"), "btc");
        assert_eq!(index.join_key("eth"), "eth");
        assert_eq!(index.join_key("_krwx_krw"), "_krwx");
    }

    #[test]
    fn resolve_skips_blank_names() {
        let index = ReferenceIndex::new(
            &[CurrencyRef::new("btc", "Bitcoin"), CurrencyRef::new("xrp", "")],
            DEFAULT_QUOTE_SUFFIX,
        );
        assert_eq!(index.resolve("btc_krw"), Some("Bitcoin"));
        assert_eq!(index.resolve("xrp_krw"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn display_name_falls_back_to_symbol() {
        let mut ticker = Ticker::from_update(TickerUpdate::new("eth_krw", TickerData::default()));
        assert_eq!(ticker.display_name(), "eth_krw");
        ticker.full_name = Some("Ethereum".to_string());
        assert_eq!(ticker.display_name(), "Ethereum");
    }

    #[test]
    fn update_deserializes_flat_rest_row() {
        let json = r#"{"symbol":"btc_krw","close":"100","priceChangePercent":"1.5","quoteVolume":"9","lastTradedAt":7}"#;
        let update: TickerUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.symbol, "btc_krw");
        assert_eq!(update.data.close, "100");
        assert_eq!(update.data.price_change_percent, "1.5");
        assert_eq!(update.data.last_traded_at, 7);
        assert!(update.data.open.is_empty());
    }
}

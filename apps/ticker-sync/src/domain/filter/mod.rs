//! Search filter over the observed table.

use super::ticker::Ticker;

/// Whether `ticker` matches a free-text `query`.
///
/// Matches when the display name or the symbol contains the query,
/// ignoring case. A blank query matches everything.
#[must_use]
pub fn matches(ticker: &Ticker, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    ticker
        .full_name
        .as_deref()
        .is_some_and(|name| name.to_lowercase().contains(&needle))
        || ticker.symbol.to_lowercase().contains(&needle)
}

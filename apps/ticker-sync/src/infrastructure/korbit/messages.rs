//! Korbit Wire Messages
//!
//! Serde shapes for the REST envelopes, the streaming push frames and the
//! subscribe request. Field names follow the exchange's camelCase JSON.

use serde::{Deserialize, Serialize};

use crate::domain::ticker::{Symbol, TickerData, TickerUpdate};

/// Channel name for ticker pushes and subscriptions.
pub const TICKER_CHANNEL: &str = "ticker";

/// Subscribe method name.
pub const SUBSCRIBE_METHOD: &str = "subscribe";

/// REST response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Whether the exchange served the request.
    pub success: bool,
    /// Payload rows.
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// One streaming push frame.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPush {
    /// Channel the frame belongs to.
    #[serde(rename = "type")]
    pub channel: String,
    /// Server send time in milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Symbol the frame describes.
    pub symbol: Symbol,
    /// Set on the initial frame sent right after subscribing.
    #[serde(default)]
    pub snapshot: Option<bool>,
    /// Upstream fields.
    pub data: TickerData,
}

impl From<TickerPush> for TickerUpdate {
    fn from(push: TickerPush) -> Self {
        Self::new(push.symbol, push.data)
    }
}

/// Subscribe request for the ticker channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Always `subscribe`.
    pub method: &'static str,
    /// Channel name.
    #[serde(rename = "type")]
    pub channel: &'static str,
    /// Symbols of interest.
    pub symbols: Vec<Symbol>,
}

impl SubscribeRequest {
    /// Ticker subscription for `symbols`.
    #[must_use]
    pub const fn ticker(symbols: Vec<Symbol>) -> Self {
        Self {
            method: SUBSCRIBE_METHOD,
            channel: TICKER_CHANNEL,
            symbols,
        }
    }
}

//! JSON Codec
//!
//! Decodes REST envelopes and streaming frames into domain payloads and
//! encodes the subscribe request.
//!
//! The stream may deliver a single object or an array of objects. Only
//! `ticker` frames carry data; anything else (subscription acknowledgements,
//! status frames) is skipped.

use crate::domain::ticker::{CurrencyRef, Symbol, TickerUpdate};
use crate::infrastructure::korbit::messages::{
    Envelope, SubscribeRequest, TICKER_CHANNEL, TickerPush,
};

/// Decode errors. Recoverable: the offending cycle or frame is skipped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// JSON parsing failed.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// REST envelope reported `success: false`.
    #[error("{endpoint} responded with success=false")]
    Unsuccessful {
        /// Which REST resource.
        endpoint: &'static str,
    },

    /// Payload was neither a JSON object nor an array.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// Result of decoding one streaming frame.
///
/// A malformed entry is reported in `rejected` without discarding the
/// well-formed entries next to it.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Ticker updates in frame order.
    pub updates: Vec<TickerUpdate>,
    /// Entries that looked like ticker pushes but failed to decode.
    pub rejected: Vec<DecodeError>,
}

/// JSON codec for the Korbit REST and streaming APIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode the ticker snapshot envelope.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or an unsuccessful envelope.
    pub fn decode_tickers(&self, text: &str) -> Result<Vec<TickerUpdate>, DecodeError> {
        Self::decode_envelope(text, "tickers")
    }

    /// Decode the currency reference envelope.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or an unsuccessful envelope.
    pub fn decode_currencies(&self, text: &str) -> Result<Vec<CurrencyRef>, DecodeError> {
        Self::decode_envelope(text, "currencies")
    }

    fn decode_envelope<T: serde::de::DeserializeOwned>(
        text: &str,
        endpoint: &'static str,
    ) -> Result<Vec<T>, DecodeError> {
        let envelope: Envelope<T> = serde_json::from_str(text)?;
        if !envelope.success {
            return Err(DecodeError::Unsuccessful { endpoint });
        }
        Ok(envelope.data)
    }

    /// Decode one streaming frame into zero or more ticker updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame as a whole is not a JSON object or array.
    pub fn decode_frame(&self, text: &str) -> Result<DecodedFrame, DecodeError> {
        let trimmed = text.trim();
        let values = if trimmed.starts_with('[') {
            serde_json::from_str::<Vec<serde_json::Value>>(trimmed)?
        } else if trimmed.starts_with('{') {
            vec![serde_json::from_str::<serde_json::Value>(trimmed)?]
        } else {
            return Err(DecodeError::InvalidFormat(format!(
                "expected JSON array or object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        };

        let mut frame = DecodedFrame {
            updates: Vec::with_capacity(values.len()),
            rejected: Vec::new(),
        };
        for value in values {
            match value.get("type").and_then(serde_json::Value::as_str) {
                Some(TICKER_CHANNEL) => match serde_json::from_value::<TickerPush>(value) {
                    Ok(push) => frame.updates.push(push.into()),
                    Err(e) => frame.rejected.push(e.into()),
                },
                other => {
                    tracing::trace!(frame_type = ?other, "Skipping non-ticker frame");
                }
            }
        }
        Ok(frame)
    }

    /// Encode the ticker subscribe request as the single-element array the
    /// exchange expects.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscribe(&self, symbols: &[Symbol]) -> Result<String, DecodeError> {
        let request = [SubscribeRequest::ticker(symbols.to_vec())];
        Ok(serde_json::to_string(&request)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

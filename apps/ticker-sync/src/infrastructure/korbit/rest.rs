//! REST Snapshot Source
//!
//! Fetches the raw ticker and currency envelopes. Bodies are returned as
//! text; decoding belongs to the synchronizer so a malformed cycle can be
//! skipped without touching the table.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

/// REST fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Setup(String),

    /// Request never produced a response.
    #[error("request to {url} failed: {reason}")]
    Network {
        /// Requested URL.
        url: String,
        /// Transport error message.
        reason: String,
    },

    /// Non-success HTTP status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status.
        status: StatusCode,
    },
}

/// Source of raw snapshot payloads.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the ticker envelope body.
    async fn fetch_tickers(&self) -> Result<String, RestError>;

    /// Fetch the currency envelope body.
    async fn fetch_currencies(&self) -> Result<String, RestError>;
}

/// `reqwest`-backed snapshot source.
#[derive(Debug, Clone)]
pub struct KorbitRestClient {
    client: Client,
    ticker_url: String,
    currency_url: String,
}

impl KorbitRestClient {
    /// Create a client with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `RestError::Setup` if the TLS backend cannot be initialized.
    pub fn new(
        ticker_url: impl Into<String>,
        currency_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            ticker_url: ticker_url.into(),
            currency_url: currency_url.into(),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, RestError> {
        let network = |e: reqwest::Error| RestError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Status {
                url: url.to_string(),
                status,
            });
        }
        response.text().await.map_err(network)
    }
}

#[async_trait]
impl SnapshotSource for KorbitRestClient {
    async fn fetch_tickers(&self) -> Result<String, RestError> {
        self.get_text(&self.ticker_url).await
    }

    async fn fetch_currencies(&self) -> Result<String, RestError> {
        self.get_text(&self.currency_url).await
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Sync Configuration Settings
//!
//! Configuration types for the ticker synchronizer, loaded from environment
//! variables. Unset keys take their defaults; set but malformed keys are
//! rejected rather than silently defaulted.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::domain::table::StalenessPolicy;
use crate::domain::ticker::DEFAULT_QUOTE_SUFFIX;
use crate::infrastructure::korbit::{ConnectionConfig, KeepAliveConfig, ReconnectConfig};

/// Upstream endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Ticker snapshot URL.
    pub ticker_url: String,
    /// Currency reference URL.
    pub currency_url: String,
    /// Streaming endpoint.
    pub stream_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            ticker_url: "https://api.korbit.co.kr/v2/tickers".to_string(),
            currency_url: "https://api.korbit.co.kr/v2/currencies".to_string(),
            stream_url: "wss://ws-api.korbit.co.kr/v2/public".to_string(),
        }
    }
}

/// Snapshot polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Time between snapshot cycles.
    pub interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            request_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Streaming connection.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Keep-alive probe interval.
    pub keep_alive_interval: Duration,
    /// Silence after a probe that counts as a dead peer.
    pub keep_alive_timeout: Duration,
    /// First self-heal retry delay.
    pub reconnect_initial: Duration,
    /// Self-heal retry delay cap.
    pub reconnect_max: Duration,
    /// Self-heal growth factor.
    pub reconnect_multiplier: f64,
    /// Self-heal retries before giving up; `None` retries until closed.
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(10),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_millis(30_000),
            reconnect_multiplier: 2.0,
            reconnect_max_attempts: None,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Upstream endpoints.
    pub endpoints: EndpointSettings,
    /// Snapshot polling.
    pub poll: PollSettings,
    /// Streaming connection.
    pub stream: StreamSettings,
    /// Quote-currency suffix stripped from symbols to join currency names.
    pub quote_suffix: String,
    /// Staleness rule for merges.
    pub staleness: StalenessPolicy,
    /// Bookmark file; in-memory bookmarks when `None`.
    pub bookmarks_path: Option<PathBuf>,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointSettings::default(),
            poll: PollSettings::default(),
            stream: StreamSettings::default(),
            quote_suffix: DEFAULT_QUOTE_SUFFIX.to_string(),
            staleness: StalenessPolicy::default(),
            bookmarks_path: None,
            health_port: 8083,
        }
    }
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a key holds an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = Env(&lookup);

        let endpoints = EndpointSettings {
            ticker_url: env.url(
                "TICKER_SYNC_TICKER_URL",
                &["http", "https"],
                defaults.endpoints.ticker_url,
            )?,
            currency_url: env.url(
                "TICKER_SYNC_CURRENCY_URL",
                &["http", "https"],
                defaults.endpoints.currency_url,
            )?,
            stream_url: env.url(
                "TICKER_SYNC_STREAM_URL",
                &["ws", "wss"],
                defaults.endpoints.stream_url,
            )?,
        };

        let poll = PollSettings {
            interval: env.positive_millis("TICKER_SYNC_POLL_INTERVAL_MS", defaults.poll.interval)?,
            request_timeout: env.positive_millis(
                "TICKER_SYNC_REQUEST_TIMEOUT_MS",
                defaults.poll.request_timeout,
            )?,
        };

        let stream = StreamSettings {
            keep_alive_interval: env.positive_secs(
                "TICKER_SYNC_KEEPALIVE_SECS",
                defaults.stream.keep_alive_interval,
            )?,
            keep_alive_timeout: env.positive_secs(
                "TICKER_SYNC_KEEPALIVE_TIMEOUT_SECS",
                defaults.stream.keep_alive_timeout,
            )?,
            reconnect_initial: env.positive_millis(
                "TICKER_SYNC_RECONNECT_INITIAL_MS",
                defaults.stream.reconnect_initial,
            )?,
            reconnect_max: env.positive_millis(
                "TICKER_SYNC_RECONNECT_MAX_MS",
                defaults.stream.reconnect_max,
            )?,
            reconnect_multiplier: env.multiplier(
                "TICKER_SYNC_RECONNECT_MULTIPLIER",
                defaults.stream.reconnect_multiplier,
            )?,
            reconnect_max_attempts: env.optional_count("TICKER_SYNC_RECONNECT_MAX_ATTEMPTS")?,
        };

        let quote_suffix = env.non_empty("TICKER_SYNC_QUOTE_SUFFIX", defaults.quote_suffix)?;
        let staleness = env.parsed("TICKER_SYNC_STALENESS", defaults.staleness)?;
        let bookmarks_path = env
            .get("TICKER_SYNC_BOOKMARKS_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let health_port = env.parsed("TICKER_SYNC_HEALTH_PORT", defaults.health_port)?;

        Ok(Self {
            endpoints,
            poll,
            stream,
            quote_suffix,
            staleness,
            bookmarks_path,
            health_port,
        })
    }

    /// Connection tuning derived from the stream settings.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            keep_alive: KeepAliveConfig {
                interval: self.stream.keep_alive_interval,
                ack_timeout: self.stream.keep_alive_timeout,
            },
            reconnect: ReconnectConfig {
                initial_delay: self.stream.reconnect_initial,
                max_delay: self.stream.reconnect_max,
                multiplier: self.stream.reconnect_multiplier,
                max_attempts: self.stream.reconnect_max_attempts,
                ..ReconnectConfig::default()
            },
            ..ConnectionConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable is set but cannot be used.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Variable is set to an empty string where one is not allowed.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Display) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(key, &raw, e)),
        }
    }

    fn non_empty(&self, key: &str, default: String) -> Result<String, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) if raw.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(raw) => Ok(raw.trim().to_string()),
        }
    }

    fn url(&self, key: &str, schemes: &[&str], default: String) -> Result<String, ConfigError> {
        let raw = self.non_empty(key, default)?;
        let url = Url::parse(&raw).map_err(|e| ConfigError::invalid(key, &raw, e))?;
        if !schemes.contains(&url.scheme()) {
            return Err(ConfigError::invalid(
                key,
                &raw,
                format!("scheme must be one of {}", schemes.join(", ")),
            ));
        }
        Ok(raw)
    }

    fn positive_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.positive(key, default, Duration::from_millis)
    }

    fn positive_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.positive(key, default, Duration::from_secs)
    }

    fn positive(
        &self,
        key: &str,
        default: Duration,
        unit: fn(u64) -> Duration,
    ) -> Result<Duration, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().parse::<u64>() {
            Ok(0) => Err(ConfigError::invalid(key, &raw, "must be greater than zero")),
            Ok(n) => Ok(unit(n)),
            Err(e) => Err(ConfigError::invalid(key, &raw, e)),
        }
    }

    fn optional_count(&self, key: &str) -> Result<Option<u32>, ConfigError> {
        let Some(raw) = self.get(key).filter(|v| !v.trim().is_empty()) else {
            return Ok(None);
        };
        match raw.trim().parse::<u32>() {
            Ok(0) => Err(ConfigError::invalid(key, &raw, "must be greater than zero")),
            Ok(n) => Ok(Some(n)),
            Err(e) => Err(ConfigError::invalid(key, &raw, e)),
        }
    }

    fn multiplier(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = self.parsed(key, default)?;
        if !value.is_finite() || value < 1.0 {
            return Err(ConfigError::invalid(
                key,
                &value.to_string(),
                "must be a finite number >= 1.0",
            ));
        }
        Ok(value)
    }
}

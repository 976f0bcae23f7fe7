//! Self-Heal Backoff
//!
//! Delay schedule used when the transport refuses a reconnect that the
//! connection started on its own. Delays grow geometrically from
//! `initial_delay`, are capped at `max_delay`, and get symmetric jitter so
//! many clients do not retry in lockstep.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Give up after this many retries. `None` retries until closed.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Same schedule without jitter.
    #[must_use]
    pub fn without_jitter(self) -> Self {
        Self {
            jitter_factor: 0.0,
            ..self
        }
    }
}

/// Stateful delay generator for one self-heal episode.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start a fresh episode.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return None;
        }
        let base = self.base_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        Some(self.jitter(base))
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let scaled = self.config.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() {
            return self.config.max_delay;
        }
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.config.jitter_factor;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::try_from_secs_f64((delay.as_secs_f64() + offset).max(0.001))
            .unwrap_or(delay)
    }
}

//! Retry with capped exponential backoff.
//!
//! The delay before retry `n` (0-based) is
//! `min(initial_delay_ms * backoff_multiplier^n, max_delay_ms)`, with no jitter.

pub mod backoff;

use std::time::Duration;

use serde::Deserialize;

use crate::error::{is_network_message, FailureDetails};
use crate::settings::SettingsError;

pub use backoff::{
    retry_with_backoff, retry_with_backoff_cancellable, retry_with_backoff_when,
    retry_with_default_policy, RetryError,
};

/// Configuration for retry behavior with exponential backoff.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total calls are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds. Must be > 0.
    pub initial_delay_ms: u64,
    /// Cap for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per attempt. Must be >= 1.
    pub backoff_multiplier: f64,
    /// Retry failures whose message contains network vocabulary.
    pub retry_on_network_error: bool,
    /// Retry HTTP 429 responses.
    pub retry_on_rate_limit: bool,
    /// Retry HTTP 5xx responses.
    pub retry_on_server_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retry_on_network_error: true,
            retry_on_rate_limit: true,
            retry_on_server_error: true,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial and maximum delays.
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay_ms = crate::millis(initial);
        self.max_delay_ms = crate::millis(max);
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets which failure classes the default predicate retries.
    pub fn with_retry_on(mut self, network: bool, rate_limit: bool, server_error: bool) -> Self {
        self.retry_on_network_error = network;
        self.retry_on_rate_limit = rate_limit;
        self.retry_on_server_error = server_error;
        self
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Checks the config invariants.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.initial_delay_ms == 0 {
            return Err(SettingsError::invalid("initial_delay_ms", "must be greater than 0"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(SettingsError::invalid(
                "max_delay_ms",
                "must be at least initial_delay_ms",
            ));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(SettingsError::invalid(
                "backoff_multiplier",
                "must be a finite number >= 1",
            ));
        }
        Ok(())
    }
}

/// The default retry predicate.
///
/// Retries network-sounding failures, HTTP 429 and HTTP 5xx, each only when
/// enabled in `config`.
pub fn should_retry_error<E>(error: &E, config: &RetryConfig) -> bool
where
    E: FailureDetails + ?Sized,
{
    if config.retry_on_network_error && is_network_message(&error.detail()) {
        return true;
    }
    match error.status_code() {
        Some(429) => config.retry_on_rate_limit,
        Some(code) if (500..600).contains(&code) => config.retry_on_server_error,
        _ => false,
    }
}

//! Sliding-window rate limiting.
//!
//! A [`RateLimiter`] admits or denies calls per logical key. State lives only
//! in memory for the lifetime of the limiter instance and is periodically swept
//! by a [`SweeperHandle`] task.

pub mod limiter;
pub mod sweeper;

use std::time::Duration;

use serde::Deserialize;

use crate::settings::SettingsError;

// Re-export limiter types for convenient access
pub use limiter::{RateLimiter, SWEEP_LOOKBACK};
pub use sweeper::{SweeperHandle, SWEEP_INTERVAL};

/// Admission limits for one key: at most `max_requests` calls per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum admitted calls inside the window. Must be > 0.
    pub max_requests: u32,
    /// Window length in milliseconds. Must be > 0.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    /// Creates a config allowing `max_requests` calls per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: crate::millis(window),
        }
    }

    /// The window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Checks the config invariants.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_requests == 0 {
            return Err(SettingsError::invalid("max_requests", "must be greater than 0"));
        }
        if self.window_ms == 0 {
            return Err(SettingsError::invalid("window_ms", "must be greater than 0"));
        }
        Ok(())
    }
}

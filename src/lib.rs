//! Mailwarden - resilient remote-operation layer for a mail client
//!
//! This library governs how the client issues calls to the mail provider and
//! the backend store: it throttles them, retries them with capped exponential
//! backoff, classifies their failures into a closed set of kinds, and decides
//! how long fetched results may be trusted before they are considered stale.

pub mod cache;
pub mod cancel;
pub mod error;
pub mod handler;
pub mod logging;
pub mod notification;
pub mod rate_limit;
pub mod retry;
pub mod settings;
pub mod telemetry;

use std::time::Duration;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}

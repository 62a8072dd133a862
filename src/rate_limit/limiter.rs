//! Per-key sliding-window admission control.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::RateLimitConfig;
use crate::cancel::{self, Cancelled};

/// The sweep never drops a key with a request younger than this.
pub const SWEEP_LOOKBACK: Duration = Duration::from_secs(600);

// Lower bound on a single wait in `acquire`, so a zero remaining time cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct LimiterState {
    /// Admitted request timestamps per key, oldest first.
    requests: HashMap<String, VecDeque<Instant>>,
    /// Longest window any caller has used, bounding what the sweep keeps.
    max_observed_window: Duration,
}

/// Sliding-window rate limiter keyed by string.
///
/// The limiter is an ordinary value: construct one per upstream service (or
/// share one via `Arc`) and pass it to whoever needs it. The lock is never
/// held across an `.await`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a call for `key` if it is under its limit, recording it as used.
    pub fn can_proceed(&self, key: &str, config: &RateLimitConfig) -> bool {
        self.can_proceed_at(key, config, Instant::now())
    }

    /// [`can_proceed`](Self::can_proceed) evaluated at an explicit instant.
    ///
    /// A denied call records nothing.
    pub fn can_proceed_at(&self, key: &str, config: &RateLimitConfig, now: Instant) -> bool {
        let window = config.window();
        let limit = config.max_requests as usize;
        let mut state = self.lock();
        state.max_observed_window = state.max_observed_window.max(window);

        let admitted = match state.requests.get_mut(key) {
            Some(timestamps) => {
                prune(timestamps, now, window);
                timestamps.len() < limit
            }
            None => limit > 0,
        };

        if admitted {
            state
                .requests
                .entry(key.to_string())
                .or_default()
                .push_back(now);
            debug!(key, "rate limiter admitted request");
        } else {
            debug!(key, max_requests = config.max_requests, "rate limiter denied request");
        }
        admitted
    }

    /// Time until `key` has a free slot; zero if a call would be admitted now.
    pub fn time_until_next_slot(&self, key: &str, config: &RateLimitConfig) -> Duration {
        self.time_until_next_slot_at(key, config, Instant::now())
    }

    /// [`time_until_next_slot`](Self::time_until_next_slot) at an explicit instant.
    pub fn time_until_next_slot_at(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: Instant,
    ) -> Duration {
        let window = config.window();
        let limit = config.max_requests as usize;
        if limit == 0 {
            return window;
        }

        let mut state = self.lock();
        let Some(timestamps) = state.requests.get_mut(key) else {
            return Duration::ZERO;
        };
        prune(timestamps, now, window);
        if timestamps.len() < limit {
            return Duration::ZERO;
        }

        // The slot frees up when enough of the oldest requests age out.
        let blocking = timestamps[timestamps.len() - limit];
        window.saturating_sub(now.saturating_duration_since(blocking))
    }

    /// Suspends until a call for `key` is admitted, then records it.
    pub async fn acquire(&self, key: &str, config: &RateLimitConfig) {
        while !self.can_proceed(key, config) {
            let wait = self.time_until_next_slot(key, config).max(MIN_WAIT);
            debug!(key, wait_ms = crate::millis(wait), "waiting for rate limit slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires.
    pub async fn acquire_cancellable(
        &self,
        key: &str,
        config: &RateLimitConfig,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        loop {
            cancel::check(Some(cancel))?;
            if self.can_proceed(key, config) {
                return Ok(());
            }
            let wait = self.time_until_next_slot(key, config).max(MIN_WAIT);
            debug!(key, wait_ms = crate::millis(wait), "waiting for rate limit slot");
            cancel::sleep_or_cancel(wait, Some(cancel)).await?;
        }
    }

    /// Forgets all history for `key`.
    pub fn reset(&self, key: &str) {
        self.lock().requests.remove(key);
    }

    /// Forgets all history for every key.
    pub fn reset_all(&self) {
        self.lock().requests.clear();
    }

    /// Number of keys currently holding history.
    pub fn tracked_keys(&self) -> usize {
        self.lock().requests.len()
    }

    /// Number of stored timestamps for `key`.
    pub fn recorded(&self, key: &str) -> usize {
        self.lock().requests.get(key).map_or(0, VecDeque::len)
    }

    /// Drops stale history; returns how many keys were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`sweep`](Self::sweep) at an explicit instant.
    ///
    /// Timestamps older than the larger of [`SWEEP_LOOKBACK`] and the longest
    /// observed window are discarded; keys left empty are removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let lookback = SWEEP_LOOKBACK.max(state.max_observed_window);
        let before = state.requests.len();

        state.requests.retain(|_, timestamps| {
            while timestamps
                .front()
                .is_some_and(|oldest| now.saturating_duration_since(*oldest) > lookback)
            {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });

        let removed = before - state.requests.len();
        if removed > 0 {
            debug!(removed, remaining = state.requests.len(), "swept rate limiter keys");
        }
        removed
    }
}

/// Removes timestamps that have left the window ending at `now`.
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while timestamps
        .front()
        .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= window)
    {
        timestamps.pop_front();
    }
}

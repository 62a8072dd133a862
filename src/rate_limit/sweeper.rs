//! Background sweep of idle rate limiter keys.
//!
//! The sweep task holds only a weak reference to the limiter, so dropping the
//! last `Arc<RateLimiter>` ends the task as well.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::RateLimiter;

/// How often the sweep runs by default.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Handle to a running sweep task. Dropping it stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals the task to stop at its next wakeup.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Returns true while the task has not finished.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the task and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                debug!(error = %err, "rate limiter sweep task ended abnormally");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl RateLimiter {
    /// Spawns the periodic sweep on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> SweeperHandle {
        let token = CancellationToken::new();
        let stop = token.clone();
        let limiter = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else {
                            break;
                        };
                        let removed = limiter.sweep();
                        trace!(removed, "rate limiter sweep tick");
                    }
                }
            }
            debug!("rate limiter sweep task stopped");
        });

        SweeperHandle {
            token,
            task: Some(task),
        }
    }
}

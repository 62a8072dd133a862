//! Shared state published by the handler.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::NormalizedError;

/// The current-error slot read by the UI.
///
/// Last write wins; there is no queue. Clones share the same slot.
#[derive(Clone, Debug)]
pub struct ErrorState {
    slot: Arc<watch::Sender<Option<NormalizedError>>>,
}

impl Default for ErrorState {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorState {
    /// Creates an empty slot.
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// The error currently shown, if any.
    pub fn current(&self) -> Option<NormalizedError> {
        self.slot.borrow().clone()
    }

    /// Whether an error is currently shown.
    pub fn has_error(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Replaces the current error.
    pub fn set(&self, error: NormalizedError) {
        self.slot.send_replace(Some(error));
    }

    /// Empties the slot.
    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    /// Receiver notified on every change of the slot.
    pub fn subscribe(&self) -> watch::Receiver<Option<NormalizedError>> {
        self.slot.subscribe()
    }
}

/// Caller-owned handle for one retry-driven operation.
///
/// Publishes the live retry count and owns the token that cancels the loop.
#[derive(Clone, Debug)]
pub struct RetrySession {
    count: Arc<watch::Sender<u32>>,
    token: CancellationToken,
}

impl Default for RetrySession {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrySession {
    /// Creates a session with its own token.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Uses `token` for cancellation, e.g. a child of a screen-wide token.
    pub fn with_token(token: CancellationToken) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
            token,
        }
    }

    /// Retries performed so far in the current run.
    pub fn retry_count(&self) -> u32 {
        *self.count.borrow()
    }

    /// Receiver notified on every retry.
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.count.subscribe()
    }

    /// Stops the loop at its next check.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token raced against every wait in the loop.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn record_retry(&self) {
        self.count.send_modify(|count| *count += 1);
    }

    pub(crate) fn reset(&self) {
        self.count.send_replace(0);
    }
}

//! Error-handling orchestrator
//!
//! [`ErrorHandler`] runs remote operations and turns their failures into a
//! classified [`NormalizedError`]. On failure it logs the full message, sets
//! the shared current-error slot and, unless told otherwise, notifies the user
//! with a sanitized message. No raw error crosses this boundary.

pub mod options;
pub mod state;

pub use options::{HandleOptions, RateLimitGate, RetryCallback};
pub use state::{ErrorState, RetrySession};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{user_message, ErrorClassifier, NormalizedError, Sanitizer, Thrown};
use crate::notification::{Notice, NoticeAction, NotificationSink};
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_with_backoff_cancellable, RetryConfig, RetryError};
use crate::settings::{NotificationSettings, Settings};
use crate::telemetry::{ErrorTracker, Telemetry};

/// Failure of a cancellable handler call.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The operation failed; the error has been handled.
    #[error("{0}")]
    Failed(NormalizedError),
    /// The caller cancelled. Nothing was logged, stored or shown.
    #[error("operation cancelled")]
    Cancelled,
}

impl HandleError {
    /// The handled error, if the call failed rather than being cancelled.
    pub fn into_error(self) -> Option<NormalizedError> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Cancelled => None,
        }
    }

    /// Whether the caller cancelled the call.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Runs operations and reacts to their failures.
#[derive(Clone)]
pub struct ErrorHandler {
    classifier: ErrorClassifier,
    sanitizer: Sanitizer,
    state: ErrorState,
    notifier: Arc<dyn NotificationSink>,
    telemetry: Telemetry,
    limiter: Arc<RateLimiter>,
    notifications: NotificationSettings,
}

impl ErrorHandler {
    /// Creates a handler with default classification and a private limiter.
    pub fn new(notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            classifier: ErrorClassifier::new(),
            sanitizer: Sanitizer::new(),
            state: ErrorState::new(),
            notifier,
            telemetry: Telemetry::default(),
            limiter: Arc::new(RateLimiter::new()),
            notifications: NotificationSettings::default(),
        }
    }

    /// Creates a handler for the environment and durations in `settings`.
    pub fn from_settings(settings: &Settings, notifier: Arc<dyn NotificationSink>) -> Self {
        Self::new(notifier)
            .with_telemetry(Telemetry::new(settings.environment))
            .with_notification_settings(settings.notifications)
    }

    /// Replaces the classifier, e.g. one with provider-specific rules.
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replaces the sanitizer used for notices.
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Shares an existing error slot, e.g. one the UI already observes.
    pub fn with_state(mut self, state: ErrorState) -> Self {
        self.state = state;
        self
    }

    /// Shares a rate limiter with other handlers.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Replaces the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Installs the error tracker, keeping the current environment.
    pub fn with_tracker(mut self, tracker: Arc<dyn ErrorTracker>) -> Self {
        self.telemetry = self.telemetry.with_tracker(tracker);
        self
    }

    /// Sets notice durations.
    pub fn with_notification_settings(mut self, notifications: NotificationSettings) -> Self {
        self.notifications = notifications;
        self
    }

    /// The shared current-error slot.
    pub fn state(&self) -> &ErrorState {
        &self.state
    }

    /// The limiter behind rate-limit gates.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The classifier applied to every failure.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Classifies `raw` and reacts to it: log, store, notify.
    pub fn handle_error(&self, raw: impl Into<Thrown>, options: &HandleOptions) -> NormalizedError {
        let error = self.classifier.classify(raw);
        self.react(&error, options);
        error
    }

    /// Like [`handle_error`](Self::handle_error), but always notifies.
    pub fn show_error(&self, raw: impl Into<Thrown>, options: &HandleOptions) -> NormalizedError {
        let forced = HandleOptions {
            show_alert: true,
            ..options.clone()
        };
        self.handle_error(raw, &forced)
    }

    /// Runs `operation` once.
    ///
    /// Clears the error slot first. On failure the error is handled and
    /// returned; the caller only decides what to do without a value.
    pub async fn handle_async<T, E, F, Fut>(
        &self,
        operation: F,
        options: &HandleOptions,
    ) -> Result<T, NormalizedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Thrown>,
    {
        self.state.clear();
        if let Some(gate) = &options.rate_limit {
            if gate.wait {
                self.limiter.acquire(&gate.key, &gate.config).await;
            } else if let Err(denied) = self.try_admit(gate) {
                return Err(self.handle_error(denied, options));
            }
        }
        self.run(operation, options)
            .await
            .map_err(|raw| self.handle_error(raw, options))
    }

    /// Like [`handle_async`](Self::handle_async), but abandons the operation
    /// when `cancel` fires, including while it waits for a rate-limit slot.
    /// A cancelled call is not reported.
    pub async fn handle_async_cancellable<T, E, F, Fut>(
        &self,
        operation: F,
        options: &HandleOptions,
        cancel: &CancellationToken,
    ) -> Result<T, HandleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Thrown>,
    {
        if cancel.is_cancelled() {
            return Err(HandleError::Cancelled);
        }
        self.state.clear();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HandleError::Cancelled),
            result = self.dispatch(operation, options, cancel) => result,
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(HandleError::Failed(error)) => Err(HandleError::Failed(self.handle_error(error, options))),
            Err(HandleError::Cancelled) => {
                debug!(context = options.context.as_deref().unwrap_or("-"), "operation cancelled");
                Err(HandleError::Cancelled)
            }
        }
    }

    /// Runs `operation` with capped exponential backoff.
    ///
    /// Makes at most `max(retry.max_retries, 1)` attempts. Each failure is
    /// classified; the loop stops at the first non-retryable one. The error is
    /// handled once, after the loop ends. `session` exposes the live retry
    /// count and cancels the loop, including while an attempt waits for a
    /// rate-limit slot.
    pub async fn handle_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        options: &HandleOptions,
        retry: &RetryConfig,
        session: &RetrySession,
    ) -> Result<T, HandleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Thrown>,
    {
        session.reset();
        self.state.clear();

        let attempts = retry.max_retries.max(1);
        let engine = retry.clone().with_max_retries(attempts - 1);
        let token = session.token();
        let mut first_attempt = true;

        let outcome = retry_with_backoff_cancellable(
            || {
                if !first_attempt {
                    session.record_retry();
                }
                first_attempt = false;

                let pending = operation();
                self.dispatch(move || pending, options, token)
            },
            &engine,
            |error: &HandleError| matches!(error, HandleError::Failed(err) if err.is_retryable()),
            token,
        )
        .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(RetryError::Failed(HandleError::Failed(error))) => {
                Err(HandleError::Failed(self.handle_error(error, options)))
            }
            Err(RetryError::Failed(HandleError::Cancelled)) | Err(RetryError::Cancelled) => {
                debug!(context = options.context.as_deref().unwrap_or("-"), "retry loop cancelled");
                Err(HandleError::Cancelled)
            }
        }
    }

    /// Waits for the rate-limit gate, giving up when `cancel` fires, then runs
    /// the operation. Failures come back classified but not yet handled.
    async fn dispatch<T, E, F, Fut>(
        &self,
        operation: F,
        options: &HandleOptions,
        cancel: &CancellationToken,
    ) -> Result<T, HandleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Thrown>,
    {
        if let Some(gate) = &options.rate_limit {
            if gate.wait {
                self.limiter
                    .acquire_cancellable(&gate.key, &gate.config, cancel)
                    .await
                    .map_err(|_| HandleError::Cancelled)?;
            } else {
                self.try_admit(gate).map_err(HandleError::Failed)?;
            }
        }

        self.run(operation, options)
            .await
            .map_err(|raw| HandleError::Failed(self.classifier.classify(raw)))
    }

    /// Runs the operation under the timeout from `options`.
    async fn run<T, E, F, Fut>(&self, operation: F, options: &HandleOptions) -> Result<T, Thrown>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Thrown>,
    {
        let pending = operation();
        match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(NormalizedError::timeout(format!(
                    "operation timed out after {}ms",
                    limit.as_millis()
                ))
                .into()),
            },
            None => pending.await.map_err(Into::into),
        }
    }

    /// Fail-fast admission: records the call or returns an `ApiFailure` 429.
    fn try_admit(&self, gate: &RateLimitGate) -> Result<(), NormalizedError> {
        if self.limiter.can_proceed(&gate.key, &gate.config) {
            return Ok(());
        }

        let wait = self.limiter.time_until_next_slot(&gate.key, &gate.config);
        debug!(key = %gate.key, wait_ms = crate::millis(wait), "rate limit denied call");
        Err(NormalizedError::api_failure(
            429,
            format!(
                "rate limit exceeded for {}; next slot in {}ms",
                gate.key,
                wait.as_millis()
            ),
        ))
    }

    fn react(&self, error: &NormalizedError, options: &HandleOptions) {
        if options.log_errors {
            self.telemetry
                .record(error, options.context.as_deref(), &options.metadata);
        }
        self.state.set(error.clone());
        if options.show_alert {
            self.notify(error, options);
        }
    }

    fn notify(&self, error: &NormalizedError, options: &HandleOptions) {
        let message = match &options.custom_message {
            Some(custom) => self.sanitizer.sanitize(custom),
            None => user_message(error, &self.sanitizer),
        };

        let mut notice = Notice::new(message, self.notifications.duration());
        if error.is_retryable() && options.show_retry_in_alert {
            if let Some(on_retry) = &options.on_retry {
                notice = notice.with_action(NoticeAction::retry(on_retry.clone()));
                notice.duration = self.notifications.action_duration();
            }
        }
        self.notifier.notify(notice);
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("classifier", &self.classifier)
            .field("state", &self.state)
            .field("telemetry", &self.telemetry)
            .field("limiter", &self.limiter)
            .field("notifications", &self.notifications)
            .finish_non_exhaustive()
    }
}

//! Per-call options for the handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;

/// Callback carried by the retry affordance of a notification.
pub type RetryCallback = Arc<dyn Fn() + Send + Sync>;

/// Rate limiting applied before an operation runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitGate {
    /// Logical key, e.g. `"provider:alice@example.com"`.
    pub key: String,
    /// Window and budget for `key`.
    pub config: RateLimitConfig,
    /// Wait for a slot instead of failing with HTTP 429.
    pub wait: bool,
}

impl RateLimitGate {
    /// A gate that fails fast when the key is saturated.
    pub fn new(key: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            key: key.into(),
            config,
            wait: false,
        }
    }

    /// A gate that waits for the next free slot.
    pub fn waiting(key: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            wait: true,
            ..Self::new(key, config)
        }
    }
}

/// Options controlling how a failure is reported.
#[derive(Clone)]
pub struct HandleOptions {
    /// Notify the user.
    pub show_alert: bool,
    /// Attach a retry action to the notice when the error is retryable.
    pub show_retry_in_alert: bool,
    /// Emit a log record with the unsanitized message.
    pub log_errors: bool,
    /// Replaces the kind's template in the notice. Still sanitized.
    pub custom_message: Option<String>,
    /// Free-form description of the operation, included in logs.
    pub context: Option<String>,
    /// Extra data for the error tracker. Sensitive keys are dropped.
    pub metadata: HashMap<String, String>,
    /// Deadline for the operation; elapsing yields a timeout error.
    pub timeout: Option<Duration>,
    /// Rate limiting applied before the operation.
    pub rate_limit: Option<RateLimitGate>,
    /// Run when the user presses the retry action.
    pub on_retry: Option<RetryCallback>,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            show_alert: true,
            show_retry_in_alert: false,
            log_errors: true,
            custom_message: None,
            context: None,
            metadata: HashMap::new(),
            timeout: None,
            rate_limit: None,
            on_retry: None,
        }
    }
}

impl HandleOptions {
    /// Default options: notify and log, no retry action.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that neither notify nor log.
    pub fn quiet() -> Self {
        Self {
            show_alert: false,
            log_errors: false,
            ..Self::default()
        }
    }

    /// Turns the notice on or off.
    pub fn with_alert(mut self, show_alert: bool) -> Self {
        self.show_alert = show_alert;
        self
    }

    /// Enables the retry action and sets its callback.
    pub fn with_retry_action(mut self, on_retry: RetryCallback) -> Self {
        self.show_retry_in_alert = true;
        self.on_retry = Some(on_retry);
        self
    }

    /// Turns the log record on or off.
    pub fn with_logging(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    /// Shows `message` instead of the kind's template.
    pub fn with_custom_message(mut self, message: impl Into<String>) -> Self {
        self.custom_message = Some(message.into());
        self
    }

    /// Describes the operation in logs and tracker reports.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Adds one entry for the error tracker.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Fails the operation with a timeout error after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Applies `gate` before the operation runs.
    pub fn with_rate_limit(mut self, gate: RateLimitGate) -> Self {
        self.rate_limit = Some(gate);
        self
    }
}

impl fmt::Debug for HandleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleOptions")
            .field("show_alert", &self.show_alert)
            .field("show_retry_in_alert", &self.show_retry_in_alert)
            .field("log_errors", &self.log_errors)
            .field("custom_message", &self.custom_message)
            .field("context", &self.context)
            .field("metadata", &self.metadata.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("rate_limit", &self.rate_limit)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

//! Structured log records and error-tracker forwarding.
//!
//! Every handled failure becomes a [`LogRecord`] written through `tracing`
//! with the full, unsanitized message. In production, `warn` and `error`
//! records are also handed to an [`ErrorTracker`] along with a context map
//! that has had body and credential keys removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, NormalizedError};
use crate::settings::Environment;

/// Context keys containing any of these fragments never reach the tracker.
pub const SCRUBBED_KEY_FRAGMENTS: [&str; 7] = [
    "body",
    "password",
    "token",
    "authorization",
    "cookie",
    "secret",
    "api_key",
];

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl RecordLevel {
    /// Level used for a handled error of `kind`.
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => Self::Info,
            ErrorKind::Network | ErrorKind::Timeout => Self::Warn,
            ErrorKind::Auth
            | ErrorKind::ApiFailure
            | ErrorKind::Permission
            | ErrorKind::Unknown => Self::Error,
        }
    }

    /// Returns true for levels that are forwarded in production.
    pub fn is_reportable(self) -> bool {
        self >= Self::Warn
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RecordLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub level: RecordLevel,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub context: Option<String>,
}

impl LogRecord {
    /// Builds the record for a handled error.
    pub fn for_error(error: &NormalizedError, context: Option<&str>) -> Self {
        Self {
            level: RecordLevel::for_kind(error.kind()),
            message: error.message().to_string(),
            data: serde_json::to_value(error).unwrap_or_default(),
            timestamp: Utc::now(),
            context: context.map(str::to_string),
        }
    }

    /// Writes the record through `tracing`.
    pub fn emit(&self) {
        let context = self.context.as_deref().unwrap_or("-");
        match self.level {
            RecordLevel::Debug => debug!(context, data = %self.data, "{}", self.message),
            RecordLevel::Info => info!(context, data = %self.data, "{}", self.message),
            RecordLevel::Warn => warn!(context, data = %self.data, "{}", self.message),
            RecordLevel::Error => error!(context, data = %self.data, "{}", self.message),
        }
    }
}

/// What is sent to the error-tracking service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// The unsanitized error.
    pub error: NormalizedError,
    /// Caller context with sensitive keys removed.
    pub context: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub level: RecordLevel,
}

/// External error-tracking service.
pub trait ErrorTracker: Send + Sync {
    fn capture(&self, report: ErrorReport);
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    reports: Mutex<Vec<ErrorReport>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorTracker for MemoryTracker {
    fn capture(&self, report: ErrorReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }
}

/// Removes entries whose key names a body or a credential.
pub fn scrub_context(context: &HashMap<String, String>) -> HashMap<String, String> {
    context
        .iter()
        .filter(|(key, _)| {
            let lowered = key.to_lowercase();
            !SCRUBBED_KEY_FRAGMENTS
                .iter()
                .any(|fragment| lowered.contains(fragment))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Logs handled errors and forwards them in production.
#[derive(Clone, Default)]
pub struct Telemetry {
    environment: Environment,
    tracker: Option<Arc<dyn ErrorTracker>>,
}

impl Telemetry {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            tracker: None,
        }
    }

    /// Installs the error tracker used in production.
    pub fn with_tracker(mut self, tracker: Arc<dyn ErrorTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Emits the log record for `error` and forwards it when required.
    pub fn record(
        &self,
        error: &NormalizedError,
        context: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> LogRecord {
        let record = LogRecord::for_error(error, context);
        record.emit();

        if self.environment.is_production() && record.level.is_reportable() {
            if let Some(tracker) = &self.tracker {
                let mut scrubbed = scrub_context(metadata);
                if let Some(context) = context {
                    scrubbed.insert("context".to_string(), context.to_string());
                }
                tracker.capture(ErrorReport {
                    error: error.clone(),
                    context: scrubbed,
                    timestamp: record.timestamp,
                    level: record.level,
                });
            }
        }
        record
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("environment", &self.environment)
            .field("tracker", &self.tracker.is_some())
            .finish()
    }
}

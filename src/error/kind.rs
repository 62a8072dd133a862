//! Normalized error types for the remote-operation layer
//!
//! A failure is described by a single [`ErrorKind`] plus the data needed to
//! decide whether to retry it and what to tell the user. Callers hand raw
//! failures to the classifier as a [`Thrown`] value.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A boxed error object, the usual shape of a failure coming out of an operation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The original cause kept alongside a normalized error.
pub type SharedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The closed set of failure kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity problems: DNS, refused connections, failed fetches.
    Network,
    /// Missing, expired or rejected credentials.
    Auth,
    /// Input rejected before or by the upstream service.
    Validation,
    /// The upstream API answered with a failure status.
    ApiFailure,
    /// The operation did not complete within its time limit.
    Timeout,
    /// The user or device lacks a required permission.
    Permission,
    /// Anything that could not be recognized.
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Network,
        ErrorKind::Auth,
        ErrorKind::Validation,
        ErrorKind::ApiFailure,
        ErrorKind::Timeout,
        ErrorKind::Permission,
        ErrorKind::Unknown,
    ];

    /// Stable lowercase name used in logs and serialized records.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::ApiFailure => "api_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permission => "permission",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Retryability a freshly constructed error of this kind gets.
    ///
    /// `ApiFailure` is retryable only for server errors (5xx) and rate limiting (429).
    pub fn default_retryable(self, status_code: Option<u16>) -> bool {
        match self {
            ErrorKind::Network | ErrorKind::Timeout => true,
            ErrorKind::Auth | ErrorKind::Validation | ErrorKind::Permission => false,
            ErrorKind::ApiFailure => matches!(status_code, Some(code) if code >= 500 || code == 429),
            ErrorKind::Unknown => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure after classification.
///
/// Instances are value objects: built once per failure, consumed by the handler,
/// then dropped. The original cause (if any) is shared, never re-wrapped.
#[derive(Clone, Debug, Serialize)]
pub struct NormalizedError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip)]
    cause: Option<SharedCause>,
}

impl NormalizedError {
    /// Creates an error of the given kind with the kind's default retryability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(None),
            status_code: None,
            field: None,
            cause: None,
        }
    }

    /// A connectivity failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// A credential failure.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// A validation failure not tied to a particular field.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// A validation failure for a named input field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new(ErrorKind::Validation, message);
        error.field = Some(field.into());
        error
    }

    /// An upstream API failure with its HTTP status code.
    pub fn api_failure(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiFailure, message).with_status_code(status_code)
    }

    /// A timed out operation.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// A missing permission.
    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    /// An unrecognized failure.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Overrides the default retryability.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attaches the error that caused this one.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub(crate) fn with_shared_cause(mut self, cause: SharedCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Sets the status code and recomputes the default retryability from it.
    pub(crate) fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self.retryable = self.kind.default_retryable(self.status_code);
        self
    }

    /// The kind assigned by classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The full, unsanitized message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure is eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// HTTP status code reported by the upstream service, if any.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// The offending input field of a validation failure.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// The original cause, if one was captured.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// True for an `ApiFailure` caused by upstream rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        self.kind == ErrorKind::ApiFailure && self.status_code == Some(429)
    }

    /// True for an `ApiFailure` with a 5xx status.
    pub fn is_server_error(&self) -> bool {
        self.kind == ErrorKind::ApiFailure && matches!(self.status_code, Some(500..=599))
    }
}

impl PartialEq for NormalizedError {
    fn eq(&self, other: &Self) -> bool {
        let same_cause = match (&self.cause, &other.cause) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.kind == other.kind
            && self.message == other.message
            && self.retryable == other.retryable
            && self.status_code == other.status_code
            && self.field == other.field
            && same_cause
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for NormalizedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// A raw failure as produced by an operation, before classification.
#[derive(Debug)]
pub enum Thrown {
    /// A failure that has already been classified.
    Normalized(NormalizedError),
    /// An error object.
    Error(BoxError),
    /// A value that is not an error object at all (plain data or a primitive).
    Value(serde_json::Value),
}

impl Thrown {
    /// Wraps any error object.
    pub fn error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Error(Box::new(error))
    }

    /// Wraps a non-error value.
    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        Self::Value(value.into())
    }
}

impl From<NormalizedError> for Thrown {
    fn from(error: NormalizedError) -> Self {
        Self::Normalized(error)
    }
}

impl From<BoxError> for Thrown {
    fn from(error: BoxError) -> Self {
        Self::Error(error)
    }
}

impl From<std::io::Error> for Thrown {
    fn from(error: std::io::Error) -> Self {
        Self::error(error)
    }
}

impl From<reqwest::Error> for Thrown {
    fn from(error: reqwest::Error) -> Self {
        Self::error(error)
    }
}

impl From<serde_json::Error> for Thrown {
    fn from(error: serde_json::Error) -> Self {
        Self::error(error)
    }
}

impl From<serde_json::Value> for Thrown {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

/// A bare string is a primitive, not an error object, and classifies as `Unknown`.
impl From<String> for Thrown {
    fn from(value: String) -> Self {
        Self::Value(serde_json::Value::String(value))
    }
}

impl From<&str> for Thrown {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

/// What the default retry predicate needs to know about a failure.
pub trait FailureDetails {
    /// The failure's message text.
    fn detail(&self) -> String;

    /// HTTP status code, when the failure carries one.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl FailureDetails for NormalizedError {
    fn detail(&self) -> String {
        self.message.clone()
    }

    fn status_code(&self) -> Option<u16> {
        self.status_code
    }
}

impl FailureDetails for reqwest::Error {
    fn detail(&self) -> String {
        self.to_string()
    }

    fn status_code(&self) -> Option<u16> {
        self.status().map(|status| status.as_u16())
    }
}

impl FailureDetails for std::io::Error {
    fn detail(&self) -> String {
        self.to_string()
    }
}

impl FailureDetails for BoxError {
    fn detail(&self) -> String {
        self.to_string()
    }

    fn status_code(&self) -> Option<u16> {
        if let Some(normalized) = self.downcast_ref::<NormalizedError>() {
            return normalized.status_code;
        }
        self.downcast_ref::<reqwest::Error>()
            .and_then(|error| error.status())
            .map(|status| status.as_u16())
    }
}

impl FailureDetails for Thrown {
    fn detail(&self) -> String {
        match self {
            Thrown::Normalized(error) => error.detail(),
            Thrown::Error(error) => error.detail(),
            Thrown::Value(value) => value.to_string(),
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            Thrown::Normalized(error) => error.status_code,
            Thrown::Error(error) => FailureDetails::status_code(error),
            Thrown::Value(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retryable_by_kind() {
        assert!(ErrorKind::Network.default_retryable(None));
        assert!(ErrorKind::Timeout.default_retryable(None));
        assert!(!ErrorKind::Auth.default_retryable(None));
        assert!(!ErrorKind::Validation.default_retryable(None));
        assert!(!ErrorKind::Permission.default_retryable(None));
        assert!(!ErrorKind::Unknown.default_retryable(None));
    }

    #[test]
    fn test_api_failure_retryable_depends_on_status() {
        assert!(NormalizedError::api_failure(500, "boom").is_retryable());
        assert!(NormalizedError::api_failure(503, "unavailable").is_retryable());
        assert!(NormalizedError::api_failure(429, "slow down").is_retryable());
        assert!(!NormalizedError::api_failure(404, "missing").is_retryable());
        assert!(!NormalizedError::new(ErrorKind::ApiFailure, "no status").is_retryable());
    }

    #[test]
    fn test_explicit_retryable_override() {
        let marked = NormalizedError::api_failure(409, "conflict").with_retryable(true);
        assert!(marked.is_retryable());

        let pinned = NormalizedError::network("offline").with_retryable(false);
        assert!(!pinned.is_retryable());
    }

    #[test]
    fn test_invalid_field_carries_field() {
        let error = NormalizedError::invalid_field("subject", "Subject is required");
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.field(), Some("subject"));
        assert!(NormalizedError::validation("bad").field().is_none());
    }

    #[test]
    fn test_rate_limited_and_server_error_helpers() {
        assert!(NormalizedError::api_failure(429, "x").is_rate_limited());
        assert!(!NormalizedError::api_failure(503, "x").is_rate_limited());
        assert!(NormalizedError::api_failure(503, "x").is_server_error());
        assert!(!NormalizedError::api_failure(400, "x").is_server_error());
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error = NormalizedError::unknown("write failed").with_cause(io);

        let source = std::error::Error::source(&error).expect("source should be set");
        assert_eq!(source.to_string(), "disk on fire");
        assert_eq!(error.cause().map(|c| c.to_string()).as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_equality_compares_cause_identity() {
        let error = NormalizedError::network("offline")
            .with_cause(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        let cloned = error.clone();
        assert_eq!(error, cloned);

        let other = NormalizedError::network("offline")
            .with_cause(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert_ne!(error, other);
    }

    #[test]
    fn test_serialize_skips_cause_and_empty_fields() {
        let error = NormalizedError::api_failure(503, "unavailable")
            .with_cause(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json["kind"], "api_failure");
        assert_eq!(json["status_code"], 503);
        assert_eq!(json["retryable"], true);
        assert!(json.get("field").is_none());
        assert!(json.get("cause").is_none());
    }

    #[test]
    fn test_display_is_message() {
        let error = NormalizedError::timeout("request timed out after 30s");
        assert_eq!(error.to_string(), "request timed out after 30s");
        assert_eq!(ErrorKind::ApiFailure.to_string(), "api_failure");
    }

    #[test]
    fn test_string_converts_to_value() {
        assert!(matches!(Thrown::from("oops"), Thrown::Value(_)));
        assert!(matches!(
            Thrown::from(std::io::Error::new(std::io::ErrorKind::Other, "x")),
            Thrown::Error(_)
        ));
    }

    #[test]
    fn test_failure_details_for_boxed_normalized() {
        let boxed: BoxError = Box::new(NormalizedError::api_failure(502, "bad gateway"));
        assert_eq!(FailureDetails::status_code(&boxed), Some(502));
        assert_eq!(boxed.detail(), "bad gateway");

        let thrown = Thrown::value(serde_json::json!({"weird": true}));
        assert_eq!(thrown.status_code(), None);
        assert_eq!(thrown.detail(), r#"{"weird":true}"#);
    }
}

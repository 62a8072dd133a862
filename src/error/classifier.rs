//! Heuristic error classifier
//!
//! Error objects are classified by case-insensitive substring matches of their
//! message against ordered vocabulary rules. The heuristic depends on upstream
//! wording; structured status codes are preferred wherever the failure carries
//! them (already-normalized errors and HTTP client errors).

use std::sync::{Arc, OnceLock};

use super::{BoxError, ErrorKind, NormalizedError, Thrown};

/// Vocabulary that marks a message as a connectivity failure.
pub const NETWORK_VOCABULARY: &[&str] = &["network", "fetch", "timeout", "econnrefused", "enotfound"];

/// Vocabulary that marks a message as a credential failure.
pub const AUTH_VOCABULARY: &[&str] = &["unauthorized", "authentication", "token", "401", "403"];

/// A kind assigned when any of its terms appears in a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VocabularyRule {
    kind: ErrorKind,
    terms: Vec<String>,
    description: String,
}

impl VocabularyRule {
    /// Creates a rule. Terms are matched case-insensitively.
    pub fn new<I, S>(kind: ErrorKind, terms: I, description: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            kind,
            terms: terms
                .into_iter()
                .map(|term| term.as_ref().to_lowercase())
                .collect(),
            description: description.into(),
        }
    }

    /// The kind this rule assigns.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The lowercased terms of this rule.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// What the rule detects.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the first term found in an already lowercased message.
    pub fn matched_term(&self, lowered: &str) -> Option<&str> {
        self.terms
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
    }

    /// Checks the rule against an already lowercased message.
    pub fn matches(&self, lowered: &str) -> bool {
        self.matched_term(lowered).is_some()
    }
}

/// Classifies raw failures into [`NormalizedError`]s.
///
/// Classification is total and idempotent: an already-normalized error comes
/// back unchanged, and anything unrecognized becomes [`ErrorKind::Unknown`].
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    rules: Vec<VocabularyRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the network and auth vocabulary, in that order.
    pub fn new() -> Self {
        Self {
            rules: Self::default_rules(),
        }
    }

    /// Creates a classifier with custom rules only.
    pub fn with_rules(rules: Vec<VocabularyRule>) -> Self {
        Self { rules }
    }

    fn default_rules() -> Vec<VocabularyRule> {
        vec![
            VocabularyRule::new(
                ErrorKind::Network,
                NETWORK_VOCABULARY,
                "Connectivity failure",
            ),
            VocabularyRule::new(ErrorKind::Auth, AUTH_VOCABULARY, "Credential failure"),
        ]
    }

    /// Appends a rule, checked after the existing ones.
    pub fn add_rule(&mut self, rule: VocabularyRule) {
        self.rules.push(rule);
    }

    /// The configured rules in priority order.
    pub fn rules(&self) -> &[VocabularyRule] {
        &self.rules
    }

    /// Classifies any raw failure. Never panics.
    pub fn classify(&self, raw: impl Into<Thrown>) -> NormalizedError {
        match raw.into() {
            Thrown::Normalized(error) => error,
            Thrown::Error(error) => self.classify_error_object(error),
            Thrown::Value(value) => {
                NormalizedError::unknown(format!("unexpected failure value: {value}"))
            }
        }
    }

    /// Classifies a bare message with the vocabulary rules.
    pub fn classify_message(&self, message: &str) -> NormalizedError {
        let lowered = message.to_lowercase();
        let kind = self
            .rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::Unknown);
        NormalizedError::new(kind, message)
    }

    /// Classifies an HTTP failure status. 401 and 403 are credential failures;
    /// every other status is an API failure.
    pub fn classify_status(&self, status: u16, message: impl Into<String>) -> NormalizedError {
        match status {
            401 | 403 => NormalizedError::auth(message).with_status_code(status),
            _ => NormalizedError::api_failure(status, message),
        }
    }

    fn classify_error_object(&self, error: BoxError) -> NormalizedError {
        let error = match error.downcast::<NormalizedError>() {
            Ok(normalized) => return *normalized,
            Err(other) => other,
        };
        let error = match error.downcast::<reqwest::Error>() {
            Ok(http) => return self.classify_http_error(*http),
            Err(other) => other,
        };

        let message = error.to_string();
        self.classify_message(&message)
            .with_shared_cause(Arc::from(error))
    }

    fn classify_http_error(&self, error: reqwest::Error) -> NormalizedError {
        let message = error.to_string();
        let normalized = if error.is_timeout() {
            NormalizedError::timeout(message)
        } else if let Some(status) = error.status() {
            self.classify_status(status.as_u16(), message)
        } else if error.is_connect() || error.is_request() {
            NormalizedError::network(message)
        } else {
            self.classify_message(&message)
        };
        normalized.with_cause(error)
    }
}

fn default_classifier() -> &'static ErrorClassifier {
    static CLASSIFIER: OnceLock<ErrorClassifier> = OnceLock::new();
    CLASSIFIER.get_or_init(ErrorClassifier::new)
}

/// Classifies a raw failure with the default rules.
pub fn classify(raw: impl Into<Thrown>) -> NormalizedError {
    default_classifier().classify(raw)
}

/// Returns true if the message contains network vocabulary.
pub fn is_network_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    NETWORK_VOCABULARY.iter().any(|term| lowered.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn error_object(message: &str) -> Thrown {
        Thrown::error(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
    }

    #[test]
    fn test_econnrefused_is_network() {
        let error = classify(error_object("ECONNREFUSED"));
        assert_eq!(error.kind(), ErrorKind::Network);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_network_vocabulary() {
        for message in [
            "Network request failed",
            "TypeError: Failed to fetch",
            "socket timeout",
            "getaddrinfo ENOTFOUND gmail.googleapis.com",
        ] {
            assert_eq!(
                classify(error_object(message)).kind(),
                ErrorKind::Network,
                "{message}"
            );
        }
    }

    #[test]
    fn test_unauthorized_is_auth() {
        let error = classify(error_object("401 unauthorized"));
        assert_eq!(error.kind(), ErrorKind::Auth);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_auth_vocabulary() {
        for message in [
            "Authentication required",
            "invalid_grant: token has been expired or revoked",
            "HTTP 403",
        ] {
            assert_eq!(
                classify(error_object(message)).kind(),
                ErrorKind::Auth,
                "{message}"
            );
        }
    }

    #[test]
    fn test_network_checked_before_auth() {
        // Both vocabularies match; network rules come first.
        let error = classify(error_object("network error while refreshing token"));
        assert_eq!(error.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_unmatched_error_object_is_unknown_with_message() {
        let error = classify(error_object("Label name already exists"));
        assert_eq!(error.kind(), ErrorKind::Unknown);
        assert_eq!(error.message(), "Label name already exists");
        assert!(!error.is_retryable());
        assert!(error.cause().is_some());
    }

    #[test]
    fn test_plain_value_is_unknown() {
        let error = classify(json!({"weird": true}));
        assert_eq!(error.kind(), ErrorKind::Unknown);
        assert!(error.cause().is_none());
    }

    #[test]
    fn test_primitive_is_unknown_even_with_network_words() {
        let error = classify("network down");
        assert_eq!(error.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let original = NormalizedError::api_failure(503, "unavailable")
            .with_cause(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        let once = classify(original.clone());
        let twice = classify(once.clone());

        assert_eq!(once, original);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_boxed_normalized_is_not_rewrapped() {
        let original = NormalizedError::permission("contacts access denied");
        let boxed: BoxError = Box::new(original.clone());
        assert_eq!(classify(boxed), original);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let first = classify(error_object("fetch failed"));
        let second = classify(error_object("fetch failed"));
        assert_eq!(first.kind(), second.kind());
        assert_eq!(first.message(), second.message());
        assert_eq!(first.is_retryable(), second.is_retryable());
    }

    #[test]
    fn test_custom_rule_is_checked_after_defaults() {
        let mut classifier = ErrorClassifier::new();
        classifier.add_rule(VocabularyRule::new(
            ErrorKind::Permission,
            ["insufficientPermissions"],
            "Provider permission code",
        ));

        let error = classifier.classify(error_object("403: insufficientPermissions"));
        // "403" is auth vocabulary and auth rules come first
        assert_eq!(error.kind(), ErrorKind::Auth);

        let error = classifier.classify(error_object("insufficientPermissions for label"));
        assert_eq!(error.kind(), ErrorKind::Permission);
        assert_eq!(classifier.rules().len(), 3);
    }

    #[test]
    fn test_rule_matched_term() {
        let rule = VocabularyRule::new(ErrorKind::Network, NETWORK_VOCABULARY, "net");
        assert_eq!(rule.matched_term("econnrefused 127.0.0.1"), Some("econnrefused"));
        assert_eq!(rule.matched_term("all good"), None);
        assert_eq!(rule.description(), "net");
    }

    #[test]
    fn test_is_network_message() {
        assert!(is_network_message("Network Error"));
        assert!(is_network_message("request TIMEOUT"));
        assert!(!is_network_message("Invalid label"));
    }

    #[test]
    fn test_classify_status() {
        let classifier = ErrorClassifier::new();

        let auth = classifier.classify_status(403, "forbidden");
        assert_eq!(auth.kind(), ErrorKind::Auth);
        assert_eq!(auth.status_code(), Some(403));
        assert!(!auth.is_retryable());

        let throttled = classifier.classify_status(429, "slow down");
        assert_eq!(throttled.kind(), ErrorKind::ApiFailure);
        assert!(throttled.is_retryable());

        assert!(!classifier.classify_status(404, "missing").is_retryable());
    }
}

//! User-facing message templates per error kind.

use super::{ErrorKind, NormalizedError, Sanitizer};

pub const NETWORK_MESSAGE: &str = "Unable to connect. Check your internet connection and try again.";
pub const AUTH_MESSAGE: &str = "Your session has expired. Please sign in again.";
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please wait a moment and try again.";
pub const SERVER_ERROR_MESSAGE: &str = "Server error. Please try again later.";
pub const API_FAILURE_MESSAGE: &str = "An error occurred. Please try again.";
pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again.";
pub const PERMISSION_MESSAGE: &str = "Permission denied. Please check your settings.";
pub const UNKNOWN_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Builds the text shown to the user for a classified error.
///
/// Only validation errors echo their own (sanitized) message; every other kind
/// renders a fixed template regardless of the raw message.
pub fn user_message(error: &NormalizedError, sanitizer: &Sanitizer) -> String {
    let template = match error.kind() {
        ErrorKind::Network => NETWORK_MESSAGE,
        ErrorKind::Auth => AUTH_MESSAGE,
        ErrorKind::Validation => {
            let sanitized = sanitizer.sanitize(error.message());
            return if sanitized.is_empty() {
                API_FAILURE_MESSAGE.to_string()
            } else {
                sanitized
            };
        }
        ErrorKind::ApiFailure => match error.status_code() {
            Some(429) => RATE_LIMITED_MESSAGE,
            Some(code) if code >= 500 => SERVER_ERROR_MESSAGE,
            _ => API_FAILURE_MESSAGE,
        },
        ErrorKind::Timeout => TIMEOUT_MESSAGE,
        ErrorKind::Permission => PERMISSION_MESSAGE,
        ErrorKind::Unknown => UNKNOWN_MESSAGE,
    };
    template.to_string()
}

//! Error classification for remote operations
//!
//! Every failure that reaches the handler is normalized into a [`NormalizedError`]
//! carrying one [`ErrorKind`], a retryability verdict and the original message.
//! Messages shown to users go through [`sanitize`] first; logs keep full detail.

pub mod classifier;
pub mod kind;
pub mod messages;
pub mod sanitize;

// Re-export main types for convenient access
pub use classifier::{
    classify, is_network_message, ErrorClassifier, VocabularyRule, AUTH_VOCABULARY,
    NETWORK_VOCABULARY,
};
pub use kind::{BoxError, ErrorKind, FailureDetails, NormalizedError, SharedCause, Thrown};
pub use messages::user_message;
pub use sanitize::{sanitize, Sanitizer, MAX_SANITIZED_LEN};

//! User notifications for handled failures.
//!
//! The handler decides what a notification says and whether it carries a
//! retry action; presenting it is the job of whatever [`NotificationSink`]
//! the application installs.

mod sink;

pub use sink::{LogSink, MemorySink, NotificationSink};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Label of the retry affordance.
pub const RETRY_LABEL: &str = "Retry";

/// An action button attached to a notice.
///
/// Pressing it runs the callback; the notification layer never invokes it on
/// its own.
#[derive(Clone)]
pub struct NoticeAction {
    /// Button label.
    pub label: String,
    on_press: Arc<dyn Fn() + Send + Sync>,
}

impl NoticeAction {
    /// Creates an action with the given label and callback.
    pub fn new(label: impl Into<String>, on_press: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            label: label.into(),
            on_press,
        }
    }

    /// Creates the standard retry action.
    pub fn retry(on_press: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self::new(RETRY_LABEL, on_press)
    }

    /// Runs the callback.
    pub fn press(&self) {
        (self.on_press)();
    }
}

impl fmt::Debug for NoticeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoticeAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A message for the user.
#[derive(Clone, Debug)]
pub struct Notice {
    /// Sanitized, user-facing text.
    pub message: String,
    /// Optional action button.
    pub action: Option<NoticeAction>,
    /// How long the notice stays visible.
    pub duration: Duration,
}

impl Notice {
    /// Creates a notice without an action.
    pub fn new(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            message: message.into(),
            action: None,
            duration,
        }
    }

    /// Attaches an action.
    pub fn with_action(mut self, action: NoticeAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Returns true if the notice carries an action.
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    /// Label of the attached action, if any.
    pub fn action_label(&self) -> Option<&str> {
        self.action.as_ref().map(|action| action.label.as_str())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Some(action) => write!(f, "{} [{}]", self.message, action.label),
            None => write!(f, "{}", self.message),
        }
    }
}

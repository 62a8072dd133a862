//! Message sanitization for user-facing and telemetry text
//!
//! Only applied when producing text for people or for redacted telemetry.
//! Internal logs always carry the full message.

use std::sync::OnceLock;

use regex::Regex;

/// Maximum length, in characters, of a sanitized message.
pub const MAX_SANITIZED_LEN: usize = 200;

const TRUNCATION_MARKER: &str = "...";

/// Scrubs URLs, credentials, file paths and stack frames out of messages.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    stack_frames: Regex,
    source_locations: Regex,
    urls: Regex,
    bearer_tokens: Regex,
    credentials: Regex,
    paths: Regex,
    whitespace: Regex,
    max_len: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    /// Creates a sanitizer with the standard patterns.
    ///
    /// # Panics
    /// Panics if one of the built-in patterns fails to compile.
    pub fn new() -> Self {
        Self {
            stack_frames: Self::pattern(r"(?m)^[ \t]*at[ \t]+\S.*$"),
            source_locations: Self::pattern(
                r"(?i)[\w./\\-]+\.(?:rs|js|jsx|ts|tsx|java|kt|swift|py|m|mm):\d+(?::\d+)?",
            ),
            urls: Self::pattern(r#"(?i)\b(?:https?|wss?|ftp)://[^\s"'<>]+"#),
            bearer_tokens: Self::pattern(r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*"),
            credentials: Self::pattern(
                r"(?i)\b([\w-]*(?:token|api_key|secret|password))=[^\s&;,]+",
            ),
            paths: Self::pattern(r"(?:^|\s)(?:[A-Za-z]:)?(?:[/\\][\w.\-]+){2,}[/\\]?"),
            whitespace: Self::pattern(r"\s+"),
            max_len: MAX_SANITIZED_LEN,
        }
    }

    fn pattern(source: &str) -> Regex {
        Regex::new(source).expect("Invalid sanitizer pattern")
    }

    /// Overrides the maximum output length.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(TRUNCATION_MARKER.len());
        self
    }

    /// Returns the scrubbed form of `message`.
    ///
    /// Pure: the same input always yields the same output.
    pub fn sanitize(&self, message: &str) -> String {
        let text = self.stack_frames.replace_all(message, " ");
        let text = self.source_locations.replace_all(&text, "");
        let text = self.urls.replace_all(&text, "[URL]");
        let text = self.bearer_tokens.replace_all(&text, "Bearer [REDACTED]");
        let text = self.credentials.replace_all(&text, "${1}=[REDACTED]");
        let text = self.paths.replace_all(&text, " ");
        let text = self.whitespace.replace_all(&text, " ");
        self.truncate(text.trim())
    }

    fn truncate(&self, text: &str) -> String {
        if text.chars().count() <= self.max_len {
            return text.to_string();
        }
        let keep = self.max_len - TRUNCATION_MARKER.len();
        let mut truncated: String = text.chars().take(keep).collect();
        truncated.push_str(TRUNCATION_MARKER);
        truncated
    }
}

fn default_sanitizer() -> &'static Sanitizer {
    static SANITIZER: OnceLock<Sanitizer> = OnceLock::new();
    SANITIZER.get_or_init(Sanitizer::new)
}

/// Sanitizes a message with the standard patterns.
pub fn sanitize(message: &str) -> String {
    default_sanitizer().sanitize(message)
}

//! Layered configuration
//!
//! Settings come from a TOML file with environment variable overrides on top.
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `MAILWARDEN__<SECTION>__<KEY>`, e.g.
//! `MAILWARDEN__RETRY__MAX_RETRIES=5` or
//! `MAILWARDEN__RATE_LIMITS__SEARCH__MAX_REQUESTS=2`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryConfig;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "MAILWARDEN";

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ConfigError),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// A value violates its documented bounds.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl SettingsError {
    /// Creates an [`SettingsError::Invalid`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Prefixes the field of an `Invalid` error with its section path.
    pub fn in_section(self, section: &str) -> Self {
        match self {
            Self::Invalid { field, reason } => Self::Invalid {
                field: format!("{section}.{field}"),
                reason,
            },
            other => other,
        }
    }
}

/// Where the client is running. Only production forwards to error tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Returns true for [`Environment::Production`].
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// How long user notifications stay on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Duration of a plain notification, in milliseconds.
    pub duration_ms: u64,
    /// Duration of a notification that carries a retry action.
    pub action_duration_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            duration_ms: 4_000,
            action_duration_ms: 8_000,
        }
    }
}

impl NotificationSettings {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn action_duration(&self) -> Duration {
        Duration::from_millis(self.action_duration_ms)
    }
}

/// Root settings structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    /// Runtime environment
    #[serde(default)]
    pub environment: Environment,
    /// Defaults for the retry engine
    #[serde(default)]
    pub retry: RetryConfig,
    /// Named rate-limit presets, keyed by lowercase name
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitConfig>,
    /// Notification display durations
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl Settings {
    /// Load settings from a file path, applying `MAILWARDEN__` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration file does not exist
    /// - The configuration file cannot be parsed
    /// - The path is invalid
    /// - A value fails [`Settings::validate`]
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mailwarden::settings::Settings;
    ///
    /// let settings = Settings::load("mailwarden.toml")?;
    /// # Ok::<(), mailwarden::settings::SettingsError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| SettingsError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(SettingsError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::new(path_str, FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without environment overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every section's invariants.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.retry
            .validate()
            .map_err(|err| err.in_section("retry"))?;

        for (name, limit) in &self.rate_limits {
            limit
                .validate()
                .map_err(|err| err.in_section(&format!("rate_limits.{name}")))?;
        }
        Ok(())
    }

    /// Get a rate-limit preset by name.
    pub fn rate_limit(&self, name: &str) -> Option<&RateLimitConfig> {
        self.rate_limits.get(name)
    }

    /// List all preset names, sorted.
    pub fn rate_limit_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rate_limits.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_environment_default() {
        assert_eq!(Environment::default(), Environment::Development);
        assert!(Environment::Production.is_production());
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.notifications.duration(), Duration::from_secs(4));
    }

    #[test]
    fn test_parse_full_settings() {
        let toml_str = r#"
            environment = "production"

            [retry]
            max_retries = 5
            initial_delay_ms = 250

            [rate_limits.search]
            max_requests = 2
            window_ms = 1000

            [rate_limits.send]
            max_requests = 1

            [notifications]
            duration_ms = 3000
        "#;

        let settings = Settings::from_toml_str(toml_str).unwrap();

        assert_eq!(settings.environment, Environment::Production);
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.initial_delay_ms, 250);
        assert_eq!(settings.retry.max_delay_ms, 30_000);
        assert_eq!(settings.rate_limit_names(), vec!["search", "send"]);
        assert_eq!(settings.rate_limit("send").unwrap().window_ms, 1_000);
        assert!(settings.rate_limit("missing").is_none());
        assert_eq!(settings.notifications.duration_ms, 3_000);
        assert_eq!(settings.notifications.action_duration_ms, 8_000);
    }

    #[test]
    fn test_invalid_values_name_their_section() {
        let err = Settings::from_toml_str("[rate_limits.search]\nmax_requests = 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for rate_limits.search.max_requests: must be greater than 0"
        );

        let err = Settings::from_toml_str("[retry]\nbackoff_multiplier = 0.5\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { ref field, .. } if field == "retry.backoff_multiplier"));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = Settings::from_toml_str("[retry\nmax_retries = ").unwrap_err();
        assert!(matches!(err, SettingsError::ParseError(_)));
    }

    #[test]
    fn test_load_file_not_found() {
        let result = Settings::load("nonexistent/path/mailwarden.toml");
        assert!(matches!(result, Err(SettingsError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry]\nmax_retries = 1\n\n[rate_limits.labels]\nmax_requests = 4\nwindow_ms = 500").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.retry.max_retries, 1);
        assert_eq!(settings.rate_limit("labels").unwrap().max_requests, 4);
    }

    #[test]
    fn test_load_bundled_settings() {
        let settings = Settings::load("mailwarden.toml").unwrap();
        assert!(settings.rate_limit("provider").is_some());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = SettingsError::FileNotFound("test.toml".to_string());
        assert_eq!(err.to_string(), "configuration file not found: test.toml");

        let err = SettingsError::InvalidPath("invalid/path".to_string());
        assert_eq!(err.to_string(), "invalid configuration path: invalid/path");
    }
}

//! Logging configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format (development).
    Text,
    /// JSON structured logging (production).
    Json,
    /// JSON for non-TTY stdout, text otherwise.
    #[default]
    Auto,
}

fn default_filter() -> String {
    "info".to_string()
}

/// Logging configuration.
///
/// `filter` uses `EnvFilter` directive syntax and is only consulted when
/// `RUST_LOG` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Default filter directives, e.g. `info,blockvol_volume=debug`.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: LogFormat::default(), filter: default_filter() }
    }
}

#[bon::bon]
impl LoggingConfig {
    /// Creates a new logging configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `filter` is blank.
    #[builder]
    pub fn new(
        #[builder(default)] format: LogFormat,
        #[builder(into, default = default_filter())] filter: String,
    ) -> Result<Self, ConfigError> {
        let config = Self { format, filter };
        config.validate()?;
        Ok(config)
    }
}

impl LoggingConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `filter` is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "logging filter must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

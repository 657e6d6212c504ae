//! Checkpoint database configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

const MIN_CACHE_SIZE_BYTES: usize = 1024 * 1024;

fn default_cache_size() -> usize {
    4 * 1024 * 1024
}

fn default_durable_commits() -> bool {
    true
}

/// Settings for the redb file holding the checkpoint request table.
///
/// The table is small: one row per checkpoint request. A few megabytes of
/// cache keeps the whole table resident.
///
/// ```no_run
/// # use blockvol_types::config::StorageConfig;
/// let config = StorageConfig::builder()
///     .cache_size_bytes(8 * 1024 * 1024)
///     .durable_commits(false)
///     .build()
///     .expect("valid storage config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    /// Page cache handed to redb, in bytes. At least 1 MiB.
    #[serde(default = "default_cache_size")]
    pub cache_size_bytes: usize,
    /// Fsync every save and update before reporting it to the volume.
    ///
    /// Turning this off trades crash safety of the newest requests for
    /// latency. A request acknowledged as saved may then be lost on power
    /// failure and is simply never replayed.
    #[serde(default = "default_durable_commits")]
    pub durable_commits: bool,
}

#[bon::bon]
impl StorageConfig {
    /// Builds a validated storage configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the cache is below 1 MiB.
    #[builder]
    pub fn new(
        #[builder(default = default_cache_size())] cache_size_bytes: usize,
        #[builder(default = default_durable_commits())] durable_commits: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self { cache_size_bytes, durable_commits };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the cache is below 1 MiB.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size_bytes < MIN_CACHE_SIZE_BYTES {
            return Err(ConfigError::Validation {
                message: format!(
                    "storage.cache_size_bytes must be at least {MIN_CACHE_SIZE_BYTES}, got {}",
                    self.cache_size_bytes
                ),
            });
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { cache_size_bytes: default_cache_size(), durable_commits: default_durable_commits() }
    }
}

//! Configuration types for blockvol.
//!
//! Configuration is loaded from TOML files. All config structs validate their
//! values at construction time via fallible builders. Post-deserialization
//! validation is available via the `validate()` method on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions.
#![allow(clippy::disallowed_methods)]

mod observability;
mod storage;
mod volume;

use std::path::{Path, PathBuf};

pub use observability::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
pub use storage::*;
pub use volume::*;

/// Configuration error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The configuration file could not be read.
    #[snafu(display("failed to read config {}: {source}", path.display()))]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for [`Config`].
    #[snafu(display("failed to parse config: {source}"))]
    Parse {
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Top-level configuration of a volume process.
///
/// ```toml
/// [volume]
/// disk_id = "vol-0"
/// blocks_count = 262144
/// shutdown_timeout = "10s"
///
/// [volume.recent_writes]
/// max_tracked_ranges = 2048
///
/// [storage]
/// cache_size_bytes = 33554432
///
/// [logging]
/// format = "json"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Volume actor settings.
    pub volume: VolumeConfig,
    /// Checkpoint database settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Log subscriber settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Validation`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Config::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(IoSnafu { path })?;
        Self::from_toml_str(&text)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Validation`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.volume.validate()?;
        self.storage.validate()?;
        self.logging.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;

    // =========================================================================
    // RecentWriteWindowConfig
    // =========================================================================

    #[test]
    fn test_window_config_defaults_are_valid() {
        let config = RecentWriteWindowConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.max_tracked_ranges, 4096);
        assert_eq!(config.max_id_distance, 1 << 32);
    }

    #[test]
    fn test_window_config_rejects_zero_bounds() {
        let err = RecentWriteWindowConfig::builder().max_tracked_ranges(0).build().unwrap_err();
        assert!(err.to_string().contains("max_tracked_ranges"));

        let err = RecentWriteWindowConfig::builder().max_id_distance(0).build().unwrap_err();
        assert!(err.to_string().contains("max_id_distance"));
    }

    // =========================================================================
    // VolumeConfig
    // =========================================================================

    #[test]
    fn test_volume_config_builder() {
        let config = VolumeConfig::builder()
            .disk_id("vol-0")
            .blocks_count(1024)
            .shutdown_timeout(Duration::from_secs(5))
            .build()
            .expect("valid volume config");
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.mailbox_capacity, 1024);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_volume_config_block_size_must_be_power_of_two() {
        let result = VolumeConfig::builder().disk_id("v").blocks_count(1).block_size(3000).build();
        assert!(result.unwrap_err().to_string().contains("block_size"));

        let result = VolumeConfig::builder().disk_id("v").blocks_count(1).block_size(256).build();
        assert!(result.is_err());

        let result = VolumeConfig::builder().disk_id("v").blocks_count(1).block_size(512).build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_volume_config_rejects_empty_disk_and_size() {
        assert!(VolumeConfig::builder().disk_id("").blocks_count(1).build().is_err());
        assert!(VolumeConfig::builder().disk_id("v").blocks_count(0).build().is_err());
        assert!(
            VolumeConfig::builder().disk_id("v").blocks_count(1).mailbox_capacity(0).build().is_err()
        );
    }

    // =========================================================================
    // StorageConfig / LoggingConfig
    // =========================================================================

    #[test]
    fn test_storage_config_cache_size_minimum() {
        assert!(StorageConfig::builder().cache_size_bytes(1024 * 1024).build().is_ok());
        let err = StorageConfig::builder().cache_size_bytes(1024 * 1024 - 1).build().unwrap_err();
        assert!(err.to_string().contains("storage.cache_size_bytes"));
    }

    #[test]
    fn test_storage_config_durable_by_default() {
        let config: StorageConfig = toml::from_str("cache_size_bytes = 2097152").unwrap();
        assert!(config.durable_commits);
        let relaxed = StorageConfig::builder().durable_commits(false).build().unwrap();
        assert!(!relaxed.durable_commits);
    }

    #[test]
    fn test_logging_config_rejects_blank_filter() {
        assert!(LoggingConfig::builder().filter("  ").build().is_err());
        let config = LoggingConfig::builder().format(LogFormat::Json).build().unwrap();
        assert_eq!(config.filter, "info");
    }

    // =========================================================================
    // Config loading
    // =========================================================================

    #[test]
    fn test_config_from_toml_with_defaults() {
        let config = Config::from_toml_str(
            r#"
            [volume]
            disk_id = "vol-7"
            blocks_count = 2048
            shutdown_timeout = "1m 30s"

            [volume.recent_writes]
            max_tracked_ranges = 16

            [logging]
            format = "json"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.volume.disk_id, "vol-7");
        assert_eq!(config.volume.shutdown_timeout, Duration::from_secs(90));
        assert_eq!(config.volume.recent_writes.max_tracked_ranges, 16);
        assert_eq!(config.volume.recent_writes.max_id_distance, 1 << 32);
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_config_from_toml_validates() {
        let err = Config::from_toml_str(
            r#"
            [volume]
            disk_id = "vol-7"
            blocks_count = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));

        let err = Config::from_toml_str("[volume]\nblocks_count = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_config_load_missing_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_config_load_round_trip_through_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("volume.toml");
        std::fs::write(&path, "[volume]\ndisk_id = \"d\"\nblocks_count = 8\n").unwrap();

        let config = Config::load(&path).expect("load config");
        assert_eq!(config.volume.blocks_count, 8);
        assert_eq!(config.volume.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation { message: "test error".to_string() };
        assert_eq!(err.to_string(), "invalid config: test error");
    }

    #[test]
    fn test_config_schema_lists_volume_fields() {
        let schema = schemars::schema_for!(Config);
        let json = serde_json::to_string(&schema).expect("serialize schema");
        assert!(json.contains("blocks_count"));
        assert!(json.contains("max_tracked_ranges"));
    }
}

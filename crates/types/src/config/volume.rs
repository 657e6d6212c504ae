//! Per-volume configuration: geometry, mailbox sizing and the recent-write window.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

// =========================================================================
// RecentWriteWindowConfig
// =========================================================================

/// Minimum number of tracked segments.
const MIN_TRACKED_RANGES: usize = 1;

/// Smallest accepted block size in bytes.
const MIN_BLOCK_SIZE: u32 = 512;

const fn default_max_tracked_ranges() -> usize {
    4096
}

/// One full epoch of sequence numbers.
const fn default_max_id_distance() -> u64 {
    1 << 32
}

/// Bounds on the memory used to detect stale write replays.
///
/// The window forgets segments that are either older than
/// `max_id_distance` behind the newest recorded id, or beyond the newest
/// `max_tracked_ranges` segments. Forgotten ids are treated as stale.
///
/// # Example
///
/// ```no_run
/// # use blockvol_types::config::RecentWriteWindowConfig;
/// let config = RecentWriteWindowConfig::builder()
///     .max_tracked_ranges(1024)
///     .build()
///     .expect("valid window config");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RecentWriteWindowConfig {
    /// Maximum number of disjoint segments kept. Must be >= 1.
    #[serde(default = "default_max_tracked_ranges")]
    pub max_tracked_ranges: usize,
    /// Ids further than this behind the newest recorded id are stale. Must be >= 1.
    #[serde(default = "default_max_id_distance")]
    pub max_id_distance: u64,
}

impl Default for RecentWriteWindowConfig {
    fn default() -> Self {
        Self {
            max_tracked_ranges: default_max_tracked_ranges(),
            max_id_distance: default_max_id_distance(),
        }
    }
}

#[bon::bon]
impl RecentWriteWindowConfig {
    /// Creates a new window configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if either bound is zero.
    #[builder]
    pub fn new(
        #[builder(default = default_max_tracked_ranges())] max_tracked_ranges: usize,
        #[builder(default = default_max_id_distance())] max_id_distance: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_tracked_ranges, max_id_distance };
        config.validate()?;
        Ok(config)
    }
}

impl RecentWriteWindowConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tracked_ranges < MIN_TRACKED_RANGES {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_tracked_ranges must be >= {}, got {}",
                    MIN_TRACKED_RANGES, self.max_tracked_ranges
                ),
            });
        }
        if self.max_id_distance == 0 {
            return Err(ConfigError::Validation {
                message: "max_id_distance must be >= 1, got 0".to_string(),
            });
        }
        Ok(())
    }
}

// =========================================================================
// VolumeConfig
// =========================================================================

const fn default_block_size() -> u32 {
    4096
}

const fn default_mailbox_capacity() -> usize {
    1024
}

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration of one volume actor.
///
/// # Validation Rules
///
/// - `disk_id` must not be empty
/// - `block_size` must be a power of two and >= 512
/// - `blocks_count` must be >= 1
/// - `mailbox_capacity` must be >= 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VolumeConfig {
    /// Disk identifier, attached to every log line of the volume.
    pub disk_id: String,
    /// Block size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Volume size in blocks.
    pub blocks_count: u64,
    /// Capacity of the bounded caller mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Stale-replay detection bounds for each storage unit.
    #[serde(default)]
    pub recent_writes: RecentWriteWindowConfig,
    /// How long `shutdown` waits for the actor to drain.
    #[serde(default = "default_shutdown_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub shutdown_timeout: Duration,
}

#[bon::bon]
impl VolumeConfig {
    /// Creates a new volume configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a rule listed on the type is violated.
    #[builder]
    pub fn new(
        #[builder(into)] disk_id: String,
        #[builder(default = default_block_size())] block_size: u32,
        blocks_count: u64,
        #[builder(default = default_mailbox_capacity())] mailbox_capacity: usize,
        #[builder(default)] recent_writes: RecentWriteWindowConfig,
        #[builder(default = default_shutdown_timeout())] shutdown_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            disk_id,
            block_size,
            blocks_count,
            mailbox_capacity,
            recent_writes,
            shutdown_timeout,
        };
        config.validate()?;
        Ok(config)
    }
}

impl VolumeConfig {
    /// Validates the configuration values, including the nested window bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.disk_id.is_empty() {
            return Err(ConfigError::Validation { message: "disk_id must not be empty".to_string() });
        }
        if self.block_size < MIN_BLOCK_SIZE || !self.block_size.is_power_of_two() {
            return Err(ConfigError::Validation {
                message: format!(
                    "block_size must be a power of two >= {}, got {}",
                    MIN_BLOCK_SIZE, self.block_size
                ),
            });
        }
        if self.blocks_count == 0 {
            return Err(ConfigError::Validation {
                message: "blocks_count must be >= 1, got 0".to_string(),
            });
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "mailbox_capacity must be >= 1, got 0".to_string(),
            });
        }
        self.recent_writes.validate()
    }
}

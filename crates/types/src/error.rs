//! Error types for the blockvol volume core using snafu.
//!
//! Every failure a caller can observe is a [`VolumeError`]. Each variant maps
//! to an [`ErrorCode`] with a unique numeric identifier, retryability
//! classification and suggested recovery action.

use core::fmt;

use snafu::Snafu;

/// Unified result type for volume operations.
pub type Result<T, E = VolumeError> = std::result::Result<T, E>;

/// Machine-readable error codes for programmatic error handling.
///
/// Codes are organized into ranges:
///
/// | Range       | Domain      | Examples                                     |
/// |-------------|-------------|----------------------------------------------|
/// | 1000–1099   | Storage     | Database open, transaction, table ops        |
/// | 1100–1199   | Storage     | Record encoding, missing rows                |
/// | 2000–2099   | Volume      | Retriable rejection, tablet teardown         |
/// | 2100–2199   | Checkpoint  | Unknown checkpoint                           |
/// | 3000–3099   | Request     | Invalid argument, block range out of bounds  |
/// | 3100–3199   | Internal    | Configuration, invariant violation           |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // --- Storage errors (1000–1199) ---
    /// Database file could not be opened.
    StorageDatabaseOpen = 1000,
    /// Transaction begin or commit failed.
    StorageTransaction = 1001,
    /// Table open, read or insert failed.
    StorageTableOperation = 1002,
    /// A persisted record could not be encoded or decoded.
    StorageCodec = 1100,
    /// A persisted checkpoint request row is missing.
    StorageRequestNotFound = 1101,

    // --- Volume errors (2000–2199) ---
    /// The request was refused but may succeed when retried.
    VolumeRejected = 2000,
    /// The volume tablet is shutting down.
    VolumeTabletDead = 2001,
    /// The referenced checkpoint does not exist.
    CheckpointNotFound = 2100,

    // --- Request errors (3000–3199) ---
    /// Invalid request argument.
    InvalidArgument = 3000,
    /// Block range lies outside the volume.
    InvalidBlockRange = 3001,
    /// Configuration error.
    Config = 3100,
    /// Internal error (unexpected state, invariant violation).
    Internal = 3101,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::StorageDatabaseOpen),
            1001 => Some(Self::StorageTransaction),
            1002 => Some(Self::StorageTableOperation),
            1100 => Some(Self::StorageCodec),
            1101 => Some(Self::StorageRequestNotFound),
            2000 => Some(Self::VolumeRejected),
            2001 => Some(Self::VolumeTabletDead),
            2100 => Some(Self::CheckpointNotFound),
            3000 => Some(Self::InvalidArgument),
            3001 => Some(Self::InvalidBlockRange),
            3100 => Some(Self::Config),
            3101 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether this error is retryable.
    ///
    /// A tablet that died mid-request is not retried by the core: the caller
    /// must re-resolve the volume first.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StorageTransaction | Self::VolumeRejected)
    }

    /// Suggested recovery action for this error code.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StorageDatabaseOpen => {
                "Verify database path exists with correct permissions. Restore from backup if the file is corrupted."
            },
            Self::StorageTransaction => "Retry the operation with backoff.",
            Self::StorageTableOperation => "Check that the database was created by a compatible version.",
            Self::StorageCodec => "Persisted record is unreadable; report as issue with the record id.",
            Self::StorageRequestNotFound => {
                "The checkpoint request was never saved; resubmit the checkpoint operation."
            },
            Self::VolumeRejected => "Retry the request with backoff.",
            Self::VolumeTabletDead => "Volume is restarting; resolve the volume again and resubmit.",
            Self::CheckpointNotFound => "Verify the checkpoint id via the checkpoint listing.",
            Self::InvalidArgument => "Fix the request parameters.",
            Self::InvalidBlockRange => "Request a block range within the volume size.",
            Self::Config => "Fix configuration and restart.",
            Self::Internal => "Unexpected state; report as issue with context.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Top-level error type for volume operations.
///
/// Cloneable so that one failure can be replied to every waiter of a request.
///
/// # Recovery Guide
///
/// | Variant              | Retryable | Recovery Action                                  |
/// | -------------------- | --------- | ------------------------------------------------ |
/// | `InvalidArgument`    | No        | Fix the request parameters                       |
/// | `InvalidBlockRange`  | No        | Request a range inside the volume                |
/// | `Rejected`           | Yes       | Retry with backoff                               |
/// | `TabletDead`         | No        | Resolve the volume again and resubmit            |
/// | `CheckpointNotFound` | No        | Verify the checkpoint id                         |
/// | `Storage`            | Maybe     | Check disk health; retriable for transactions    |
/// | `Internal`           | No        | Unexpected state; report as issue                |
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum VolumeError {
    /// Malformed request parameter.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
    },

    /// Block range extends past the end of the volume.
    #[snafu(display("Invalid blocks requested: [{start}, {end}) exceeds {blocks_count} blocks"))]
    InvalidBlockRange {
        /// First requested block.
        start: u64,
        /// One past the last requested block.
        end: u64,
        /// Size of the volume in blocks.
        blocks_count: u64,
    },

    /// Retriable refusal (conflict, undelivered request, disabled feature).
    #[snafu(display("Rejected: {message}"))]
    Rejected {
        /// Error description.
        message: String,
    },

    /// The volume tablet is shutting down and abandoned the request.
    #[snafu(display("Tablet is dead: {message}"))]
    TabletDead {
        /// Error description.
        message: String,
    },

    /// The referenced checkpoint is unknown to the volume.
    #[snafu(display("Checkpoint {checkpoint_id} not found"))]
    CheckpointNotFound {
        /// Checkpoint name.
        checkpoint_id: String,
    },

    /// Durable storage failed.
    #[snafu(display("Storage error: {message}"))]
    Storage {
        /// Storage-level error code.
        code: ErrorCode,
        /// Error description.
        message: String,
    },

    /// Invariant violation.
    #[snafu(display("Internal error: {message}"))]
    Internal {
        /// Error description.
        message: String,
    },
}

impl VolumeError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidBlockRange { .. } => ErrorCode::InvalidBlockRange,
            Self::Rejected { .. } => ErrorCode::VolumeRejected,
            Self::TabletDead { .. } => ErrorCode::VolumeTabletDead,
            Self::CheckpointNotFound { .. } => ErrorCode::CheckpointNotFound,
            Self::Storage { code, .. } => *code,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Whether this error is retryable. Delegates to [`ErrorCode::is_retryable`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Suggested recovery action. Delegates to [`ErrorCode::suggested_action`].
    #[must_use]
    pub const fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }

    /// Shorthand for a [`VolumeError::Rejected`] with the given message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// The error delivered to requests abandoned by a dying tablet.
    pub fn tablet_dead() -> Self {
        Self::TabletDead { message: "tablet is dead".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn all_error_codes() -> Vec<ErrorCode> {
        vec![
            ErrorCode::StorageDatabaseOpen,
            ErrorCode::StorageTransaction,
            ErrorCode::StorageTableOperation,
            ErrorCode::StorageCodec,
            ErrorCode::StorageRequestNotFound,
            ErrorCode::VolumeRejected,
            ErrorCode::VolumeTabletDead,
            ErrorCode::CheckpointNotFound,
            ErrorCode::InvalidArgument,
            ErrorCode::InvalidBlockRange,
            ErrorCode::Config,
            ErrorCode::Internal,
        ]
    }

    #[test]
    fn test_error_code_numeric_uniqueness() {
        let mut seen = HashSet::new();
        for code in all_error_codes() {
            let numeric = code.as_u16();
            assert!(seen.insert(numeric), "Duplicate error code: {numeric} for {code:?}");
        }
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in all_error_codes() {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(ErrorCode::from_u16(0), None);
        assert_eq!(ErrorCode::from_u16(9999), None);
    }

    #[test]
    fn test_suggested_action_non_empty() {
        for code in all_error_codes() {
            assert!(!code.suggested_action().is_empty(), "{code:?} has no action");
        }
    }

    #[test]
    fn test_error_display() {
        let err = VolumeError::rejected("failed to deliver drain request to some partitions");
        assert_eq!(err.to_string(), "Rejected: failed to deliver drain request to some partitions");

        let err = VolumeError::InvalidBlockRange { start: 10, end: 200, blocks_count: 100 };
        assert_eq!(err.to_string(), "Invalid blocks requested: [10, 200) exceeds 100 blocks");
    }

    #[test]
    fn test_retryability_follows_code() {
        assert!(VolumeError::rejected("busy").is_retryable());
        assert!(!VolumeError::tablet_dead().is_retryable());
        assert!(!VolumeError::InvalidArgument { message: "x".into() }.is_retryable());

        let storage = VolumeError::Storage {
            code: ErrorCode::StorageTransaction,
            message: "commit failed".into(),
        };
        assert_eq!(storage.code(), ErrorCode::StorageTransaction);
        assert!(storage.is_retryable());
    }

    #[test]
    fn test_tablet_dead_message() {
        let err = VolumeError::tablet_dead();
        assert_eq!(err.code(), ErrorCode::VolumeTabletDead);
        assert!(err.to_string().contains("tablet is dead"));
    }
}

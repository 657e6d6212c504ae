//! Storage error types.

use blockvol_types::{CheckpointRequestId, ErrorCode, VolumeError, codec::CodecError};
use snafu::Snafu;

/// Errors from the checkpoint request store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Database open failed (file not found, permissions, corruption).
    #[snafu(display("Failed to open database at {path}: {source}"))]
    DatabaseOpen {
        /// Database path.
        path: String,
        /// Underlying redb error.
        source: redb::DatabaseError,
    },

    /// Beginning a transaction failed.
    #[snafu(display("Transaction error: {source}"))]
    Transaction {
        /// Underlying redb error.
        source: redb::TransactionError,
    },

    /// Opening a table failed.
    #[snafu(display("Table error: {source}"))]
    Table {
        /// Underlying redb error.
        source: redb::TableError,
    },

    /// Reading or writing a row failed.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying redb error.
        source: redb::StorageError,
    },

    /// Committing a write transaction failed.
    #[snafu(display("Commit error: {source}"))]
    Commit {
        /// Underlying redb error.
        source: redb::CommitError,
    },

    /// A record could not be encoded or decoded.
    #[snafu(display("Codec error for {request_id}: {source}"))]
    Codec {
        /// Row the record belongs to.
        request_id: CheckpointRequestId,
        /// Underlying codec error.
        source: CodecError,
    },

    /// The row to update does not exist.
    #[snafu(display("Checkpoint request {request_id} not found"))]
    RequestNotFound {
        /// Missing row.
        request_id: CheckpointRequestId,
    },

    /// The backend refused the operation.
    #[snafu(display("Storage unavailable: {message}"))]
    Unavailable {
        /// Error description.
        message: String,
    },
}

impl StorageError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DatabaseOpen { .. } => ErrorCode::StorageDatabaseOpen,
            Self::Transaction { .. } | Self::Commit { .. } | Self::Unavailable { .. } => {
                ErrorCode::StorageTransaction
            },
            Self::Table { .. } | Self::Storage { .. } => ErrorCode::StorageTableOperation,
            Self::Codec { .. } => ErrorCode::StorageCodec,
            Self::RequestNotFound { .. } => ErrorCode::StorageRequestNotFound,
        }
    }
}

impl From<StorageError> for VolumeError {
    fn from(err: StorageError) -> Self {
        VolumeError::Storage { code: err.code(), message: err.to_string() }
    }
}

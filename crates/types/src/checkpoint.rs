//! Checkpoint lifecycle records.
//!
//! A [`CheckpointRequest`] moves through
//! `Received → Saved → InProgress → {Completed | Rejected}`. Only `Saved`,
//! `Completed` and `Rejected` are ever written to durable storage; the other
//! two states live in memory.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CheckpointId, CheckpointRequestId};

/// What a checkpoint request asks the partitions to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointRequestType {
    /// Create a point-in-time checkpoint.
    Create,
    /// Delete the checkpoint and its data.
    Delete,
    /// Drop the checkpoint data but keep the checkpoint itself.
    DeleteData,
}

impl CheckpointRequestType {
    /// Returns a static string label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create_checkpoint",
            Self::Delete => "delete_checkpoint",
            Self::DeleteData => "delete_checkpoint_data",
        }
    }
}

impl fmt::Display for CheckpointRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a checkpoint is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CheckpointType {
    /// Partition snapshots created through the fan-out protocol.
    #[default]
    Normal,
    /// Used-block bitmap only; snapshots are provided elsewhere.
    Light,
}

/// Position of a request in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointRequestState {
    /// Accepted in memory, not yet durable.
    Received,
    /// Durable; will survive a restart and be retried.
    Saved,
    /// Dispatched for execution.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Rejected,
}

impl CheckpointRequestState {
    /// Returns true for `Completed` and `Rejected`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    /// Returns a static string label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Saved => "saved",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for CheckpointRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkpoint lifecycle request of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRequest {
    /// Volume-local, monotonically increasing id.
    pub request_id: CheckpointRequestId,
    /// User-visible checkpoint name.
    pub checkpoint_id: CheckpointId,
    /// When the request was accepted.
    pub timestamp: DateTime<Utc>,
    /// Requested operation.
    pub req_type: CheckpointRequestType,
    /// Implementation of the checkpoint the request applies to.
    pub checkpoint_type: CheckpointType,
    /// Current lifecycle state.
    pub state: CheckpointRequestState,
}

impl CheckpointRequest {
    /// Creates a request in the `Received` state.
    pub fn received(
        request_id: CheckpointRequestId,
        checkpoint_id: impl Into<CheckpointId>,
        timestamp: DateTime<Utc>,
        req_type: CheckpointRequestType,
        checkpoint_type: CheckpointType,
    ) -> Self {
        Self {
            request_id,
            checkpoint_id: checkpoint_id.into(),
            timestamp,
            req_type,
            checkpoint_type,
            state: CheckpointRequestState::Received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(CheckpointRequestState::Completed.is_terminal());
        assert!(CheckpointRequestState::Rejected.is_terminal());
        assert!(!CheckpointRequestState::Saved.is_terminal());
        assert!(!CheckpointRequestState::InProgress.is_terminal());
    }

    #[test]
    fn test_received_constructor() {
        let request = CheckpointRequest::received(
            CheckpointRequestId::new(3),
            "ckpt-a",
            Utc::now(),
            CheckpointRequestType::Create,
            CheckpointType::Light,
        );
        assert_eq!(request.state, CheckpointRequestState::Received);
        assert_eq!(request.checkpoint_id, "ckpt-a");
        assert_eq!(request.req_type.to_string(), "create_checkpoint");
    }
}

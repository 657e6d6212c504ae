//! Delivery of drain, checkpoint and changed-block requests to partitions.
//!
//! The volume never talks to partitions directly. It hands requests to a
//! [`PartitionTransport`] and turns the results back into coordinator messages.
//! A request the transport could not hand over is reported as
//! [`DeliveryError::Undelivered`]; that is the only failure the volume expects
//! from the transport itself, everything else is the partition's answer.

use std::fmt;

use async_trait::async_trait;
use blockvol_types::{BlockRange, CheckpointId, PartitionDescriptor, VolumeError};

use crate::trace_context::TraceContext;

/// A request addressed to one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionRequest {
    /// Wait until every write in flight on the partition has finished.
    Drain,
    /// Take a snapshot under the given name.
    CreateCheckpoint {
        /// Checkpoint name.
        checkpoint_id: CheckpointId,
    },
    /// Forget a snapshot and its data.
    DeleteCheckpoint {
        /// Checkpoint name.
        checkpoint_id: CheckpointId,
    },
    /// Free the snapshot data but keep the checkpoint record.
    DeleteCheckpointData {
        /// Checkpoint name.
        checkpoint_id: CheckpointId,
    },
}

impl PartitionRequest {
    /// Returns a static string label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drain => "drain",
            Self::CreateCheckpoint { .. } => "create_checkpoint",
            Self::DeleteCheckpoint { .. } => "delete_checkpoint",
            Self::DeleteCheckpointData { .. } => "delete_checkpoint_data",
        }
    }

    /// Returns true for [`PartitionRequest::Drain`].
    pub fn is_drain(&self) -> bool {
        matches!(self, Self::Drain)
    }
}

/// A changed-blocks query answered by the partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedBlocksQuery {
    /// Older checkpoint; empty for "since the beginning".
    pub low_checkpoint_id: CheckpointId,
    /// Newer checkpoint; empty for "the current state".
    pub high_checkpoint_id: CheckpointId,
    /// Blocks to report on.
    pub range: BlockRange,
}

/// Why a request to a partition did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The request never reached the partition.
    Undelivered,
    /// The partition answered with an error.
    Failed(VolumeError),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Undelivered => write!(f, "request was not delivered"),
            DeliveryError::Failed(e) => write!(f, "partition failed: {}", e),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Sends requests to the partitions of a volume.
#[async_trait]
pub trait PartitionTransport: Send + Sync + 'static {
    /// Delivers `request` to `partition` and waits for its answer.
    async fn send(
        &self,
        partition: &PartitionDescriptor,
        request: PartitionRequest,
        trace: &TraceContext,
    ) -> Result<(), DeliveryError>;

    /// Computes the changed-block mask of `query` across `partitions`.
    ///
    /// The mask uses one bit per block, eight blocks per byte, lowest block in
    /// the least significant bit.
    async fn get_changed_blocks(
        &self,
        partitions: &[PartitionDescriptor],
        query: ChangedBlocksQuery,
        trace: &TraceContext,
    ) -> Result<Vec<u8>, DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_labels() {
        assert!(PartitionRequest::Drain.is_drain());
        let create = PartitionRequest::CreateCheckpoint { checkpoint_id: "c".to_string() };
        assert!(!create.is_drain());
        assert_eq!(create.as_str(), "create_checkpoint");
    }

    #[test]
    fn test_delivery_error_display() {
        assert_eq!(DeliveryError::Undelivered.to_string(), "request was not delivered");
        let failed = DeliveryError::Failed(VolumeError::rejected("busy"));
        assert_eq!(failed.to_string(), "partition failed: Rejected: busy");
    }
}

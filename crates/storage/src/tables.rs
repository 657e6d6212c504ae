//! Table definitions for redb storage.

use redb::TableDefinition;

/// Table definitions for volume storage.
pub struct Tables;

impl Tables {
    /// Checkpoint requests: request_id → postcard(CheckpointRequest)
    ///
    /// Rows are only ever in the Saved, Completed or Rejected state.
    pub const CHECKPOINT_REQUESTS: TableDefinition<'static, u64, &'static [u8]> =
        TableDefinition::new("checkpoint_requests");
}

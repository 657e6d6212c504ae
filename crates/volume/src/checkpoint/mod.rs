//! Checkpoint lifecycle: request queue, partition protocol, light checkpoints
//! and the write gate.

pub mod coordinator;
pub mod ledger;
pub mod light;
pub mod write_gate;

pub use coordinator::{
    CheckpointCoordinator, CheckpointOperation, CoordinatorEffect, CoordinatorMessage,
    CoordinatorState,
};
pub use ledger::{CheckpointInfo, CheckpointRequestLedger};
pub use light::{ChangedBlockBitmap, LightCheckpoint, light_changed_blocks};
pub use write_gate::can_execute_write_request;

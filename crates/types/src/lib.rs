//! Core types, errors, and configuration for the blockvol volume core.
//!
//! This crate provides the foundational types shared by the storage and
//! volume crates:
//! - Identifier newtypes and half-open block ranges
//! - Composite request ids ordered across leadership epochs
//! - Checkpoint request records
//! - Partition descriptors and volume topology
//! - Error types using snafu
//! - Configuration with validating builders

pub mod checkpoint;
pub mod codec;
pub mod composite_id;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use checkpoint::{CheckpointRequest, CheckpointRequestState, CheckpointRequestType, CheckpointType};
pub use composite_id::CompositeRequestId;
pub use error::{ErrorCode, Result, VolumeError};
pub use types::*;

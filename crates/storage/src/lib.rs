//! Durable storage for the blockvol volume core.
//!
//! This crate provides:
//! - The [`CheckpointPersistence`] trait the volume writes checkpoint requests through
//! - A redb-backed implementation ([`CheckpointDatabase`])
//! - An in-memory implementation for tests ([`MemoryCheckpointStore`])

mod checkpoint_db;
mod error;
mod persistence;
mod tables;

pub use checkpoint_db::CheckpointDatabase;
pub use error::StorageError;
pub use persistence::{CheckpointPersistence, MemoryCheckpointStore, Result};
pub use tables::Tables;

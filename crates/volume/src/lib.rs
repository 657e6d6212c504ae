//! Write admission and checkpoint coordination for a partitioned block volume.
//!
//! This crate holds the concurrency control of a volume and its storage units:
//! - [`admission`]: per-unit write admission over in-flight ranges and the
//!   recent-write window
//! - [`checkpoint`]: the checkpoint request ledger, the partition protocol,
//!   light checkpoints and the write gate
//! - [`volume`]: the actor that owns the checkpoint state of one volume
//! - [`transport`]: the seam through which partitions are reached
//!
//! Ambient concerns live in [`logging`], [`metrics`] and [`trace_context`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod checkpoint;
mod journal;
pub mod logging;
pub mod metrics;
pub mod recent_writes;
pub mod requests_inflight;
pub mod trace_context;
pub mod transport;
pub mod volume;

pub use admission::{
    Admission, AdmissionCounters, DelayedAdmission, UnitWriteRequest, WriteAdmission, WriteKind, WritePermit,
};
pub use checkpoint::{CheckpointInfo, CheckpointRequestLedger, LightCheckpoint};
pub use recent_writes::{OverlapStatus, RecentWriteWindow};
pub use requests_inflight::{InFlightRangeSet, TryAddResult};
pub use trace_context::TraceContext;
pub use transport::{ChangedBlocksQuery, DeliveryError, PartitionRequest, PartitionTransport};
pub use volume::{VolumeHandle, VolumeWriteGuard, WriteStart};

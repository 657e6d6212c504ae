//! Core type definitions for the blockvol volume core.
//!
//! - Identifier types (CheckpointRequestId, TabletId)
//! - Half-open block ranges
//! - Partition descriptors and volume topology

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InvalidArgumentSnafu, VolumeError};

// ============================================================================
// Identifier Types
// ============================================================================

/// Generates a newtype wrapper around a numeric type for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<inner>` and `Into<inner>` conversions
/// - `Display` with a semantic prefix (e.g., `tablet:123`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = <$inner as std::str::FromStr>::Err;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

define_id!(
    /// Volume-local identifier of a checkpoint lifecycle request.
    ///
    /// Allocated from a monotonically increasing counter owned by the
    /// checkpoint request ledger. Persisted as the primary key of the
    /// request row.
    ///
    /// # Display
    ///
    /// Formats with `ckpt-req:` prefix: `ckpt-req:42`.
    CheckpointRequestId, u64, "ckpt-req"
);

define_id!(
    /// Identifier of the tablet backing one partition of a volume.
    ///
    /// Disk-registry-based partitions have no tablet and use `0`.
    ///
    /// # Display
    ///
    /// Formats with `tablet:` prefix: `tablet:72075186224037889`.
    TabletId, u64, "tablet"
);

/// Checkpoint name as supplied by the caller.
///
/// Not unique across requests: a checkpoint may be created, deleted and
/// created again under the same name.
pub type CheckpointId = String;

// ============================================================================
// Block Ranges
// ============================================================================

/// A non-empty half-open range `[start, end)` of block indices.
///
/// Comparisons are over the raw bounds. Empty ranges cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRange {
    start: u64,
    end: u64,
}

impl BlockRange {
    /// Creates `[start, end)`, or `None` if the range would be empty.
    #[inline]
    pub const fn new(start: u64, end: u64) -> Option<Self> {
        if start < end { Some(Self { start, end }) } else { None }
    }

    /// Creates `[start, start + length)`, or `None` for zero length or overflow.
    #[inline]
    pub const fn with_length(start: u64, length: u64) -> Option<Self> {
        match start.checked_add(length) {
            Some(end) => Self::new(start, end),
            None => None,
        }
    }

    /// First block of the range.
    #[inline]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// One past the last block of the range.
    #[inline]
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Number of blocks covered. Always at least one.
    #[inline]
    pub const fn block_count(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true if the two ranges share at least one block.
    #[inline]
    pub const fn overlaps(&self, other: &BlockRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `block` lies inside the range.
    #[inline]
    pub const fn contains_block(&self, block: u64) -> bool {
        self.start <= block && block < self.end
    }

    /// Returns true if every block of `other` lies inside `self`.
    #[inline]
    pub const fn covers(&self, other: &BlockRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Returns the shared blocks of two ranges, if any.
    pub fn intersection(&self, other: &BlockRange) -> Option<BlockRange> {
        Self::new(self.start.max(other.start), self.end.min(other.end))
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Partitions
// ============================================================================

/// Routing address of a partition actor.
///
/// Opaque to the core; the transport collaborator resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionAddress(String);

impl PartitionAddress {
    /// Wraps a transport-level address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PartitionAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for PartitionAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl fmt::Display for PartitionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One physical partition of a logical volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct PartitionDescriptor {
    /// Tablet backing the partition (`0` for disk-registry-based partitions).
    #[builder(into, default = TabletId::new(0))]
    pub tablet_id: TabletId,
    /// Where checkpoint and drain requests for this partition are routed.
    #[builder(into)]
    pub address: PartitionAddress,
    /// Whether this is the single unreplicated disk-registry-based partition.
    #[builder(default)]
    pub disk_registry_based: bool,
}

/// The partitions of one volume.
///
/// Either one or more blob-storage-based partitions, or exactly one
/// disk-registry-based partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTopology {
    partitions: Vec<PartitionDescriptor>,
}

impl VolumeTopology {
    /// Validates and wraps a partition list.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidArgument`] if the list is empty, or if a
    /// disk-registry-based partition is mixed with other partitions.
    pub fn new(partitions: Vec<PartitionDescriptor>) -> Result<Self, VolumeError> {
        if partitions.is_empty() {
            return InvalidArgumentSnafu { message: "volume has no partitions" }.fail();
        }
        let disk_registry = partitions.iter().filter(|p| p.disk_registry_based).count();
        if disk_registry > 0 && partitions.len() > 1 {
            return InvalidArgumentSnafu {
                message: format!(
                    "disk-registry-based volume must have exactly one partition, got {}",
                    partitions.len()
                ),
            }
            .fail();
        }
        Ok(Self { partitions })
    }

    /// All partitions in routing order.
    pub fn partitions(&self) -> &[PartitionDescriptor] {
        &self.partitions
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Returns true for an unreplicated disk-registry-based volume.
    pub fn is_disk_registry_based(&self) -> bool {
        self.partitions.iter().any(|p| p.disk_registry_based)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_block_range_rejects_empty() {
        assert!(BlockRange::new(10, 10).is_none());
        assert!(BlockRange::new(11, 10).is_none());
        assert!(BlockRange::with_length(5, 0).is_none());
        assert!(BlockRange::with_length(u64::MAX, 2).is_none());
    }

    #[test]
    fn test_block_range_overlap_is_half_open() {
        let a = BlockRange::new(10, 20).unwrap();
        let b = BlockRange::new(20, 30).unwrap();
        let c = BlockRange::new(19, 21).unwrap();

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(a.contains_block(19));
        assert!(!a.contains_block(20));
    }

    #[test]
    fn test_block_range_intersection_and_cover() {
        let a = BlockRange::new(0, 1024).unwrap();
        let b = BlockRange::new(512, 2048).unwrap();

        assert_eq!(a.intersection(&b), BlockRange::new(512, 1024));
        assert!(a.covers(&BlockRange::new(0, 1).unwrap()));
        assert!(!a.covers(&b));
        assert_eq!(a.block_count(), 1024);
        assert_eq!(a.to_string(), "[0, 1024)");
    }

    #[test]
    fn test_id_display_prefix() {
        assert_eq!(CheckpointRequestId::new(7).to_string(), "ckpt-req:7");
        assert_eq!(TabletId::new(3).to_string(), "tablet:3");
        assert_eq!("9".parse::<TabletId>().unwrap(), TabletId::new(9));
    }

    #[test]
    fn test_topology_rejects_mixed_disk_registry() {
        let nonrepl = PartitionDescriptor::builder()
            .address("nonrepl")
            .disk_registry_based(true)
            .build();
        let blob = PartitionDescriptor::builder().tablet_id(1u64).address("p1").build();

        assert!(VolumeTopology::new(vec![]).is_err());
        assert!(VolumeTopology::new(vec![nonrepl.clone(), blob.clone()]).is_err());

        let topology = VolumeTopology::new(vec![nonrepl]).unwrap();
        assert!(topology.is_disk_registry_based());

        let topology = VolumeTopology::new(vec![blob]).unwrap();
        assert!(!topology.is_disk_registry_based());
        assert_eq!(topology.partition_count(), 1);
    }
}

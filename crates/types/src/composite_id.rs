//! Request identifiers that stay ordered across leadership changes.
//!
//! A [`CompositeRequestId`] packs the volume generation (epoch) into the upper
//! 32 bits and a per-epoch sequence number into the lower 32 bits. Comparing
//! the packed value orders every id of a newer epoch after every id of an
//! older one, which is what stale-replay detection relies on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit offset of the epoch inside the packed value.
const EPOCH_SHIFT: u32 = 32;

/// Mask selecting the sequence bits.
const SEQUENCE_MASK: u64 = (1 << EPOCH_SHIFT) - 1;

/// 64-bit request id: `epoch << 32 | sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeRequestId(u64);

impl CompositeRequestId {
    /// First id of an epoch (sequence 0).
    #[inline]
    pub const fn from_epoch(epoch: u32) -> Self {
        Self((epoch as u64) << EPOCH_SHIFT)
    }

    /// Reinterprets a packed value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Builds an id from its two halves.
    #[inline]
    pub const fn from_parts(epoch: u32, sequence: u32) -> Self {
        Self(((epoch as u64) << EPOCH_SHIFT) | sequence as u64)
    }

    /// Returns true while the sequence has room to grow within this epoch.
    #[inline]
    #[must_use]
    pub const fn can_advance(&self) -> bool {
        self.sequence() < u32::MAX
    }

    /// Moves to the next sequence number and returns the new packed value.
    ///
    /// Overflowing the sequence is a programming error: the issuer must move
    /// to a new epoch first.
    pub fn advance(&mut self) -> u64 {
        debug_assert!(self.can_advance(), "sequence overflow in epoch {}", self.epoch());
        self.0 += 1;
        self.0
    }

    /// Volume generation this id was issued in.
    #[inline]
    pub const fn epoch(&self) -> u32 {
        (self.0 >> EPOCH_SHIFT) as u32
    }

    /// Position within the epoch.
    #[inline]
    pub const fn sequence(&self) -> u32 {
        (self.0 & SEQUENCE_MASK) as u32
    }

    /// Packed 64-bit value.
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CompositeRequestId {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<CompositeRequestId> for u64 {
    fn from(id: CompositeRequestId) -> Self {
        id.0
    }
}

impl fmt::Display for CompositeRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.epoch(), self.sequence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_increments_sequence_by_one() {
        let mut id = CompositeRequestId::from_epoch(1);
        assert_eq!(id.sequence(), 0);

        let first = id.advance();
        let second = id.advance();

        assert_eq!(second, first + 1);
        assert_eq!(id.epoch(), 1);
        assert_eq!(id.sequence(), 2);
        assert_eq!(id.value(), (1u64 << 32) | 2);
    }

    #[test]
    fn test_epoch_dominates_ordering() {
        let old = CompositeRequestId::from_parts(1, u32::MAX);
        let new = CompositeRequestId::from_parts(2, 0);
        assert!(old < new);
        assert!(CompositeRequestId::from_parts(1, 3) < CompositeRequestId::from_parts(1, 5));
    }

    #[test]
    fn test_can_advance_at_sequence_limit() {
        let id = CompositeRequestId::from_parts(4, u32::MAX);
        assert!(!id.can_advance());
        assert!(CompositeRequestId::from_parts(4, u32::MAX - 1).can_advance());
    }

    #[test]
    fn test_raw_roundtrip_and_display() {
        let id = CompositeRequestId::from_parts(7, 11);
        assert_eq!(CompositeRequestId::from_raw(id.value()), id);
        assert_eq!(u64::from(id), id.value());
        assert_eq!(id.to_string(), "7.11");
    }
}

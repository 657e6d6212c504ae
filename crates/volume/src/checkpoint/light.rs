//! Light checkpoints: changed-block tracking without partition snapshots.
//!
//! A light checkpoint only remembers which blocks were written between it and
//! the previous light checkpoint. Creating one freezes the bitmap collected
//! so far as the checkpoint's data and starts collecting a fresh one. The first
//! checkpoint has no base, so every block counts as changed.

use std::mem;

use blockvol_types::{BlockRange, CheckpointId, VolumeError, error::InvalidBlockRangeSnafu};
use snafu::ensure;

/// Number of bits per word in the backing store.
const BITS_PER_WORD: u64 = 64;

/// One bit per block of the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedBlockBitmap {
    words: Vec<u64>,
    blocks_count: u64,
}

impl ChangedBlockBitmap {
    /// Creates a bitmap with no block marked.
    pub fn new(blocks_count: u64) -> Self {
        Self { words: vec![0; Self::word_count(blocks_count)], blocks_count }
    }

    /// Creates a bitmap with every block marked.
    pub fn all_changed(blocks_count: u64) -> Self {
        let mut bitmap = Self::new(blocks_count);
        if let Some(range) = BlockRange::new(0, blocks_count) {
            bitmap.mark(range);
        }
        bitmap
    }

    /// Marks every block of `range`. Blocks past the end of the volume are ignored.
    pub fn mark(&mut self, range: BlockRange) {
        let end = range.end().min(self.blocks_count);
        let mut block = range.start();
        while block < end {
            let word = (block / BITS_PER_WORD) as usize;
            let bit = block % BITS_PER_WORD;
            if bit == 0 && end - block >= BITS_PER_WORD {
                self.words[word] = u64::MAX;
                block += BITS_PER_WORD;
            } else {
                self.words[word] |= 1u64 << bit;
                block += 1;
            }
        }
    }

    /// Check if a block is marked.
    pub fn is_changed(&self, block: u64) -> bool {
        if block >= self.blocks_count {
            return false;
        }
        let word = (block / BITS_PER_WORD) as usize;
        self.words[word] & (1u64 << (block % BITS_PER_WORD)) != 0
    }

    /// Number of marked blocks.
    pub fn count(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Packs the bits of `range` into bytes, eight blocks per byte, lowest
    /// block in the least significant bit. The last byte is zero-padded.
    pub fn mask(&self, range: BlockRange) -> Vec<u8> {
        let mut mask = Vec::with_capacity(range.block_count().div_ceil(8) as usize);
        let mut block = range.start();
        while block < range.end() {
            let mut byte = 0u8;
            for bit in 0..8 {
                if block >= range.end() {
                    break;
                }
                if self.is_changed(block) {
                    byte |= 1 << bit;
                }
                block += 1;
            }
            mask.push(byte);
        }
        mask
    }

    fn word_count(blocks_count: u64) -> usize {
        blocks_count.div_ceil(BITS_PER_WORD) as usize
    }
}

/// The active light checkpoint of a volume.
#[derive(Debug, Clone)]
pub struct LightCheckpoint {
    blocks_count: u64,
    checkpoint_id: Option<CheckpointId>,
    /// Blocks changed between the previous light checkpoint and the current one.
    checkpoint_data: ChangedBlockBitmap,
    /// Blocks written since the current light checkpoint.
    current: ChangedBlockBitmap,
}

impl LightCheckpoint {
    /// Starts tracking writes. Nothing is known yet, so every block is changed.
    pub fn start(blocks_count: u64) -> Self {
        Self {
            blocks_count,
            checkpoint_id: None,
            checkpoint_data: ChangedBlockBitmap::all_changed(blocks_count),
            current: ChangedBlockBitmap::all_changed(blocks_count),
        }
    }

    /// Makes `checkpoint_id` the current light checkpoint.
    pub fn create_checkpoint(&mut self, checkpoint_id: impl Into<CheckpointId>) {
        self.checkpoint_data =
            mem::replace(&mut self.current, ChangedBlockBitmap::new(self.blocks_count));
        self.checkpoint_id = Some(checkpoint_id.into());
    }

    /// Records a successful write or zero.
    pub fn mark_written(&mut self, range: BlockRange) {
        self.current.mark(range);
    }

    /// Name of the current light checkpoint.
    pub fn checkpoint_id(&self) -> Option<&str> {
        self.checkpoint_id.as_deref()
    }

    /// Changed-block mask of the current checkpoint over `range`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidBlockRange`] if `range` ends past the volume.
    pub fn changed_blocks_mask(&self, range: BlockRange) -> Result<Vec<u8>, VolumeError> {
        ensure!(
            range.end() <= self.blocks_count,
            InvalidBlockRangeSnafu {
                start: range.start(),
                end: range.end(),
                blocks_count: self.blocks_count,
            }
        );
        Ok(self.checkpoint_data.mask(range))
    }
}

/// Serves a changed-blocks query from the light tracker, if one is running.
///
/// # Errors
///
/// Returns [`VolumeError::Rejected`] when light checkpoints are not active,
/// and [`VolumeError::InvalidBlockRange`] for ranges past the volume end.
pub fn light_changed_blocks(
    tracker: Option<&LightCheckpoint>,
    range: BlockRange,
) -> Result<Vec<u8>, VolumeError> {
    match tracker {
        Some(tracker) => tracker.changed_blocks_mask(range),
        None => Err(VolumeError::rejected("Light checkpoint disabled")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use blockvol_types::ErrorCode;

    use super::*;

    fn range(start: u64, end: u64) -> BlockRange {
        BlockRange::new(start, end).unwrap()
    }

    #[test]
    fn test_bitmap_mark_and_count() {
        let mut bitmap = ChangedBlockBitmap::new(300);
        bitmap.mark(range(0, 1));
        bitmap.mark(range(63, 130));
        bitmap.mark(range(290, 400));

        assert!(bitmap.is_changed(0));
        assert!(!bitmap.is_changed(1));
        assert!(bitmap.is_changed(63));
        assert!(bitmap.is_changed(129));
        assert!(!bitmap.is_changed(130));
        assert!(bitmap.is_changed(299));
        assert!(!bitmap.is_changed(300));
        assert_eq!(bitmap.count(), 1 + 67 + 10);
    }

    #[test]
    fn test_all_changed_respects_volume_size() {
        let bitmap = ChangedBlockBitmap::all_changed(70);
        assert_eq!(bitmap.count(), 70);
    }

    #[test]
    fn test_mask_is_lsb_first() {
        let mut bitmap = ChangedBlockBitmap::new(64);
        bitmap.mark(range(0, 1));
        bitmap.mark(range(3, 4));
        bitmap.mark(range(9, 10));

        assert_eq!(bitmap.mask(range(0, 16)), vec![0b0000_1001, 0b0000_0010]);
        // An unaligned start shifts the packing.
        assert_eq!(bitmap.mask(range(3, 13)), vec![0b0100_0001, 0b00]);
    }

    #[test]
    fn test_first_checkpoint_reports_everything() {
        let mut light = LightCheckpoint::start(16);
        light.create_checkpoint("c1");
        assert_eq!(light.changed_blocks_mask(range(0, 16)).unwrap(), vec![0xff, 0xff]);
    }

    #[test]
    fn test_second_checkpoint_reports_writes_in_between() {
        let mut light = LightCheckpoint::start(16);
        light.create_checkpoint("c1");
        light.mark_written(range(2, 4));
        light.create_checkpoint("c2");

        assert_eq!(light.checkpoint_id(), Some("c2"));
        assert_eq!(light.changed_blocks_mask(range(0, 16)).unwrap(), vec![0b0000_1100, 0]);

        // Writes after the checkpoint do not change its data.
        light.mark_written(range(8, 9));
        assert_eq!(light.changed_blocks_mask(range(0, 16)).unwrap(), vec![0b0000_1100, 0]);
    }

    #[test]
    fn test_range_past_end_is_invalid() {
        let light = LightCheckpoint::start(16);
        let err = light.changed_blocks_mask(range(8, 17)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidBlockRange);
    }

    #[test]
    fn test_disabled_tracker_rejects() {
        let err = light_changed_blocks(None, range(0, 8)).unwrap_err();
        assert_eq!(err, VolumeError::rejected("Light checkpoint disabled"));
    }
}

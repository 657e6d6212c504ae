//! Proptest strategies for blockvol domain types.
//!
//! Reusable generators for property-based testing across crates. Strategies produce
//! well-formed domain values while exploring edge cases through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use blockvol_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(range in strategies::arb_block_range(1024)) {
//!         prop_assert!(range.end() <= 1024);
//!     }
//! }
//! ```

use blockvol_types::{
    BlockRange, CheckpointRequest, CheckpointRequestId, CheckpointRequestType, CheckpointType,
    CompositeRequestId,
};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

/// Generates a non-empty [`BlockRange`] inside `[0, max_block)`.
///
/// Lengths are capped at 64 blocks so that random ranges collide often.
///
/// # Panics
///
/// The strategy panics during generation if `max_block` is zero.
pub fn arb_block_range(max_block: u64) -> impl Strategy<Value = BlockRange> {
    (0..max_block).prop_flat_map(move |start| {
        let max_len = (max_block - start).min(64);
        (Just(start), 1..=max_len).prop_map(|(start, len)| {
            BlockRange::with_length(start, len).unwrap_or_else(|| {
                unreachable!("start + len <= max_block and len >= 1")
            })
        })
    })
}

/// Generates a [`CompositeRequestId`] with epoch 0-7 and a sequence below one million.
pub fn arb_composite_id() -> impl Strategy<Value = CompositeRequestId> {
    (0u32..8, 0u32..1_000_000).prop_map(|(epoch, seq)| CompositeRequestId::from_parts(epoch, seq))
}

/// Generates `(request_id, range)` pairs for exercising an in-flight range set.
///
/// Request ids are drawn from a small pool so that re-adds and removals of
/// live ids are frequent.
pub fn arb_range_requests(
    max_block: u64,
    count: usize,
) -> impl Strategy<Value = Vec<(u64, BlockRange)>> {
    proptest::collection::vec((1u64..32, arb_block_range(max_block)), 1..count)
}

/// Generates an arbitrary [`DateTime<Utc>`] between 2020-01-01 and 2030-01-01.
pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800i64..1_893_456_000i64).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
    })
}

/// Generates a checkpoint request type.
pub fn arb_request_type() -> impl Strategy<Value = CheckpointRequestType> {
    prop_oneof![
        Just(CheckpointRequestType::Create),
        Just(CheckpointRequestType::Delete),
        Just(CheckpointRequestType::DeleteData),
    ]
}

/// Generates a checkpoint type.
pub fn arb_checkpoint_type() -> impl Strategy<Value = CheckpointType> {
    prop_oneof![Just(CheckpointType::Normal), Just(CheckpointType::Light)]
}

/// Generates a freshly received [`CheckpointRequest`] with a short checkpoint name.
pub fn arb_checkpoint_request() -> impl Strategy<Value = CheckpointRequest> {
    (1u64..1_000_000, "[a-z][a-z0-9-]{0,15}", arb_timestamp(), arb_request_type(), arb_checkpoint_type())
        .prop_map(|(id, name, timestamp, req_type, checkpoint_type)| {
            CheckpointRequest::received(
                CheckpointRequestId::new(id),
                name,
                timestamp,
                req_type,
                checkpoint_type,
            )
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn strategy_produces_ranges_in_bounds(range in arb_block_range(100)) {
            prop_assert!(range.start() < range.end());
            prop_assert!(range.end() <= 100);
            prop_assert!(range.block_count() <= 64);
        }

        #[test]
        fn strategy_produces_ordered_ids(a in arb_composite_id(), b in arb_composite_id()) {
            prop_assert_eq!(a < b, a.value() < b.value());
            prop_assert!(a.epoch() < 8);
        }

        #[test]
        fn strategy_produces_named_requests(request in arb_checkpoint_request()) {
            prop_assert!(!request.checkpoint_id.is_empty());
            prop_assert!(request.request_id.value() > 0);
        }
    }
}

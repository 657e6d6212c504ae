//! Fuzz target for the in-flight range set.
//!
//! Interprets the input as a sequence of add and remove operations and checks
//! after each step that no two registered ranges share a block and that the
//! id index agrees with the range index.

#![no_main]

use libfuzzer_sys::fuzz_target;

use blockvol_types::BlockRange;
use blockvol_volume::{InFlightRangeSet, TryAddResult};

fuzz_target!(|data: &[u8]| {
    let mut set = InFlightRangeSet::<()>::new();
    let mut next_id = 0u64;

    for chunk in data.chunks_exact(3) {
        let (op, a, b) = (chunk[0], u64::from(chunk[1]), u64::from(chunk[2]));
        if op % 4 == 0 {
            set.remove(a);
            continue;
        }
        let Some(range) = BlockRange::with_length(a, b % 32 + 1) else {
            continue;
        };
        let id = next_id;
        next_id += 1;
        match set.try_add(id, range, ()) {
            TryAddResult::Added => assert!(set.contains(id)),
            TryAddResult::Duplicate { request_id } => {
                let (existing, _) = set.get(request_id).expect("duplicate of a registered request");
                assert_eq!(existing, range);
                assert!(!set.contains(id));
            },
            TryAddResult::Overlapped { request_id } => {
                let (existing, _) = set.get(request_id).expect("overlap with a registered request");
                assert!(existing.overlaps(&range));
                assert!(!set.contains(id));
            },
        }

        let entries: Vec<_> = set.iter().map(|(id, range, _)| (id, range)).collect();
        assert_eq!(entries.len(), set.len());
        for (i, (_, left)) in entries.iter().enumerate() {
            for (_, right) in &entries[i + 1..] {
                assert!(!left.overlaps(right), "{left} overlaps {right}");
            }
        }
    }
});

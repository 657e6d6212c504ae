//! Registry of block-range requests currently executing on a storage unit.
//!
//! Entries never overlap. A new range that matches an existing entry exactly is
//! reported as a duplicate of it (a client retry); any other intersection is a
//! conflict the caller resolves by delaying or rejecting the new request.
//!
//! Entries are disjoint, so ordering them by start block means only the entry
//! that starts closest below a new range's end can intersect it: every earlier
//! entry ends at or before that one starts.

use std::collections::{BTreeMap, HashMap};

use blockvol_types::BlockRange;

/// Outcome of [`InFlightRangeSet::try_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAddResult {
    /// The range was free and is now registered.
    Added,
    /// An in-flight request covers exactly the same blocks.
    Duplicate {
        /// Id of the request already registered for the range.
        request_id: u64,
    },
    /// An in-flight request covers some of the blocks.
    Overlapped {
        /// Id of one conflicting request.
        request_id: u64,
    },
}

impl TryAddResult {
    /// Returns true if the range was registered.
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added)
    }

    /// Id of the request this one duplicates, if it is a duplicate.
    pub fn duplicate_request_id(&self) -> Option<u64> {
        match self {
            Self::Duplicate { request_id } => Some(*request_id),
            Self::Added | Self::Overlapped { .. } => None,
        }
    }

    /// Id of the registered request that prevented the add.
    pub fn blocking_request_id(&self) -> Option<u64> {
        match self {
            Self::Duplicate { request_id } | Self::Overlapped { request_id } => Some(*request_id),
            Self::Added => None,
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    request_id: u64,
    range: BlockRange,
    payload: V,
}

/// Non-overlapping set of in-flight ranges keyed by request id.
#[derive(Debug)]
pub struct InFlightRangeSet<V = ()> {
    by_start: BTreeMap<u64, Entry<V>>,
    by_id: HashMap<u64, u64>,
}

impl<V> Default for InFlightRangeSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> InFlightRangeSet<V> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self { by_start: BTreeMap::new(), by_id: HashMap::new() }
    }

    /// Registers `range` for `request_id` unless it intersects an entry.
    ///
    /// Nothing is inserted unless the result is [`TryAddResult::Added`].
    /// Registering an id that is already present is a caller bug.
    pub fn try_add(&mut self, request_id: u64, range: BlockRange, payload: V) -> TryAddResult {
        debug_assert!(
            !self.by_id.contains_key(&request_id),
            "request {request_id} is already in flight"
        );

        if let Some((_, entry)) = self.by_start.range(..range.end()).next_back()
            && entry.range.overlaps(&range)
        {
            return if entry.range == range {
                TryAddResult::Duplicate { request_id: entry.request_id }
            } else {
                TryAddResult::Overlapped { request_id: entry.request_id }
            };
        }

        self.by_id.insert(request_id, range.start());
        self.by_start.insert(range.start(), Entry { request_id, range, payload });
        TryAddResult::Added
    }

    /// Unregisters a request, returning its payload.
    pub fn remove(&mut self, request_id: u64) -> Option<V> {
        let start = self.by_id.remove(&request_id)?;
        self.by_start.remove(&start).map(|entry| entry.payload)
    }

    /// Looks up an in-flight request.
    pub fn get(&self, request_id: u64) -> Option<(BlockRange, &V)> {
        let start = self.by_id.get(&request_id)?;
        self.by_start.get(start).map(|entry| (entry.range, &entry.payload))
    }

    /// Returns true if the request is registered.
    pub fn contains(&self, request_id: u64) -> bool {
        self.by_id.contains_key(&request_id)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    /// Iterates `(request_id, range, payload)` in block order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, BlockRange, &V)> {
        self.by_start.values().map(|entry| (entry.request_id, entry.range, &entry.payload))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use blockvol_test_utils::strategies::arb_range_requests;
    use proptest::prelude::*;

    use super::*;

    fn range(start: u64, end: u64) -> BlockRange {
        BlockRange::new(start, end).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let mut set = InFlightRangeSet::new();

        assert_eq!(set.try_add(1, range(10, 20), ()), TryAddResult::Added);
        assert_eq!(set.try_add(2, range(80, 100), ()), TryAddResult::Added);
        assert_eq!(set.try_add(3, range(40, 50), ()), TryAddResult::Added);

        let overlapped = set.try_add(4, range(5, 15), ());
        assert!(!overlapped.is_added());
        assert_eq!(overlapped.duplicate_request_id(), None);
        assert_eq!(overlapped.blocking_request_id(), Some(1));

        let duplicate = set.try_add(8, range(40, 50), ());
        assert_eq!(duplicate.duplicate_request_id(), Some(3));
        assert_eq!(set.len(), 3);
        assert!(!set.contains(4));
        assert!(!set.contains(8));
    }

    #[test]
    fn test_adjacent_ranges_do_not_conflict() {
        let mut set = InFlightRangeSet::new();
        assert!(set.try_add(1, range(10, 20), ()).is_added());
        assert!(set.try_add(2, range(20, 30), ()).is_added());
        assert!(set.try_add(3, range(0, 10), ()).is_added());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_contained_range_is_overlap_not_duplicate() {
        let mut set = InFlightRangeSet::new();
        set.try_add(1, range(0, 100), ());

        assert_eq!(set.try_add(2, range(10, 20), ()), TryAddResult::Overlapped { request_id: 1 });
        assert_eq!(set.try_add(3, range(0, 200), ()), TryAddResult::Overlapped { request_id: 1 });
    }

    #[test]
    fn test_wide_range_sees_entry_it_covers() {
        let mut set = InFlightRangeSet::new();
        set.try_add(1, range(50, 60), ());

        let result = set.try_add(2, range(0, 1000), ());
        assert_eq!(result.blocking_request_id(), Some(1));
    }

    #[test]
    fn test_remove_frees_range() {
        let mut set = InFlightRangeSet::new();
        set.try_add(1, range(10, 20), "first");

        assert_eq!(set.remove(1), Some("first"));
        assert_eq!(set.remove(1), None);
        assert!(set.is_empty());
        assert!(set.try_add(2, range(15, 25), "second").is_added());
        assert_eq!(set.get(2), Some((range(15, 25), &"second")));
    }

    #[test]
    fn test_iter_is_block_ordered() {
        let mut set = InFlightRangeSet::new();
        set.try_add(7, range(300, 310), ());
        set.try_add(5, range(0, 10), ());
        set.try_add(6, range(100, 110), ());

        let ids: Vec<_> = set.iter().map(|(id, _, _)| id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    proptest! {
        /// Registered ranges stay pairwise disjoint under any add/remove sequence.
        #[test]
        fn prop_entries_never_overlap(requests in arb_range_requests(512, 64)) {
            let mut set = InFlightRangeSet::new();
            for (id, range) in requests {
                if set.contains(id) {
                    set.remove(id);
                    continue;
                }
                let live: Vec<_> = set.iter().map(|(_, r, _)| r).collect();
                let result = set.try_add(id, range, ());
                let conflicting = live.iter().any(|r| r.overlaps(&range));
                prop_assert_eq!(result.is_added(), !conflicting);
                if let Some(dup) = result.duplicate_request_id() {
                    prop_assert_eq!(set.get(dup).map(|(r, _)| r), Some(range));
                }
            }

            let ranges: Vec<_> = set.iter().map(|(_, r, _)| r).collect();
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].end() <= pair[1].start());
            }
        }
    }
}

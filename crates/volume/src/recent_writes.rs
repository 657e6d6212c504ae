//! Bounded history of which request last wrote each block.
//!
//! Used to recognise stale replays: a request that arrives after a newer
//! request already wrote some of its blocks must not overwrite them.
//!
//! Memory is bounded by a low watermark. Every id below the watermark is
//! treated as stale, so segments recorded with such ids can be dropped without
//! ever turning a stale request into an accepted one. The watermark trails the
//! highest recorded id by at most `max_id_distance`, is raised explicitly by
//! [`RecentWriteWindow::advance_low_watermark`], and is pushed past the oldest
//! segments whenever more than `max_tracked_ranges` segments are held.
//!
//! The two automatic raises stop at the eviction limit set with
//! [`RecentWriteWindow::limit_eviction`], normally the oldest id still in
//! flight. While that request runs the window may hold more than
//! `max_tracked_ranges` segments.

use std::collections::{BTreeMap, BTreeSet};

use blockvol_types::{BlockRange, CompositeRequestId, config::RecentWriteWindowConfig};
use tracing::trace;

/// Result of [`RecentWriteWindow::check_recorded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapStatus {
    /// No newer request wrote any of the blocks.
    NotOverlapped,
    /// A newer request wrote some of the blocks, or the id is below the
    /// watermark.
    Overlapped,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    end: u64,
    id: CompositeRequestId,
}

/// Disjoint block segments, each tagged with the id of its last writer.
#[derive(Debug)]
pub struct RecentWriteWindow {
    segments: BTreeMap<u64, Segment>,
    /// `(id, start)` for every segment, oldest id first.
    by_id: BTreeSet<(u64, u64)>,
    low_watermark: u64,
    max_recorded: u64,
    /// Automatic watermark raises never pass this id.
    eviction_limit: u64,
    config: RecentWriteWindowConfig,
}

impl RecentWriteWindow {
    /// Creates an empty window.
    pub fn new(config: RecentWriteWindowConfig) -> Self {
        Self {
            segments: BTreeMap::new(),
            by_id: BTreeSet::new(),
            low_watermark: 0,
            max_recorded: 0,
            eviction_limit: u64::MAX,
            config,
        }
    }

    /// Checks whether executing `id` over `range` would overwrite newer data.
    ///
    /// Equal ids are not overlaps: a retry of the same request rewrites the
    /// same data.
    pub fn check_recorded(&self, id: CompositeRequestId, range: BlockRange) -> OverlapStatus {
        if id.value() < self.low_watermark {
            return OverlapStatus::Overlapped;
        }
        let newer = self
            .segments
            .range(..range.end())
            .rev()
            .take_while(|(_, segment)| segment.end > range.start())
            .any(|(_, segment)| segment.id > id);
        if newer { OverlapStatus::Overlapped } else { OverlapStatus::NotOverlapped }
    }

    /// Records that `id` wrote every block of `range`.
    ///
    /// An id below the watermark is already reported stale everywhere, so
    /// nothing is recorded for it. Its blocks may hold newer segments.
    pub fn add_recorded(&mut self, id: CompositeRequestId, range: BlockRange) {
        if id.value() < self.low_watermark {
            trace!(request_id = %id, range = %range, "Ignored write below watermark");
            return;
        }
        self.carve(range);
        self.insert_segment(range.start(), range.end(), id);

        self.max_recorded = self.max_recorded.max(id.value());
        let trailing = self.max_recorded.saturating_sub(self.config.max_id_distance);
        self.raise_watermark(trailing.min(self.eviction_limit));

        while self.segments.len() > self.config.max_tracked_ranges {
            let Some(&(oldest, start)) = self.by_id.first() else { break };
            if oldest >= self.eviction_limit {
                break;
            }
            self.by_id.pop_first();
            self.segments.remove(&start);
            self.raise_watermark(oldest + 1);
        }
    }

    /// Caps automatic watermark raises at `oldest_in_flight`.
    ///
    /// `None` lifts the cap. The explicit
    /// [`advance_low_watermark`](Self::advance_low_watermark) ignores it.
    pub fn limit_eviction(&mut self, oldest_in_flight: Option<CompositeRequestId>) {
        self.eviction_limit = oldest_in_flight.map_or(u64::MAX, |id| id.value());
    }

    /// Declares every id below `id` stale and forgets their segments.
    pub fn advance_low_watermark(&mut self, id: CompositeRequestId) {
        self.raise_watermark(id.value());
    }

    /// Lowest id still considered fresh.
    pub fn low_watermark(&self) -> CompositeRequestId {
        CompositeRequestId::from_raw(self.low_watermark)
    }

    /// Number of tracked segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if no segment is tracked.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Removes `range` from every segment it intersects, keeping the parts
    /// outside it.
    fn carve(&mut self, range: BlockRange) {
        let overlapping: Vec<u64> = self
            .segments
            .range(..range.end())
            .rev()
            .take_while(|(_, segment)| segment.end > range.start())
            .map(|(start, _)| *start)
            .collect();

        for start in overlapping {
            let Some(segment) = self.segments.remove(&start) else { continue };
            self.by_id.remove(&(segment.id.value(), start));
            if start < range.start() {
                self.insert_segment(start, range.start(), segment.id);
            }
            if segment.end > range.end() {
                self.insert_segment(range.end(), segment.end, segment.id);
            }
        }
    }

    fn insert_segment(&mut self, start: u64, end: u64, id: CompositeRequestId) {
        self.segments.insert(start, Segment { end, id });
        self.by_id.insert((id.value(), start));
    }

    fn raise_watermark(&mut self, watermark: u64) {
        if watermark <= self.low_watermark {
            return;
        }
        self.low_watermark = watermark;
        while let Some(&(id, start)) = self.by_id.first() {
            if id >= watermark {
                break;
            }
            self.by_id.pop_first();
            self.segments.remove(&start);
        }
        trace!(low_watermark = watermark, segments = self.segments.len(), "Raised write window watermark");
    }
}

//! Admission of write and zero requests on one storage unit.
//!
//! Every write or zero request passes through [`WriteAdmission::admit`] before
//! it touches the unit. The admission combines two checks:
//!
//! - the [`InFlightRangeSet`] serializes requests whose block ranges intersect,
//! - the [`RecentWriteWindow`] recognises replays that newer writes already
//!   superseded.
//!
//! ## Decisions
//!
//! | In-flight check | Window check | Single unit        | Multi unit         |
//! |-----------------|--------------|--------------------|--------------------|
//! | added           | not stale    | `Proceed`          | `Proceed`          |
//! | added           | stale        | `AlreadySatisfied` | `Rejected`         |
//! | same range      | -            | `Delayed`          | `Delayed`          |
//! | overlapping     | -            | `Delayed`          | `Rejected`         |
//!
//! A delayed request waits for the specific request that blocked it. When that
//! request completes, its waiters are re-evaluated in arrival order. A duplicate
//! of a request that completed successfully is answered `AlreadySatisfied`
//! without executing.
//!
//! Each request bumps each counter of [`AdmissionCounters`] at most once. A
//! waiter that is queued again behind another blocker is not counted again; a
//! request that waited and was then answered without executing counts both as
//! waiting (`delayed` or `duplicate`) and as `already`.
//!
//! The write window never evicts history newer than the oldest admitted
//! request, so a slow request cannot be overtaken by eviction while it runs.
//!
//! A stale multi-unit request is rejected rather than acknowledged because the
//! other units it spans may not hold the newer data.

use std::collections::{BTreeMap, HashMap, VecDeque};

use blockvol_types::{
    BlockRange, CompositeRequestId, VolumeError, config::RecentWriteWindowConfig,
};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::debug;

use crate::{
    metrics,
    recent_writes::{OverlapStatus, RecentWriteWindow},
    requests_inflight::{InFlightRangeSet, TryAddResult},
};

/// What a unit write request does to its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Stores caller data.
    Write,
    /// Fills the blocks with zeroes.
    Zero,
}

impl WriteKind {
    /// Returns a static string label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Zero => "zero",
        }
    }
}

/// A write or zero request addressed to one storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitWriteRequest {
    /// Issuer-assigned id, ordered across epochs.
    pub id: CompositeRequestId,
    /// Blocks the request modifies on this unit.
    pub range: BlockRange,
    /// Write or zero.
    pub kind: WriteKind,
    /// Whether the same request also spans other units.
    pub multi_unit: bool,
}

/// Registration of an admitted request.
///
/// Must be handed back to [`WriteAdmission::complete`] once the request has
/// executed; until then its range stays locked.
#[derive(Debug)]
#[must_use = "an admitted request keeps its range locked until completed"]
pub struct WritePermit {
    key: u64,
    request: UnitWriteRequest,
}

impl WritePermit {
    /// The admitted request.
    pub fn request(&self) -> &UnitWriteRequest {
        &self.request
    }
}

/// Outcome of [`WriteAdmission::admit`].
#[derive(Debug)]
pub enum Admission {
    /// Execute the request, then call [`WriteAdmission::complete`].
    Proceed(WritePermit),
    /// Newer data is already in place; answer success without executing.
    AlreadySatisfied,
    /// Retriable refusal.
    Rejected(VolumeError),
    /// Wait for a conflicting request to finish.
    Delayed(DelayedAdmission),
}

impl Admission {
    /// Returns a static string label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed(_) => "proceed",
            Self::AlreadySatisfied => "already_satisfied",
            Self::Rejected(_) => "rejected",
            Self::Delayed(_) => "delayed",
        }
    }
}

/// A pending admission that resolves once its blocker completes.
#[derive(Debug)]
pub struct DelayedAdmission {
    rx: oneshot::Receiver<Admission>,
}

impl DelayedAdmission {
    /// Waits for the final decision. Never returns [`Admission::Delayed`].
    ///
    /// If the admission state is dropped before the decision is made the
    /// request is rejected.
    pub async fn wait(self) -> Admission {
        self.rx.await.unwrap_or_else(|_| Admission::Rejected(abandoned()))
    }

    /// Returns the final decision if it has been made.
    pub fn try_resolve(&mut self) -> Option<Admission> {
        match self.rx.try_recv() {
            Ok(admission) => Some(admission),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Admission::Rejected(abandoned())),
        }
    }
}

fn abandoned() -> VolumeError {
    VolumeError::rejected("write admission was abandoned")
}

/// Snapshot of admission decision counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionCounters {
    /// Requests queued behind an overlapping request.
    pub delayed: u64,
    /// Requests refused.
    pub rejected: u64,
    /// Requests answered without executing.
    pub already: u64,
    /// Requests that repeated the exact range of an in-flight request.
    pub duplicate: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitReason {
    Duplicate,
    Overlap,
}

struct Waiter {
    request: UnitWriteRequest,
    reason: WaitReason,
    tx: oneshot::Sender<Admission>,
}

enum Decision {
    Ready(Admission),
    Wait { blocker: u64, reason: WaitReason },
}

/// Admission state of one storage unit.
pub struct WriteAdmission {
    in_flight: InFlightRangeSet<UnitWriteRequest>,
    window: RecentWriteWindow,
    waiters: HashMap<u64, VecDeque<Waiter>>,
    /// Admitted request ids and how many permits carry each.
    admitted_ids: BTreeMap<u64, usize>,
    admitted_multi_unit: usize,
    next_key: u64,
    counters: AdmissionCounters,
}

impl WriteAdmission {
    /// Creates admission state with an empty history.
    pub fn new(config: RecentWriteWindowConfig) -> Self {
        Self {
            in_flight: InFlightRangeSet::new(),
            window: RecentWriteWindow::new(config),
            waiters: HashMap::new(),
            admitted_ids: BTreeMap::new(),
            admitted_multi_unit: 0,
            next_key: 0,
            counters: AdmissionCounters::default(),
        }
    }

    /// Decides what to do with a new request.
    pub fn admit(&mut self, request: UnitWriteRequest) -> Admission {
        match self.decide(request, None) {
            Decision::Ready(admission) => admission,
            Decision::Wait { blocker, reason } => {
                let (tx, rx) = oneshot::channel();
                self.enqueue(blocker, Waiter { request, reason, tx });
                Admission::Delayed(DelayedAdmission { rx })
            },
        }
    }

    /// Releases an admitted request and re-evaluates the requests waiting on it.
    ///
    /// On success the request is recorded in the write window, so stale replays
    /// of older ids over the same blocks are recognised.
    pub fn complete(&mut self, permit: WritePermit, success: bool) {
        let WritePermit { key, request } = permit;
        self.in_flight.remove(key);
        if let Some(count) = self.admitted_ids.get_mut(&request.id.value()) {
            *count -= 1;
            if *count == 0 {
                self.admitted_ids.remove(&request.id.value());
            }
        }
        if request.multi_unit {
            self.admitted_multi_unit -= 1;
        }
        if success {
            self.window.limit_eviction(self.oldest_admitted());
            self.window.add_recorded(request.id, request.range);
        }

        let Some(waiters) = self.waiters.remove(&key) else { return };
        let mut abandoned = Vec::new();
        for waiter in waiters {
            if waiter.tx.is_closed() {
                continue;
            }
            if waiter.reason == WaitReason::Duplicate && success {
                self.count(&Admission::AlreadySatisfied);
                let _ = waiter.tx.send(Admission::AlreadySatisfied);
                continue;
            }
            match self.decide(waiter.request, Some(waiter.reason)) {
                Decision::Ready(admission) => {
                    if let Err(Admission::Proceed(permit)) = waiter.tx.send(admission) {
                        abandoned.push(permit);
                    }
                },
                Decision::Wait { blocker, reason } => {
                    self.enqueue(blocker, Waiter { reason, ..waiter });
                },
            }
        }

        for permit in abandoned {
            self.complete(permit, false);
        }
    }

    /// Declares every id below `id` stale.
    pub fn advance_low_watermark(&mut self, id: CompositeRequestId) {
        self.window.advance_low_watermark(id);
    }

    /// Decision counts so far.
    pub fn counters(&self) -> AdmissionCounters {
        self.counters
    }

    /// Number of admitted, not yet completed requests.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of admitted, not yet completed requests spanning several units.
    pub fn multi_unit_in_flight(&self) -> usize {
        self.admitted_multi_unit
    }

    /// Number of requests waiting on another request.
    pub fn waiting_count(&self) -> usize {
        self.waiters.values().map(VecDeque::len).sum()
    }

    /// The write history of the unit.
    pub fn recent_writes(&self) -> &RecentWriteWindow {
        &self.window
    }

    /// Smallest id among admitted, not yet completed requests.
    pub fn oldest_admitted(&self) -> Option<CompositeRequestId> {
        self.admitted_ids.keys().next().map(|raw| CompositeRequestId::from_raw(*raw))
    }

    /// `waited` is the reason a re-evaluated waiter was last queued for; a
    /// request is not counted twice for the same reason.
    fn decide(&mut self, request: UnitWriteRequest, waited: Option<WaitReason>) -> Decision {
        let key = self.next_key;
        match self.in_flight.try_add(key, request.range, request) {
            TryAddResult::Added => {
                self.next_key += 1;
                if self.window.check_recorded(request.id, request.range) == OverlapStatus::NotOverlapped {
                    *self.admitted_ids.entry(request.id.value()).or_default() += 1;
                    if request.multi_unit {
                        self.admitted_multi_unit += 1;
                    }
                    return Decision::Ready(Admission::Proceed(WritePermit { key, request }));
                }
                self.in_flight.remove(key);
                let admission = if request.multi_unit {
                    Admission::Rejected(VolumeError::rejected(format!(
                        "{} {} of request {} is older than recorded writes",
                        request.kind.as_str(),
                        request.range,
                        request.id
                    )))
                } else {
                    Admission::AlreadySatisfied
                };
                debug!(
                    request_id = %request.id,
                    range = %request.range,
                    decision = admission.as_str(),
                    "Stale write request"
                );
                self.count(&admission);
                Decision::Ready(admission)
            },
            TryAddResult::Duplicate { request_id } => {
                if waited != Some(WaitReason::Duplicate) {
                    self.counters.duplicate += 1;
                    metrics::record_admission_decision("duplicate");
                }
                debug!(request_id = %request.id, range = %request.range, "Duplicate write request");
                Decision::Wait { blocker: request_id, reason: WaitReason::Duplicate }
            },
            TryAddResult::Overlapped { request_id } if request.multi_unit => {
                let admission = Admission::Rejected(VolumeError::rejected(format!(
                    "{} {} of multi-unit request {} overlaps an in-flight request",
                    request.kind.as_str(),
                    request.range,
                    request.id
                )));
                debug!(request_id = %request.id, range = %request.range, "Rejected overlapping multi-unit request");
                self.count(&admission);
                Decision::Ready(admission)
            },
            TryAddResult::Overlapped { request_id } => {
                if waited != Some(WaitReason::Overlap) {
                    self.counters.delayed += 1;
                    metrics::record_admission_decision("delayed");
                }
                debug!(request_id = %request.id, range = %request.range, "Delayed overlapping request");
                Decision::Wait { blocker: request_id, reason: WaitReason::Overlap }
            },
        }
    }

    fn enqueue(&mut self, blocker: u64, waiter: Waiter) {
        self.waiters.entry(blocker).or_default().push_back(waiter);
    }

    fn count(&mut self, admission: &Admission) {
        match admission {
            Admission::AlreadySatisfied => self.counters.already += 1,
            Admission::Rejected(_) => self.counters.rejected += 1,
            Admission::Proceed(_) | Admission::Delayed(_) => return,
        }
        metrics::record_admission_decision(admission.as_str());
    }
}

impl std::fmt::Debug for WriteAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAdmission")
            .field("in_flight", &self.in_flight.len())
            .field("waiting", &self.waiting_count())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

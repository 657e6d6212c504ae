//! Fan-out protocol that runs one checkpoint request across all partitions.
//!
//! ```text
//!   start ──► Draining ──► Acting ──► Finalizing ──► Terminated
//!                │            │            ▲
//!                └────────────┴── failure ─┴──► Terminated (request aborted)
//! ```
//!
//! - **Draining** (create only, skipped for a volume with a single blob-storage
//!   partition): every partition finishes its in-flight writes.
//! - **Acting**: every partition executes the checkpoint operation. A
//!   disk-registry-based partition has no snapshot support and is not asked;
//!   the outcome is decided locally.
//! - **Finalizing**: the volume durably records the request as finished; the
//!   caller is answered once that is confirmed.
//!
//! The coordinator is a pure state machine. It consumes
//! [`CoordinatorMessage`]s and produces [`CoordinatorEffect`]s that the volume
//! carries out, so every transition is testable without a runtime. Messages
//! are dispatched through a table keyed by `(state, message kind)`; anything
//! without an entry is logged and dropped.

use std::fmt;

use blockvol_types::{
    CheckpointId, CheckpointRequestId, CheckpointRequestType, PartitionDescriptor, VolumeError,
    VolumeTopology,
};
use tracing::{debug, error, info, warn};

use crate::{
    metrics,
    trace_context::{ForkedTraces, TraceContext},
    transport::PartitionRequest,
};

/// The checkpoint operation a coordinator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOperation {
    /// Take a snapshot on every partition.
    Create {
        /// Checkpoint name.
        checkpoint_id: CheckpointId,
    },
    /// Remove the snapshot and its data.
    Delete {
        /// Checkpoint name.
        checkpoint_id: CheckpointId,
    },
    /// Remove the snapshot data only.
    DeleteData {
        /// Checkpoint name.
        checkpoint_id: CheckpointId,
    },
}

impl CheckpointOperation {
    /// Builds the operation for a request type.
    pub fn new(req_type: CheckpointRequestType, checkpoint_id: impl Into<CheckpointId>) -> Self {
        let checkpoint_id = checkpoint_id.into();
        match req_type {
            CheckpointRequestType::Create => Self::Create { checkpoint_id },
            CheckpointRequestType::Delete => Self::Delete { checkpoint_id },
            CheckpointRequestType::DeleteData => Self::DeleteData { checkpoint_id },
        }
    }

    /// Checkpoint the operation applies to.
    pub fn checkpoint_id(&self) -> &str {
        match self {
            Self::Create { checkpoint_id }
            | Self::Delete { checkpoint_id }
            | Self::DeleteData { checkpoint_id } => checkpoint_id,
        }
    }

    /// The request each partition receives in the acting phase.
    pub fn partition_request(&self) -> PartitionRequest {
        let checkpoint_id = self.checkpoint_id().to_string();
        match self {
            Self::Create { .. } => PartitionRequest::CreateCheckpoint { checkpoint_id },
            Self::Delete { .. } => PartitionRequest::DeleteCheckpoint { checkpoint_id },
            Self::DeleteData { .. } => PartitionRequest::DeleteCheckpointData { checkpoint_id },
        }
    }

    /// Returns a static string label for logs.
    pub fn as_str(&self) -> &'static str {
        self.partition_request().as_str()
    }
}

/// Protocol phase of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for every partition to drain.
    Draining,
    /// Waiting for every partition to execute the operation.
    Acting,
    /// Waiting for the volume to record the outcome.
    Finalizing,
    /// Finished; the caller has been answered.
    Terminated,
}

impl CoordinatorState {
    /// Returns a static string label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draining => "draining",
            Self::Acting => "acting",
            Self::Finalizing => "finalizing",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorMessage {
    /// A partition answered a drain request.
    DrainResponse {
        /// Cookie of the drain request.
        cookie: u64,
        /// The partition's answer.
        result: Result<(), VolumeError>,
    },
    /// A drain request could not be delivered.
    DrainUndelivered {
        /// Cookie of the drain request.
        cookie: u64,
    },
    /// A partition answered the checkpoint operation.
    ActionResponse {
        /// Cookie of the checkpoint request.
        cookie: u64,
        /// The partition's answer.
        result: Result<(), VolumeError>,
    },
    /// A checkpoint request could not be delivered.
    ActionUndelivered {
        /// Cookie of the checkpoint request.
        cookie: u64,
    },
    /// The volume durably recorded the outcome requested by
    /// [`CoordinatorEffect::UpdateLedger`].
    LedgerUpdated,
    /// The volume is shutting down.
    PoisonPill,
}

/// Discriminant of [`CoordinatorMessage`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// [`CoordinatorMessage::DrainResponse`].
    DrainResponse,
    /// [`CoordinatorMessage::DrainUndelivered`].
    DrainUndelivered,
    /// [`CoordinatorMessage::ActionResponse`].
    ActionResponse,
    /// [`CoordinatorMessage::ActionUndelivered`].
    ActionUndelivered,
    /// [`CoordinatorMessage::LedgerUpdated`].
    LedgerUpdated,
    /// [`CoordinatorMessage::PoisonPill`].
    PoisonPill,
}

impl MessageKind {
    /// Returns a static string label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DrainResponse => "drain_response",
            Self::DrainUndelivered => "drain_undelivered",
            Self::ActionResponse => "action_response",
            Self::ActionUndelivered => "action_undelivered",
            Self::LedgerUpdated => "ledger_updated",
            Self::PoisonPill => "poison_pill",
        }
    }
}

impl CoordinatorMessage {
    /// Dispatch key of the message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::DrainResponse { .. } => MessageKind::DrainResponse,
            Self::DrainUndelivered { .. } => MessageKind::DrainUndelivered,
            Self::ActionResponse { .. } => MessageKind::ActionResponse,
            Self::ActionUndelivered { .. } => MessageKind::ActionUndelivered,
            Self::LedgerUpdated => MessageKind::LedgerUpdated,
            Self::PoisonPill => MessageKind::PoisonPill,
        }
    }
}

/// Work the volume performs on behalf of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEffect {
    /// Deliver `request` to `partition`; answer with a response or undelivered
    /// message carrying `cookie`.
    Send {
        /// Correlates the answer with this request.
        cookie: u64,
        /// Destination.
        partition: PartitionDescriptor,
        /// What to deliver.
        request: PartitionRequest,
        /// Child span of the coordinator's trace.
        trace: TraceContext,
    },
    /// Durably finish the request, then send [`CoordinatorMessage::LedgerUpdated`].
    UpdateLedger {
        /// Request to finish.
        request_id: CheckpointRequestId,
        /// `true` for completed, `false` for rejected.
        completed: bool,
    },
    /// Durably mark the request rejected. The coordinator has already
    /// terminated and expects no confirmation.
    Abort {
        /// Request to reject.
        request_id: CheckpointRequestId,
        /// Why the request failed.
        error: VolumeError,
    },
    /// Answer the caller.
    Reply(Result<(), VolumeError>),
}

type Handler = fn(&mut CheckpointCoordinator, CoordinatorMessage, &mut Vec<CoordinatorEffect>);

/// Transitions of the protocol. Pairs not listed here are unexpected.
const DISPATCH: &[(CoordinatorState, MessageKind, Handler)] = &[
    (CoordinatorState::Draining, MessageKind::DrainResponse, CheckpointCoordinator::on_drain_response),
    (CoordinatorState::Draining, MessageKind::DrainUndelivered, CheckpointCoordinator::on_drain_undelivered),
    (CoordinatorState::Draining, MessageKind::PoisonPill, CheckpointCoordinator::on_poison_pill),
    (CoordinatorState::Acting, MessageKind::ActionResponse, CheckpointCoordinator::on_action_response),
    (CoordinatorState::Acting, MessageKind::ActionUndelivered, CheckpointCoordinator::on_action_undelivered),
    (CoordinatorState::Acting, MessageKind::PoisonPill, CheckpointCoordinator::on_poison_pill),
    (CoordinatorState::Finalizing, MessageKind::LedgerUpdated, CheckpointCoordinator::on_ledger_updated),
    (CoordinatorState::Finalizing, MessageKind::PoisonPill, CheckpointCoordinator::on_poison_pill),
];

/// Runs one checkpoint request through the partition protocol.
#[derive(Debug)]
pub struct CheckpointCoordinator {
    request_id: CheckpointRequestId,
    operation: CheckpointOperation,
    partitions: Vec<PartitionDescriptor>,
    state: CoordinatorState,
    trace: TraceContext,
    forks: ForkedTraces,
    next_cookie: u64,
    /// Error reported to the caller after a locally decided rejection.
    error: Option<VolumeError>,
}

impl CheckpointCoordinator {
    /// Starts the protocol and returns the first requests to send.
    pub fn start(
        request_id: CheckpointRequestId,
        operation: CheckpointOperation,
        topology: &VolumeTopology,
        trace: TraceContext,
    ) -> (Self, Vec<CoordinatorEffect>) {
        let skip_drain =
            topology.partition_count() == 1 && !topology.is_disk_registry_based();
        let drain = matches!(operation, CheckpointOperation::Create { .. }) && !skip_drain;

        let mut coordinator = Self {
            request_id,
            operation,
            partitions: topology.partitions().to_vec(),
            state: CoordinatorState::Draining,
            trace,
            forks: ForkedTraces::new(),
            next_cookie: 0,
            error: None,
        };
        info!(
            request_id = %request_id,
            checkpoint_id = coordinator.operation.checkpoint_id(),
            operation = coordinator.operation.as_str(),
            partitions = coordinator.partitions.len(),
            drain,
            trace_id = %coordinator.trace.trace_id,
            "Starting checkpoint request"
        );

        let mut effects = Vec::new();
        if drain {
            coordinator.drain(&mut effects);
        } else {
            coordinator.act(&mut effects);
        }
        (coordinator, effects)
    }

    /// Feeds one message through the dispatch table.
    pub fn handle(&mut self, message: CoordinatorMessage) -> Vec<CoordinatorEffect> {
        let kind = message.kind();
        let handler = DISPATCH
            .iter()
            .find(|(state, k, _)| *state == self.state && *k == kind)
            .map(|(_, _, handler)| *handler);

        let mut effects = Vec::new();
        match handler {
            Some(handler) => handler(self, message, &mut effects),
            None => {
                warn!(
                    request_id = %self.request_id,
                    state = self.state.as_str(),
                    kind = kind.as_str(),
                    "Unexpected checkpoint coordinator message"
                );
                metrics::record_unexpected_message(self.state.as_str(), kind.as_str());
            },
        }
        effects
    }

    /// Request being executed.
    pub fn request_id(&self) -> CheckpointRequestId {
        self.request_id
    }

    /// Operation being executed.
    pub fn operation(&self) -> &CheckpointOperation {
        &self.operation
    }

    /// Current protocol phase.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Returns true once the caller has been answered.
    pub fn is_terminated(&self) -> bool {
        self.state == CoordinatorState::Terminated
    }

    fn drain(&mut self, effects: &mut Vec<CoordinatorEffect>) {
        self.state = CoordinatorState::Draining;
        for partition in self.partitions.clone() {
            self.send(partition, PartitionRequest::Drain, effects);
        }
    }

    fn act(&mut self, effects: &mut Vec<CoordinatorEffect>) {
        self.state = CoordinatorState::Acting;
        for partition in self.partitions.clone() {
            if partition.disk_registry_based {
                // Writes are already blocked by the volume; nothing to ask.
                let completed = match &self.operation {
                    CheckpointOperation::Create { checkpoint_id } if checkpoint_id.is_empty() => {
                        self.error = Some(VolumeError::InvalidArgument {
                            message: "empty checkpoint name".to_string(),
                        });
                        false
                    },
                    _ => true,
                };
                self.finalize(completed, effects);
                return;
            }
            let request = self.operation.partition_request();
            self.send(partition, request, effects);
        }
    }

    fn finalize(&mut self, completed: bool, effects: &mut Vec<CoordinatorEffect>) {
        self.state = CoordinatorState::Finalizing;
        debug!(request_id = %self.request_id, completed, "Recording checkpoint request outcome");
        effects.push(CoordinatorEffect::UpdateLedger { request_id: self.request_id, completed });
    }

    fn send(
        &mut self,
        partition: PartitionDescriptor,
        request: PartitionRequest,
        effects: &mut Vec<CoordinatorEffect>,
    ) {
        let cookie = self.next_cookie;
        self.next_cookie += 1;
        let trace = self.forks.fork(&self.trace, cookie);
        debug!(
            request_id = %self.request_id,
            tablet_id = %partition.tablet_id,
            cookie,
            kind = request.as_str(),
            "Sending request to partition"
        );
        effects.push(CoordinatorEffect::Send { cookie, partition, request, trace });
    }

    /// Joins the trace of a response. Returns false for unknown or repeated cookies.
    fn join(&mut self, cookie: u64) -> bool {
        if self.forks.join(cookie).is_some() {
            return true;
        }
        warn!(request_id = %self.request_id, cookie, "Response for unknown request cookie");
        false
    }

    fn fail(&mut self, error: VolumeError, effects: &mut Vec<CoordinatorEffect>) {
        error!(
            request_id = %self.request_id,
            checkpoint_id = self.operation.checkpoint_id(),
            state = self.state.as_str(),
            error = %error,
            "Checkpoint request failed"
        );
        self.state = CoordinatorState::Terminated;
        effects.push(CoordinatorEffect::Abort { request_id: self.request_id, error: error.clone() });
        effects.push(CoordinatorEffect::Reply(Err(error)));
    }

    fn on_drain_response(&mut self, message: CoordinatorMessage, effects: &mut Vec<CoordinatorEffect>) {
        let CoordinatorMessage::DrainResponse { cookie, result } = message else { return };
        if !self.join(cookie) {
            return;
        }
        match result {
            Err(error) => {
                metrics::record_partition_request("drain", "error");
                self.fail(error, effects);
            },
            Ok(()) => {
                metrics::record_partition_request("drain", "success");
                if self.forks.outstanding() == 0 {
                    self.act(effects);
                }
            },
        }
    }

    fn on_drain_undelivered(&mut self, message: CoordinatorMessage, effects: &mut Vec<CoordinatorEffect>) {
        let CoordinatorMessage::DrainUndelivered { cookie } = message else { return };
        if !self.join(cookie) {
            return;
        }
        metrics::record_partition_request("drain", "undelivered");
        self.fail(VolumeError::rejected("failed to deliver drain request to some partitions"), effects);
    }

    fn on_action_response(&mut self, message: CoordinatorMessage, effects: &mut Vec<CoordinatorEffect>) {
        let CoordinatorMessage::ActionResponse { cookie, result } = message else { return };
        if !self.join(cookie) {
            return;
        }
        let kind = self.operation.as_str();
        match result {
            Err(error) => {
                metrics::record_partition_request(kind, "error");
                self.fail(error, effects);
            },
            Ok(()) => {
                metrics::record_partition_request(kind, "success");
                if self.forks.outstanding() == 0 {
                    self.finalize(true, effects);
                }
            },
        }
    }

    fn on_action_undelivered(&mut self, message: CoordinatorMessage, effects: &mut Vec<CoordinatorEffect>) {
        let CoordinatorMessage::ActionUndelivered { cookie } = message else { return };
        if !self.join(cookie) {
            return;
        }
        metrics::record_partition_request(self.operation.as_str(), "undelivered");
        self.fail(
            VolumeError::rejected("failed to deliver checkpoint request to some partitions"),
            effects,
        );
    }

    fn on_ledger_updated(&mut self, _message: CoordinatorMessage, effects: &mut Vec<CoordinatorEffect>) {
        self.state = CoordinatorState::Terminated;
        let result = match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        info!(
            request_id = %self.request_id,
            checkpoint_id = self.operation.checkpoint_id(),
            success = result.is_ok(),
            "Checkpoint request finished"
        );
        effects.push(CoordinatorEffect::Reply(result));
    }

    fn on_poison_pill(&mut self, _message: CoordinatorMessage, effects: &mut Vec<CoordinatorEffect>) {
        info!(
            request_id = %self.request_id,
            state = self.state.as_str(),
            "Checkpoint request abandoned by dying tablet"
        );
        self.state = CoordinatorState::Terminated;
        effects.push(CoordinatorEffect::Reply(Err(VolumeError::tablet_dead())));
    }
}

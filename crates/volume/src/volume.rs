//! The volume actor.
//!
//! A single task owns all checkpoint state of a volume: the request ledger,
//! the running coordinator, the light-checkpoint tracker and the admission
//! state of writes in flight. Callers talk to it through a cloneable [`VolumeHandle`]
//! over a bounded mailbox; partition answers, journal outcomes and write
//! completions come back on an internal event queue. Nothing inside the
//! actor is shared, so no locks are taken on the hot path.
//!
//! Checkpoint requests are executed strictly one at a time in arrival order,
//! and only once they are durable. A request that is durable when the volume
//! stops is resumed by the next [`VolumeHandle::start`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use blockvol_storage::CheckpointPersistence;
use blockvol_types::{
    BlockRange, CheckpointId, CheckpointRequest, CheckpointRequestId, CheckpointRequestType,
    CheckpointType, PartitionDescriptor, VolumeError, VolumeTopology, config::VolumeConfig,
    error::InvalidBlockRangeSnafu,
};
use chrono::Utc;
use snafu::ensure;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    admission::{Admission, UnitWriteRequest, WriteAdmission, WritePermit},
    checkpoint::{
        CheckpointCoordinator, CheckpointInfo, CheckpointOperation, CheckpointRequestLedger,
        CoordinatorEffect, CoordinatorMessage, LightCheckpoint, can_execute_write_request,
        light_changed_blocks,
    },
    journal::{self, Transaction, TransactionOutcome},
    metrics,
    trace_context::TraceContext,
    transport::{ChangedBlocksQuery, DeliveryError, PartitionRequest, PartitionTransport},
};

type Reply<T> = oneshot::Sender<T>;

/// Requests from callers.
enum Command {
    Checkpoint {
        req_type: CheckpointRequestType,
        checkpoint_id: CheckpointId,
        checkpoint_type: Option<CheckpointType>,
        trace: TraceContext,
        reply: Reply<Result<(), VolumeError>>,
    },
    GetChangedBlocks {
        query: ChangedBlocksQuery,
        trace: TraceContext,
        reply: Reply<Result<Vec<u8>, VolumeError>>,
    },
    BeginWrite {
        request: UnitWriteRequest,
        reply: Reply<Result<Admission, VolumeError>>,
    },
    CanExecuteWrite {
        reply: Reply<bool>,
    },
    Checkpoints {
        reply: Reply<Vec<CheckpointInfo>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Notifications produced by tasks the actor spawned.
enum Event {
    Coordinator { request_id: CheckpointRequestId, message: CoordinatorMessage },
    Journal(TransactionOutcome),
    WriteCompleted { permit: WritePermit, success: bool },
}

/// Who waits for the outcome of an update transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOrigin {
    /// The coordinator, which answers its caller once the update is durable.
    Coordinator,
    /// A light request; the actor answers the caller itself.
    Light,
    /// A coordinator that already answered and terminated.
    Abort,
}

struct Caller {
    reply: Reply<Result<(), VolumeError>>,
    trace: TraceContext,
}

struct VolumeActor {
    config: VolumeConfig,
    topology: VolumeTopology,
    ledger: CheckpointRequestLedger,
    coordinators: HashMap<CheckpointRequestId, CheckpointCoordinator>,
    callers: HashMap<CheckpointRequestId, Caller>,
    pending_updates: HashMap<CheckpointRequestId, UpdateOrigin>,
    light: Option<LightCheckpoint>,
    admission: WriteAdmission,
    transport: Arc<dyn PartitionTransport>,
    journal: mpsc::UnboundedSender<Transaction>,
    events: mpsc::UnboundedSender<Event>,
    dead: bool,
}

impl VolumeActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        self.process_next_checkpoint_request();
        while !self.dead {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.die("all volume handles dropped"),
                },
            }
        }
        info!("Volume stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Checkpoint { req_type, checkpoint_id, checkpoint_type, trace, reply } => {
                self.accept_checkpoint_request(req_type, checkpoint_id, checkpoint_type, trace, reply);
            },
            Command::GetChangedBlocks { query, trace, reply } => {
                self.get_changed_blocks(query, trace, reply);
            },
            Command::BeginWrite { request, reply } => {
                let result = self.begin_write(request);
                // A caller that went away never gets a guard to release.
                if let Err(Ok(Admission::Proceed(permit))) = reply.send(result) {
                    self.finish_write(permit, false);
                }
            },
            Command::CanExecuteWrite { reply } => {
                let _ = reply.send(can_execute_write_request(&self.topology, &self.ledger));
            },
            Command::Checkpoints { reply } => {
                let _ = reply.send(self.ledger.checkpoints());
            },
            Command::Shutdown { reply } => {
                self.die("shutdown requested");
                let _ = reply.send(());
            },
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Coordinator { request_id, message } => self.deliver(request_id, message),
            Event::Journal(outcome) => self.on_transaction_done(outcome),
            Event::WriteCompleted { permit, success } => self.finish_write(permit, success),
        }
    }

    // ------------------------------------------------------------------
    // Checkpoint requests
    // ------------------------------------------------------------------

    fn accept_checkpoint_request(
        &mut self,
        req_type: CheckpointRequestType,
        checkpoint_id: CheckpointId,
        checkpoint_type: Option<CheckpointType>,
        trace: TraceContext,
        reply: Reply<Result<(), VolumeError>>,
    ) {
        let checkpoint_type = match req_type {
            CheckpointRequestType::Create => checkpoint_type.unwrap_or_default(),
            CheckpointRequestType::Delete => {
                self.ledger.checkpoint_type(&checkpoint_id).unwrap_or_default()
            },
            CheckpointRequestType::DeleteData => CheckpointType::Normal,
        };
        let request = self.ledger.create_new(checkpoint_id, Utc::now(), req_type, checkpoint_type);
        info!(
            request_id = %request.request_id,
            checkpoint_id = %request.checkpoint_id,
            req_type = req_type.as_str(),
            checkpoint_type = ?checkpoint_type,
            trace_id = %trace.trace_id,
            "Received checkpoint request"
        );
        metrics::record_checkpoint_transition(req_type.as_str(), "received");
        metrics::set_checkpoint_queue_depth(self.ledger.pending_count());

        self.callers.insert(request.request_id, Caller { reply, trace });
        self.submit(Transaction::Save(request));
    }

    fn on_transaction_done(&mut self, outcome: TransactionOutcome) {
        let TransactionOutcome { transaction, result } = outcome;
        if let Err(e) = result {
            error!(request_id = %transaction.request_id(), error = %e, "Checkpoint transaction failed");
            if let Transaction::Save(request) = &transaction {
                self.ledger.discard(request.request_id);
            }
            self.die("checkpoint persistence failed");
            return;
        }

        match transaction {
            Transaction::Save(request) => {
                if let Err(e) = self.ledger.set_saved(request.request_id) {
                    error!(request_id = %request.request_id, error = %e, "Failed to mark request saved");
                    return;
                }
                metrics::record_checkpoint_transition(request.req_type.as_str(), "saved");
                self.process_next_checkpoint_request();
            },
            Transaction::Update { request_id, completed } => {
                self.finish_request(request_id, completed);
            },
        }
    }

    fn finish_request(&mut self, request_id: CheckpointRequestId, completed: bool) {
        match self.ledger.set_finished(request_id, completed) {
            Ok(request) => {
                info!(
                    request_id = %request_id,
                    checkpoint_id = %request.checkpoint_id,
                    state = request.state.as_str(),
                    "Checkpoint request finished"
                );
                metrics::record_checkpoint_transition(request.req_type.as_str(), request.state.as_str());
                metrics::set_checkpoint_queue_depth(self.ledger.pending_count());
            },
            Err(e) => error!(request_id = %request_id, error = %e, "Failed to finish request"),
        }

        match self.pending_updates.remove(&request_id) {
            Some(UpdateOrigin::Coordinator) => self.deliver(request_id, CoordinatorMessage::LedgerUpdated),
            Some(UpdateOrigin::Light) => self.reply(request_id, Ok(())),
            Some(UpdateOrigin::Abort) | None => {},
        }
        self.process_next_checkpoint_request();
    }

    fn process_next_checkpoint_request(&mut self) {
        if self.dead || self.ledger.is_request_in_progress() {
            return;
        }
        let Some(request) = self.ledger.next_request_to_execute().cloned() else {
            return;
        };
        let multi_partition_writes = self.admission.multi_unit_in_flight();
        if multi_partition_writes > 0 {
            debug!(
                request_id = %request.request_id,
                writes = multi_partition_writes,
                "Checkpoint request waits for multi-partition writes"
            );
            return;
        }
        if let Err(e) = self.ledger.set_in_progress(request.request_id) {
            error!(request_id = %request.request_id, error = %e, "Failed to start request");
            return;
        }
        metrics::record_checkpoint_transition(request.req_type.as_str(), "in_progress");

        match (request.req_type, request.checkpoint_type) {
            (CheckpointRequestType::Create, CheckpointType::Light) => {
                let blocks_count = self.config.blocks_count;
                self.light
                    .get_or_insert_with(|| LightCheckpoint::start(blocks_count))
                    .create_checkpoint(request.checkpoint_id.clone());
                info!(checkpoint_id = %request.checkpoint_id, "Created light checkpoint");
                self.finish_light_request(&request);
            },
            (CheckpointRequestType::Delete, CheckpointType::Light) => {
                if self.light.as_ref().and_then(LightCheckpoint::checkpoint_id)
                    == Some(request.checkpoint_id.as_str())
                {
                    self.light = None;
                    info!(checkpoint_id = %request.checkpoint_id, "Stopped light checkpoint tracking");
                }
                self.finish_light_request(&request);
            },
            _ => self.start_coordinator(&request),
        }
    }

    fn finish_light_request(&mut self, request: &CheckpointRequest) {
        self.pending_updates.insert(request.request_id, UpdateOrigin::Light);
        self.submit(Transaction::Update { request_id: request.request_id, completed: true });
    }

    fn start_coordinator(&mut self, request: &CheckpointRequest) {
        let trace = self
            .callers
            .get(&request.request_id)
            .map_or_else(TraceContext::new, |caller| caller.trace.clone());
        let operation = CheckpointOperation::new(request.req_type, request.checkpoint_id.clone());
        let (coordinator, effects) =
            CheckpointCoordinator::start(request.request_id, operation, &self.topology, trace);
        self.coordinators.insert(request.request_id, coordinator);
        self.apply_effects(request.request_id, effects);
    }

    fn deliver(&mut self, request_id: CheckpointRequestId, message: CoordinatorMessage) {
        let Some(coordinator) = self.coordinators.get_mut(&request_id) else {
            debug!(request_id = %request_id, kind = message.kind().as_str(), "Message for finished coordinator");
            return;
        };
        let effects = coordinator.handle(message);
        self.apply_effects(request_id, effects);
    }

    fn apply_effects(&mut self, request_id: CheckpointRequestId, effects: Vec<CoordinatorEffect>) {
        for effect in effects {
            match effect {
                CoordinatorEffect::Send { cookie, partition, request, trace } => {
                    self.spawn_partition_request(request_id, cookie, partition, request, trace);
                },
                CoordinatorEffect::UpdateLedger { request_id, completed } => {
                    self.pending_updates.insert(request_id, UpdateOrigin::Coordinator);
                    self.submit(Transaction::Update { request_id, completed });
                },
                CoordinatorEffect::Abort { request_id, error } => {
                    warn!(request_id = %request_id, error = %error, "Checkpoint request aborted");
                    self.pending_updates.insert(request_id, UpdateOrigin::Abort);
                    self.submit(Transaction::Update { request_id, completed: false });
                },
                CoordinatorEffect::Reply(result) => self.reply(request_id, result),
            }
        }
        if self.coordinators.get(&request_id).is_some_and(CheckpointCoordinator::is_terminated) {
            self.coordinators.remove(&request_id);
        }
    }

    fn spawn_partition_request(
        &self,
        request_id: CheckpointRequestId,
        cookie: u64,
        partition: PartitionDescriptor,
        request: PartitionRequest,
        trace: TraceContext,
    ) {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        tokio::spawn(async move {
            let drain = request.is_drain();
            let result = transport.send(&partition, request, &trace).await;
            let message = response_message(drain, cookie, result);
            let _ = events.send(Event::Coordinator { request_id, message });
        });
    }

    fn reply(&mut self, request_id: CheckpointRequestId, result: Result<(), VolumeError>) {
        if let Some(caller) = self.callers.remove(&request_id) {
            let _ = caller.reply.send(result);
        }
    }

    fn submit(&mut self, transaction: Transaction) {
        if self.journal.send(transaction).is_err() {
            self.die("checkpoint journal stopped");
        }
    }

    // ------------------------------------------------------------------
    // Writes and changed blocks
    // ------------------------------------------------------------------

    fn begin_write(&mut self, request: UnitWriteRequest) -> Result<Admission, VolumeError> {
        let range = request.range;
        ensure!(
            range.end() <= self.config.blocks_count,
            InvalidBlockRangeSnafu {
                start: range.start(),
                end: range.end(),
                blocks_count: self.config.blocks_count,
            }
        );
        if !can_execute_write_request(&self.topology, &self.ledger) {
            return Err(VolumeError::rejected("writes are paused while a checkpoint is being taken"));
        }
        let admission = self.admission.admit(request);
        debug!(
            request_id = %request.id,
            kind = request.kind.as_str(),
            range = %range,
            multi_partition = request.multi_unit,
            decision = admission.as_str(),
            "Write request admitted"
        );
        Ok(admission)
    }

    fn finish_write(&mut self, permit: WritePermit, success: bool) {
        let request = *permit.request();
        self.admission.complete(permit, success);
        if success {
            if let Some(light) = self.light.as_mut() {
                light.mark_written(request.range);
            }
        }
        if request.multi_unit && self.admission.multi_unit_in_flight() == 0 {
            self.process_next_checkpoint_request();
        }
    }

    fn get_changed_blocks(
        &mut self,
        query: ChangedBlocksQuery,
        trace: TraceContext,
        reply: Reply<Result<Vec<u8>, VolumeError>>,
    ) {
        if self.ledger.checkpoint_type(&query.high_checkpoint_id) == Some(CheckpointType::Light) {
            let result = light_changed_blocks(self.light.as_ref(), query.range);
            if let Err(e) = &result {
                warn!(checkpoint_id = %query.high_checkpoint_id, error = %e, "Light changed blocks failed");
            }
            metrics::record_changed_blocks_request("light", result.is_ok());
            let _ = reply.send(result);
            return;
        }

        let blocks_count = self.config.blocks_count;
        if query.range.end() > blocks_count {
            metrics::record_changed_blocks_request("partition", false);
            let _ = reply.send(Err(VolumeError::InvalidBlockRange {
                start: query.range.start(),
                end: query.range.end(),
                blocks_count,
            }));
            return;
        }

        let transport = Arc::clone(&self.transport);
        let partitions = self.topology.partitions().to_vec();
        tokio::spawn(async move {
            let result = transport
                .get_changed_blocks(&partitions, query, &trace)
                .await
                .map_err(|e| match e {
                    DeliveryError::Undelivered => VolumeError::rejected(
                        "failed to deliver changed blocks request to some partitions",
                    ),
                    DeliveryError::Failed(e) => e,
                });
            metrics::record_changed_blocks_request("partition", result.is_ok());
            let _ = reply.send(result);
        });
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stops the actor. Every caller still waiting receives `TabletDead`.
    fn die(&mut self, reason: &str) {
        if self.dead {
            return;
        }
        self.dead = true;
        warn!(
            reason,
            coordinators = self.coordinators.len(),
            callers = self.callers.len(),
            "Volume is stopping"
        );

        let coordinators: Vec<_> = self.coordinators.drain().collect();
        for (request_id, mut coordinator) in coordinators {
            let effects = coordinator.handle(CoordinatorMessage::PoisonPill);
            for effect in effects {
                if let CoordinatorEffect::Reply(result) = effect {
                    self.reply(request_id, result);
                }
            }
        }
        for (_, caller) in self.callers.drain() {
            let _ = caller.reply.send(Err(VolumeError::tablet_dead()));
        }
    }
}

fn response_message(
    drain: bool,
    cookie: u64,
    result: Result<(), DeliveryError>,
) -> CoordinatorMessage {
    let result = match result {
        Ok(()) => Ok(()),
        Err(DeliveryError::Failed(e)) => Err(e),
        Err(DeliveryError::Undelivered) if drain => {
            return CoordinatorMessage::DrainUndelivered { cookie };
        },
        Err(DeliveryError::Undelivered) => return CoordinatorMessage::ActionUndelivered { cookie },
    };
    if drain {
        CoordinatorMessage::DrainResponse { cookie, result }
    } else {
        CoordinatorMessage::ActionResponse { cookie, result }
    }
}

/// Cloneable handle to a running volume.
///
/// Every method fails with [`VolumeError::TabletDead`] once the volume stopped.
#[derive(Clone)]
pub struct VolumeHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedSender<Event>,
    shutdown_timeout: Duration,
    trace: Option<TraceContext>,
}

impl VolumeHandle {
    /// Restores the checkpoint requests of the volume and starts its actor.
    ///
    /// Requests that were durable but unfinished are executed again, oldest
    /// first, without a caller to answer.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Storage`] if the persisted requests cannot be
    /// loaded.
    pub async fn start(
        config: VolumeConfig,
        topology: VolumeTopology,
        persistence: Arc<dyn CheckpointPersistence>,
        transport: Arc<dyn PartitionTransport>,
    ) -> Result<Self, VolumeError> {
        let loader = Arc::clone(&persistence);
        let records = tokio::task::spawn_blocking(move || loader.load_checkpoint_requests())
            .await
            .map_err(|e| VolumeError::Internal {
                message: format!("checkpoint load task failed: {e}"),
            })??;
        let ledger = CheckpointRequestLedger::restore(records);

        let span = info_span!("volume", disk_id = %config.disk_id);
        span.in_scope(|| {
            info!(
                partitions = topology.partition_count(),
                disk_registry_based = topology.is_disk_registry_based(),
                pending = ledger.pending_count(),
                checkpoints = ledger.checkpoints().len(),
                "Starting volume"
            );
        });

        let (commands_tx, commands_rx) = mpsc::channel(config.mailbox_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let journal_events = events_tx.clone();
        let journal = journal::spawn(persistence, move |outcome| {
            let _ = journal_events.send(Event::Journal(outcome));
        });

        let handle = Self {
            commands: commands_tx,
            events: events_tx.clone(),
            shutdown_timeout: config.shutdown_timeout,
            trace: None,
        };
        let actor = VolumeActor {
            admission: WriteAdmission::new(config.recent_writes),
            config,
            topology,
            ledger,
            coordinators: HashMap::new(),
            callers: HashMap::new(),
            pending_updates: HashMap::new(),
            light: None,
            transport,
            journal,
            events: events_tx,
            dead: false,
        };
        tokio::spawn(actor.run(commands_rx, events_rx).instrument(span));
        Ok(handle)
    }

    /// Returns a handle whose requests are children of `trace`.
    #[must_use]
    pub fn with_trace(&self, trace: TraceContext) -> Self {
        Self { trace: Some(trace), ..self.clone() }
    }

    /// Returns a handle whose requests continue the caller's W3C
    /// `traceparent` header. An absent or malformed header starts a new trace.
    #[must_use]
    pub fn with_traceparent(&self, traceparent: Option<&str>) -> Self {
        self.with_trace(TraceContext::extract_or_generate(traceparent))
    }

    fn request_trace(&self) -> TraceContext {
        self.trace.as_ref().map_or_else(TraceContext::new, TraceContext::child)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, VolumeError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| VolumeError::tablet_dead())?;
        rx.await.map_err(|_| VolumeError::tablet_dead())
    }

    async fn checkpoint_request(
        &self,
        req_type: CheckpointRequestType,
        checkpoint_id: CheckpointId,
        checkpoint_type: Option<CheckpointType>,
    ) -> Result<(), VolumeError> {
        let trace = self.request_trace();
        self.call(|reply| Command::Checkpoint {
            req_type,
            checkpoint_id,
            checkpoint_type,
            trace,
            reply,
        })
        .await?
    }

    /// Creates a checkpoint. Resolves once the checkpoint exists durably.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Rejected`] if a partition could not be reached,
    /// the partition's error if it refused, and [`VolumeError::TabletDead`] if
    /// the volume stopped first.
    pub async fn create_checkpoint(
        &self,
        checkpoint_id: impl Into<CheckpointId>,
        checkpoint_type: CheckpointType,
    ) -> Result<(), VolumeError> {
        self.checkpoint_request(CheckpointRequestType::Create, checkpoint_id.into(), Some(checkpoint_type))
            .await
    }

    /// Deletes a checkpoint and its data.
    ///
    /// # Errors
    ///
    /// Same as [`VolumeHandle::create_checkpoint`].
    pub async fn delete_checkpoint(&self, checkpoint_id: impl Into<CheckpointId>) -> Result<(), VolumeError> {
        self.checkpoint_request(CheckpointRequestType::Delete, checkpoint_id.into(), None).await
    }

    /// Frees the data of a checkpoint, keeping the checkpoint itself.
    ///
    /// # Errors
    ///
    /// Same as [`VolumeHandle::create_checkpoint`].
    pub async fn delete_checkpoint_data(
        &self,
        checkpoint_id: impl Into<CheckpointId>,
    ) -> Result<(), VolumeError> {
        self.checkpoint_request(CheckpointRequestType::DeleteData, checkpoint_id.into(), None).await
    }

    /// Returns the changed-block mask between two checkpoints over `range`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidBlockRange`] for a range past the volume
    /// end and [`VolumeError::Rejected`] if light checkpoints are not active
    /// or a partition could not be reached.
    pub async fn get_changed_blocks(
        &self,
        low_checkpoint_id: impl Into<CheckpointId>,
        high_checkpoint_id: impl Into<CheckpointId>,
        range: BlockRange,
    ) -> Result<Vec<u8>, VolumeError> {
        let query = ChangedBlocksQuery {
            low_checkpoint_id: low_checkpoint_id.into(),
            high_checkpoint_id: high_checkpoint_id.into(),
            range,
        };
        let trace = self.request_trace();
        self.call(|reply| Command::GetChangedBlocks { query, trace, reply }).await?
    }

    /// Admits a write or zero request.
    ///
    /// A request overlapping a running one waits here until that request
    /// finishes. On [`WriteStart::Execute`] the guard must be completed when
    /// the write finishes; dropping it counts as a failed write. Checkpoint
    /// requests do not start while a multi-partition write is admitted.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidBlockRange`] for a range past the volume
    /// end and [`VolumeError::Rejected`] while writes are paused by a
    /// checkpoint, for a multi-partition request that overlaps a running one,
    /// and for a stale multi-partition replay.
    pub async fn begin_write(&self, request: UnitWriteRequest) -> Result<WriteStart, VolumeError> {
        let mut admission = self.call(|reply| Command::BeginWrite { request, reply }).await??;
        loop {
            match admission {
                Admission::Delayed(delayed) => admission = delayed.wait().await,
                Admission::Proceed(permit) => {
                    return Ok(WriteStart::Execute(VolumeWriteGuard::new(permit, self.events.clone())));
                },
                Admission::AlreadySatisfied => return Ok(WriteStart::AlreadySatisfied),
                Admission::Rejected(err) => return Err(err),
            }
        }
    }

    /// Whether a write or zero request may execute right now.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::TabletDead`] if the volume stopped.
    pub async fn can_execute_write(&self) -> Result<bool, VolumeError> {
        self.call(|reply| Command::CanExecuteWrite { reply }).await
    }

    /// Checkpoints that exist on the volume, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::TabletDead`] if the volume stopped.
    pub async fn checkpoints(&self) -> Result<Vec<CheckpointInfo>, VolumeError> {
        self.call(|reply| Command::Checkpoints { reply }).await
    }

    /// Stops the volume. Pending callers receive [`VolumeError::TabletDead`].
    ///
    /// Stopping a volume that already stopped succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Internal`] if the actor does not acknowledge
    /// within the configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), VolumeError> {
        let stop = async {
            let (tx, rx) = oneshot::channel();
            if self.commands.send(Command::Shutdown { reply: tx }).await.is_ok() {
                let _ = rx.await;
            }
        };
        tokio::time::timeout(self.shutdown_timeout, stop).await.map_err(|_| VolumeError::Internal {
            message: format!("volume did not stop within {:?}", self.shutdown_timeout),
        })
    }
}

/// Outcome of [`VolumeHandle::begin_write`].
#[derive(Debug)]
#[must_use = "an admitted write keeps its blocks locked until completed"]
pub enum WriteStart {
    /// Execute the write, then complete the guard.
    Execute(VolumeWriteGuard),
    /// Newer data already covers the blocks; answer success without writing.
    AlreadySatisfied,
}

/// An admitted write. Complete it with [`VolumeWriteGuard::complete`].
#[must_use = "dropping the guard reports the write as failed"]
pub struct VolumeWriteGuard {
    request: UnitWriteRequest,
    permit: Option<WritePermit>,
    events: mpsc::UnboundedSender<Event>,
}

impl VolumeWriteGuard {
    fn new(permit: WritePermit, events: mpsc::UnboundedSender<Event>) -> Self {
        Self { request: *permit.request(), permit: Some(permit), events }
    }

    /// The admitted request.
    pub fn request(&self) -> &UnitWriteRequest {
        &self.request
    }

    /// Reports the write outcome. A successful write becomes the newest
    /// writer of its blocks and marks them changed for light checkpoints.
    pub fn complete(mut self, success: bool) {
        self.finish(success);
    }

    fn finish(&mut self, success: bool) {
        if let Some(permit) = self.permit.take() {
            let _ = self.events.send(Event::WriteCompleted { permit, success });
        }
    }
}

impl std::fmt::Debug for VolumeWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeWriteGuard").field("request", &self.request).finish_non_exhaustive()
    }
}

impl Drop for VolumeWriteGuard {
    fn drop(&mut self) {
        self.finish(false);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use blockvol_types::{CompositeRequestId, ErrorCode, config::RecentWriteWindowConfig};

    use super::*;
    use crate::admission::WriteKind;

    fn guard(
        unit: &mut WriteAdmission,
        events: mpsc::UnboundedSender<Event>,
        sequence: u32,
    ) -> VolumeWriteGuard {
        let request = UnitWriteRequest {
            id: CompositeRequestId::from_parts(1, sequence),
            range: BlockRange::new(0, 4).unwrap(),
            kind: WriteKind::Write,
            multi_unit: false,
        };
        match unit.admit(request) {
            Admission::Proceed(permit) => VolumeWriteGuard::new(permit, events),
            other => panic!("expected proceed, got {}", other.as_str()),
        }
    }

    #[test]
    fn test_response_message_mapping() {
        assert_eq!(
            response_message(true, 3, Err(DeliveryError::Undelivered)),
            CoordinatorMessage::DrainUndelivered { cookie: 3 }
        );
        assert_eq!(
            response_message(false, 4, Err(DeliveryError::Undelivered)),
            CoordinatorMessage::ActionUndelivered { cookie: 4 }
        );
        assert_eq!(
            response_message(true, 5, Ok(())),
            CoordinatorMessage::DrainResponse { cookie: 5, result: Ok(()) }
        );
        match response_message(false, 6, Err(DeliveryError::Failed(VolumeError::rejected("busy")))) {
            CoordinatorMessage::ActionResponse { cookie, result } => {
                assert_eq!(cookie, 6);
                assert_eq!(result.unwrap_err().code(), ErrorCode::VolumeRejected);
            },
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_guard_drop_reports_failure() {
        let mut unit = WriteAdmission::new(RecentWriteWindowConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(guard(&mut unit, tx, 7));
        match rx.recv().await.unwrap() {
            Event::WriteCompleted { permit, success } => {
                assert_eq!(permit.request().id, CompositeRequestId::from_parts(1, 7));
                assert!(!success);
                unit.complete(permit, success);
                assert_eq!(unit.in_flight_count(), 0);
            },
            _ => panic!("unexpected event"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_guard_complete_reports_once() {
        let mut unit = WriteAdmission::new(RecentWriteWindowConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        guard(&mut unit, tx, 1).complete(true);
        assert!(matches!(rx.recv().await.unwrap(), Event::WriteCompleted { success: true, .. }));
        assert!(rx.try_recv().is_err());
    }
}

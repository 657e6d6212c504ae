//! In-memory mirror of a volume's checkpoint request queue.
//!
//! Requests run strictly one at a time in request-id order. Each request moves
//! through `Received` (accepted, not yet durable), `Saved` (durable),
//! `InProgress` (dispatched) and finally `Completed` or `Rejected`. The ledger
//! is only changed after the matching durable transaction has been confirmed,
//! so after a restart [`CheckpointRequestLedger::restore`] rebuilds exactly the
//! state the volume had acknowledged.
//!
//! Finished requests are folded into a catalogue of existing checkpoints.

use std::collections::BTreeMap;

use blockvol_types::{
    CheckpointId, CheckpointRequest, CheckpointRequestId, CheckpointRequestState,
    CheckpointRequestType, CheckpointType, VolumeError, error::InternalSnafu,
};
use chrono::{DateTime, Utc};
use snafu::ensure;

/// A checkpoint known to exist on the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Checkpoint name.
    pub checkpoint_id: CheckpointId,
    /// How the checkpoint is implemented.
    pub checkpoint_type: CheckpointType,
    /// Whether partitions still hold snapshot data for it.
    pub has_data: bool,
}

#[derive(Debug, Clone, Copy)]
struct CatalogueEntry {
    checkpoint_type: CheckpointType,
    has_data: bool,
}

/// Queue of unfinished checkpoint requests plus the checkpoint catalogue.
#[derive(Debug)]
pub struct CheckpointRequestLedger {
    pending: BTreeMap<CheckpointRequestId, CheckpointRequest>,
    catalogue: BTreeMap<CheckpointId, CatalogueEntry>,
    in_progress: Option<CheckpointRequestId>,
    next_request_id: u64,
}

impl Default for CheckpointRequestLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointRequestLedger {
    /// Creates an empty ledger. The first request gets id 1.
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            catalogue: BTreeMap::new(),
            in_progress: None,
            next_request_id: 1,
        }
    }

    /// Rebuilds the ledger from persisted rows.
    ///
    /// Finished rows are applied to the catalogue in request-id order; saved
    /// rows are queued again. New ids continue after the highest persisted id.
    pub fn restore(mut records: Vec<CheckpointRequest>) -> Self {
        records.sort_by_key(|record| record.request_id);
        let mut ledger = Self::new();
        for mut record in records {
            ledger.next_request_id = ledger.next_request_id.max(record.request_id.value() + 1);
            match record.state {
                CheckpointRequestState::Completed => ledger.apply_to_catalogue(&record),
                CheckpointRequestState::Rejected => {},
                // Only `Saved` is ever persisted as unfinished; anything else
                // was interrupted and runs again.
                CheckpointRequestState::Received
                | CheckpointRequestState::Saved
                | CheckpointRequestState::InProgress => {
                    record.state = CheckpointRequestState::Saved;
                    ledger.pending.insert(record.request_id, record);
                },
            }
        }
        ledger
    }

    /// Accepts a new request in the `Received` state and returns it.
    pub fn create_new(
        &mut self,
        checkpoint_id: impl Into<CheckpointId>,
        timestamp: DateTime<Utc>,
        req_type: CheckpointRequestType,
        checkpoint_type: CheckpointType,
    ) -> CheckpointRequest {
        let request_id = CheckpointRequestId::new(self.next_request_id);
        self.next_request_id += 1;
        let request =
            CheckpointRequest::received(request_id, checkpoint_id, timestamp, req_type, checkpoint_type);
        self.pending.insert(request_id, request.clone());
        request
    }

    /// Marks a received request durable.
    pub fn set_saved(&mut self, request_id: CheckpointRequestId) -> Result<(), VolumeError> {
        self.transition(request_id, CheckpointRequestState::Received, CheckpointRequestState::Saved)
    }

    /// Marks a saved request as dispatched.
    pub fn set_in_progress(&mut self, request_id: CheckpointRequestId) -> Result<(), VolumeError> {
        ensure!(
            self.in_progress.is_none(),
            InternalSnafu {
                message: format!(
                    "cannot start checkpoint request {request_id}: {:?} is in progress",
                    self.in_progress
                ),
            }
        );
        self.transition(request_id, CheckpointRequestState::Saved, CheckpointRequestState::InProgress)?;
        self.in_progress = Some(request_id);
        Ok(())
    }

    /// Finishes the in-progress request and returns its final record.
    ///
    /// A completed request updates the catalogue.
    pub fn set_finished(
        &mut self,
        request_id: CheckpointRequestId,
        completed: bool,
    ) -> Result<CheckpointRequest, VolumeError> {
        ensure!(
            self.in_progress == Some(request_id),
            InternalSnafu {
                message: format!("checkpoint request {request_id} is not in progress"),
            }
        );
        let mut request = self.pending.remove(&request_id).ok_or_else(|| VolumeError::Internal {
            message: format!("checkpoint request {request_id} is unknown"),
        })?;
        self.in_progress = None;
        request.state = if completed {
            self.apply_to_catalogue(&request);
            CheckpointRequestState::Completed
        } else {
            CheckpointRequestState::Rejected
        };
        Ok(request)
    }

    /// Drops a request whose save transaction failed.
    pub fn discard(&mut self, request_id: CheckpointRequestId) -> Option<CheckpointRequest> {
        match self.pending.get(&request_id) {
            Some(request) if request.state == CheckpointRequestState::Received => {
                self.pending.remove(&request_id)
            },
            _ => None,
        }
    }

    /// The request to run next: the oldest unfinished request, if it is saved.
    ///
    /// A head that is still `Received` blocks everything behind it.
    pub fn next_request_to_execute(&self) -> Option<&CheckpointRequest> {
        self.pending
            .values()
            .next()
            .filter(|request| request.state == CheckpointRequestState::Saved)
    }

    /// Looks up an unfinished request.
    pub fn get(&self, request_id: CheckpointRequestId) -> Option<&CheckpointRequest> {
        self.pending.get(&request_id)
    }

    /// Returns true while a request is dispatched.
    pub fn is_request_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    /// The dispatched request, if any.
    pub fn in_progress(&self) -> Option<&CheckpointRequest> {
        self.in_progress.and_then(|id| self.pending.get(&id))
    }

    /// Returns true while the dispatched request creates a checkpoint.
    pub fn is_checkpoint_being_created(&self) -> bool {
        self.in_progress().is_some_and(|request| request.req_type == CheckpointRequestType::Create)
    }

    /// Returns true if any checkpoint still holds partition data.
    pub fn does_checkpoint_with_data_exist(&self) -> bool {
        self.catalogue.values().any(|entry| entry.has_data)
    }

    /// Type of a checkpoint.
    ///
    /// Checkpoints that exist report their recorded type; otherwise the latest
    /// unfinished create request for the name decides.
    pub fn checkpoint_type(&self, checkpoint_id: &str) -> Option<CheckpointType> {
        if let Some(entry) = self.catalogue.get(checkpoint_id) {
            return Some(entry.checkpoint_type);
        }
        self.pending
            .values()
            .rev()
            .find(|request| {
                request.req_type == CheckpointRequestType::Create
                    && request.checkpoint_id == checkpoint_id
            })
            .map(|request| request.checkpoint_type)
    }

    /// Existing checkpoints ordered by name.
    pub fn checkpoints(&self) -> Vec<CheckpointInfo> {
        self.catalogue
            .iter()
            .map(|(checkpoint_id, entry)| CheckpointInfo {
                checkpoint_id: checkpoint_id.clone(),
                checkpoint_type: entry.checkpoint_type,
                has_data: entry.has_data,
            })
            .collect()
    }

    /// Number of unfinished requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn transition(
        &mut self,
        request_id: CheckpointRequestId,
        from: CheckpointRequestState,
        to: CheckpointRequestState,
    ) -> Result<(), VolumeError> {
        let request = self.pending.get_mut(&request_id).ok_or_else(|| VolumeError::Internal {
            message: format!("checkpoint request {request_id} is unknown"),
        })?;
        ensure!(
            request.state == from,
            InternalSnafu {
                message: format!(
                    "checkpoint request {request_id} is {}, expected {from}",
                    request.state
                ),
            }
        );
        request.state = to;
        Ok(())
    }

    fn apply_to_catalogue(&mut self, request: &CheckpointRequest) {
        match request.req_type {
            CheckpointRequestType::Create => {
                self.catalogue.insert(
                    request.checkpoint_id.clone(),
                    CatalogueEntry {
                        checkpoint_type: request.checkpoint_type,
                        has_data: request.checkpoint_type == CheckpointType::Normal,
                    },
                );
            },
            CheckpointRequestType::DeleteData => {
                if let Some(entry) = self.catalogue.get_mut(&request.checkpoint_id) {
                    entry.has_data = false;
                }
            },
            CheckpointRequestType::Delete => {
                self.catalogue.remove(&request.checkpoint_id);
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn create(ledger: &mut CheckpointRequestLedger, name: &str) -> CheckpointRequestId {
        ledger
            .create_new(name, Utc::now(), CheckpointRequestType::Create, CheckpointType::Normal)
            .request_id
    }

    fn run(ledger: &mut CheckpointRequestLedger, id: CheckpointRequestId, completed: bool) {
        ledger.set_in_progress(id).unwrap();
        ledger.set_finished(id, completed).unwrap();
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut ledger = CheckpointRequestLedger::new();
        assert_eq!(create(&mut ledger, "a").value(), 1);
        assert_eq!(create(&mut ledger, "b").value(), 2);
    }

    #[test]
    fn test_lifecycle_and_catalogue() {
        let mut ledger = CheckpointRequestLedger::new();
        let id = create(&mut ledger, "snap");
        assert!(ledger.next_request_to_execute().is_none());

        ledger.set_saved(id).unwrap();
        assert_eq!(ledger.next_request_to_execute().map(|r| r.request_id), Some(id));

        ledger.set_in_progress(id).unwrap();
        assert!(ledger.is_request_in_progress());
        assert!(ledger.is_checkpoint_being_created());
        assert!(ledger.next_request_to_execute().is_none());

        let finished = ledger.set_finished(id, true).unwrap();
        assert_eq!(finished.state, CheckpointRequestState::Completed);
        assert!(!ledger.is_request_in_progress());
        assert!(ledger.does_checkpoint_with_data_exist());
        assert_eq!(ledger.checkpoint_type("snap"), Some(CheckpointType::Normal));
        assert_eq!(ledger.checkpoints().len(), 1);
    }

    #[test]
    fn test_received_head_blocks_fifo() {
        let mut ledger = CheckpointRequestLedger::new();
        let first = create(&mut ledger, "a");
        let second = create(&mut ledger, "b");
        ledger.set_saved(second).unwrap();

        assert!(ledger.next_request_to_execute().is_none());

        ledger.set_saved(first).unwrap();
        assert_eq!(ledger.next_request_to_execute().map(|r| r.request_id), Some(first));
    }

    #[test]
    fn test_single_request_in_progress() {
        let mut ledger = CheckpointRequestLedger::new();
        let first = create(&mut ledger, "a");
        let second = create(&mut ledger, "b");
        ledger.set_saved(first).unwrap();
        ledger.set_saved(second).unwrap();

        ledger.set_in_progress(first).unwrap();
        let err = ledger.set_in_progress(second).unwrap_err();
        assert!(matches!(err, VolumeError::Internal { .. }));
    }

    #[test]
    fn test_invalid_transitions_are_refused() {
        let mut ledger = CheckpointRequestLedger::new();
        let id = create(&mut ledger, "a");

        assert!(ledger.set_in_progress(id).is_err());
        assert!(ledger.set_finished(id, true).is_err());
        assert!(ledger.set_saved(CheckpointRequestId::new(42)).is_err());
        ledger.set_saved(id).unwrap();
        assert!(ledger.set_saved(id).is_err());
    }

    #[test]
    fn test_discard_only_received() {
        let mut ledger = CheckpointRequestLedger::new();
        let id = create(&mut ledger, "a");
        let saved = create(&mut ledger, "b");
        ledger.set_saved(saved).unwrap();

        assert!(ledger.discard(saved).is_none());
        assert!(ledger.discard(id).is_some());
        assert_eq!(ledger.pending_count(), 1);
    }

    #[test]
    fn test_delete_data_then_delete() {
        let mut ledger = CheckpointRequestLedger::new();
        let id = create(&mut ledger, "snap");
        ledger.set_saved(id).unwrap();
        run(&mut ledger, id, true);

        let id = ledger
            .create_new("snap", Utc::now(), CheckpointRequestType::DeleteData, CheckpointType::Normal)
            .request_id;
        ledger.set_saved(id).unwrap();
        run(&mut ledger, id, true);
        assert!(!ledger.does_checkpoint_with_data_exist());
        assert!(!ledger.checkpoints()[0].has_data);

        let id = ledger
            .create_new("snap", Utc::now(), CheckpointRequestType::Delete, CheckpointType::Normal)
            .request_id;
        ledger.set_saved(id).unwrap();
        run(&mut ledger, id, true);
        assert!(ledger.checkpoints().is_empty());
        assert_eq!(ledger.checkpoint_type("snap"), None);
    }

    #[test]
    fn test_rejected_create_leaves_no_checkpoint() {
        let mut ledger = CheckpointRequestLedger::new();
        let id = create(&mut ledger, "snap");
        ledger.set_saved(id).unwrap();
        run(&mut ledger, id, false);
        assert!(ledger.checkpoints().is_empty());
    }

    #[test]
    fn test_light_checkpoint_has_no_data() {
        let mut ledger = CheckpointRequestLedger::new();
        let id = ledger
            .create_new("light", Utc::now(), CheckpointRequestType::Create, CheckpointType::Light)
            .request_id;
        assert_eq!(ledger.checkpoint_type("light"), Some(CheckpointType::Light));
        ledger.set_saved(id).unwrap();
        run(&mut ledger, id, true);

        assert_eq!(ledger.checkpoint_type("light"), Some(CheckpointType::Light));
        assert!(!ledger.does_checkpoint_with_data_exist());
    }

    #[test]
    fn test_restore_rebuilds_queue_and_catalogue() {
        let mut records = Vec::new();
        let mut done = CheckpointRequest::received(
            CheckpointRequestId::new(3),
            "old",
            Utc::now(),
            CheckpointRequestType::Create,
            CheckpointType::Normal,
        );
        done.state = CheckpointRequestState::Completed;
        let mut saved = CheckpointRequest::received(
            CheckpointRequestId::new(7),
            "new",
            Utc::now(),
            CheckpointRequestType::Create,
            CheckpointType::Normal,
        );
        saved.state = CheckpointRequestState::Saved;
        records.push(saved);
        records.push(done);

        let mut ledger = CheckpointRequestLedger::restore(records);
        assert_eq!(ledger.checkpoint_type("old"), Some(CheckpointType::Normal));
        assert_eq!(
            ledger.next_request_to_execute().map(|r| r.request_id),
            Some(CheckpointRequestId::new(7))
        );
        assert_eq!(create(&mut ledger, "next").value(), 8);
    }
}

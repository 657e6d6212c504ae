//! Durable checkpoint request queue.
//!
//! The volume records each checkpoint request before executing it and records
//! the outcome afterwards, so an interrupted request resumes after a restart.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use blockvol_types::{CheckpointRequest, CheckpointRequestId, CheckpointRequestState};
use parking_lot::Mutex;

use crate::error::{RequestNotFoundSnafu, StorageError, UnavailableSnafu};

/// Result type for persistence operations.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Storage backend for checkpoint requests.
///
/// Every method is one atomic transaction. Calls block; the volume runs them
/// on a blocking thread in issuance order.
pub trait CheckpointPersistence: Send + Sync + 'static {
    /// Persists a new request. The stored row is always in the `Saved` state,
    /// whatever the in-memory state of `request`.
    fn write_checkpoint_request(&self, request: &CheckpointRequest) -> Result<()>;

    /// Marks a saved request `Completed` (`completed == true`) or `Rejected`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RequestNotFound`] if the row does not exist.
    fn update_checkpoint_request(
        &self,
        request_id: CheckpointRequestId,
        completed: bool,
    ) -> Result<()>;

    /// Loads every persisted request in ascending request-id order.
    fn load_checkpoint_requests(&self) -> Result<Vec<CheckpointRequest>>;
}

/// Terminal state for an update call.
pub(crate) fn finished_state(completed: bool) -> CheckpointRequestState {
    if completed { CheckpointRequestState::Completed } else { CheckpointRequestState::Rejected }
}

/// In-memory [`CheckpointPersistence`] for tests and ephemeral volumes.
///
/// Clones share the same rows, so a test can keep a handle across a volume
/// restart. Writes and updates can be made to fail on demand.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    rows: Mutex<BTreeMap<u64, CheckpointRequest>>,
    fail_writes: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `write_checkpoint_request` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `update_checkpoint_request` calls fail.
    pub fn set_fail_updates(&self, fail: bool) {
        self.inner.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of one row.
    pub fn get(&self, request_id: CheckpointRequestId) -> Option<CheckpointRequest> {
        self.inner.rows.lock().get(&request_id.value()).cloned()
    }

    /// Number of persisted rows.
    pub fn len(&self) -> usize {
        self.inner.rows.lock().len()
    }

    /// Returns true if nothing was persisted.
    pub fn is_empty(&self) -> bool {
        self.inner.rows.lock().is_empty()
    }
}

impl CheckpointPersistence for MemoryCheckpointStore {
    fn write_checkpoint_request(&self, request: &CheckpointRequest) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return UnavailableSnafu { message: "write rejected by test hook" }.fail();
        }
        let mut row = request.clone();
        row.state = CheckpointRequestState::Saved;
        self.inner.rows.lock().insert(request.request_id.value(), row);
        Ok(())
    }

    fn update_checkpoint_request(
        &self,
        request_id: CheckpointRequestId,
        completed: bool,
    ) -> Result<()> {
        if self.inner.fail_updates.load(Ordering::SeqCst) {
            return UnavailableSnafu { message: "update rejected by test hook" }.fail();
        }
        let mut rows = self.inner.rows.lock();
        let Some(row) = rows.get_mut(&request_id.value()) else {
            return RequestNotFoundSnafu { request_id }.fail();
        };
        row.state = finished_state(completed);
        Ok(())
    }

    fn load_checkpoint_requests(&self) -> Result<Vec<CheckpointRequest>> {
        Ok(self.inner.rows.lock().values().cloned().collect())
    }
}

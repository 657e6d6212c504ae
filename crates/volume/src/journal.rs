//! Ordered execution of durable checkpoint transactions.
//!
//! The volume task never blocks on storage. It queues transactions here; a
//! dedicated task runs them one at a time in queue order on the blocking pool
//! and reports each outcome back. Ordering matters: an update must never
//! overtake the save of the same request.

use std::sync::Arc;

use blockvol_storage::CheckpointPersistence;
use blockvol_types::{CheckpointRequest, CheckpointRequestId, VolumeError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::metrics;

/// A durable change to the checkpoint request table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transaction {
    /// Persist a received request as `Saved`.
    Save(CheckpointRequest),
    /// Persist the outcome of a request.
    Update { request_id: CheckpointRequestId, completed: bool },
}

impl Transaction {
    pub(crate) fn request_id(&self) -> CheckpointRequestId {
        match self {
            Self::Save(request) => request.request_id,
            Self::Update { request_id, .. } => *request_id,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Save(_) => "save",
            Self::Update { .. } => "update",
        }
    }

    fn apply(&self, persistence: &dyn CheckpointPersistence) -> Result<(), VolumeError> {
        match self {
            Self::Save(request) => persistence.write_checkpoint_request(request)?,
            Self::Update { request_id, completed } => {
                persistence.update_checkpoint_request(*request_id, *completed)?;
            },
        }
        Ok(())
    }
}

/// A finished transaction and its result.
#[derive(Debug)]
pub(crate) struct TransactionOutcome {
    pub(crate) transaction: Transaction,
    pub(crate) result: Result<(), VolumeError>,
}

/// Starts the journal task. Outcomes are passed to `notify` in submission order.
///
/// The task stops once every sender of the returned queue is dropped.
pub(crate) fn spawn<F>(
    persistence: Arc<dyn CheckpointPersistence>,
    mut notify: F,
) -> mpsc::UnboundedSender<Transaction>
where
    F: FnMut(TransactionOutcome) + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Transaction>();
    tokio::spawn(async move {
        while let Some(transaction) = rx.recv().await {
            let store = Arc::clone(&persistence);
            let job = transaction.clone();
            let result = tokio::task::spawn_blocking(move || job.apply(store.as_ref()))
                .await
                .unwrap_or_else(|e| {
                    Err(VolumeError::Internal { message: format!("persistence task failed: {e}") })
                });
            debug!(
                request_id = %transaction.request_id(),
                operation = transaction.as_str(),
                success = result.is_ok(),
                "Checkpoint transaction finished"
            );
            metrics::record_persistence_transaction(transaction.as_str(), result.is_ok());
            notify(TransactionOutcome { transaction, result });
        }
    });
    tx
}

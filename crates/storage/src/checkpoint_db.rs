//! redb-backed checkpoint request store.

use std::{path::Path, sync::Arc};

use blockvol_types::{
    CheckpointRequest, CheckpointRequestId, CheckpointRequestState, codec, config::StorageConfig,
};
use redb::{Database, Durability, ReadableTable, WriteTransaction};
use snafu::ResultExt;

use crate::{
    error::{
        CodecSnafu, CommitSnafu, DatabaseOpenSnafu, RequestNotFoundSnafu, StorageSnafu,
        TableSnafu, TransactionSnafu,
    },
    persistence::{CheckpointPersistence, Result, finished_state},
    tables::Tables,
};

/// Checkpoint request store in a single redb file.
///
/// Cheap to clone; clones share the database handle.
#[derive(Clone)]
pub struct CheckpointDatabase {
    db: Arc<Database>,
    durability: Durability,
}

impl CheckpointDatabase {
    /// Opens or creates the database at `path` and ensures the request table exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::DatabaseOpen`] if the file cannot be opened,
    /// or a transaction error if the table cannot be created.
    pub fn open(path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::builder()
            .set_cache_size(config.cache_size_bytes)
            .create(path)
            .context(DatabaseOpenSnafu { path: path.display().to_string() })?;

        let txn = db.begin_write().context(TransactionSnafu)?;
        {
            txn.open_table(Tables::CHECKPOINT_REQUESTS).context(TableSnafu)?;
        }
        txn.commit().context(CommitSnafu)?;

        let durability =
            if config.durable_commits { Durability::Immediate } else { Durability::Eventual };
        tracing::debug!(
            path = %path.display(),
            durable_commits = config.durable_commits,
            "Opened checkpoint database"
        );
        Ok(Self { db: Arc::new(db), durability })
    }

    fn begin_write(&self) -> Result<WriteTransaction> {
        let mut txn = self.db.begin_write().context(TransactionSnafu)?;
        txn.set_durability(self.durability);
        Ok(txn)
    }
}

impl std::fmt::Debug for CheckpointDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointDatabase").finish_non_exhaustive()
    }
}

impl CheckpointPersistence for CheckpointDatabase {
    fn write_checkpoint_request(&self, request: &CheckpointRequest) -> Result<()> {
        let mut row = request.clone();
        row.state = CheckpointRequestState::Saved;
        let encoded = codec::encode(&row).context(CodecSnafu { request_id: row.request_id })?;

        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(Tables::CHECKPOINT_REQUESTS).context(TableSnafu)?;
            table.insert(row.request_id.value(), &encoded[..]).context(StorageSnafu)?;
        }
        txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    fn update_checkpoint_request(
        &self,
        request_id: CheckpointRequestId,
        completed: bool,
    ) -> Result<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(Tables::CHECKPOINT_REQUESTS).context(TableSnafu)?;
            let existing = table
                .get(request_id.value())
                .context(StorageSnafu)?
                .map(|guard| guard.value().to_vec());
            let Some(bytes) = existing else {
                return RequestNotFoundSnafu { request_id }.fail();
            };

            let mut row: CheckpointRequest =
                codec::decode(&bytes).context(CodecSnafu { request_id })?;
            row.state = finished_state(completed);
            let encoded = codec::encode(&row).context(CodecSnafu { request_id })?;
            table.insert(request_id.value(), &encoded[..]).context(StorageSnafu)?;
        }
        txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    fn load_checkpoint_requests(&self) -> Result<Vec<CheckpointRequest>> {
        let txn = self.db.begin_read().context(TransactionSnafu)?;
        let table = txn.open_table(Tables::CHECKPOINT_REQUESTS).context(TableSnafu)?;

        let mut requests = Vec::new();
        for entry in table.iter().context(StorageSnafu)? {
            let (key, value) = entry.context(StorageSnafu)?;
            let request_id = CheckpointRequestId::new(key.value());
            let request: CheckpointRequest =
                codec::decode(value.value()).context(CodecSnafu { request_id })?;
            requests.push(request);
        }
        Ok(requests)
    }
}

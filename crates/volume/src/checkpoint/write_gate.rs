//! Whether writes may run while checkpoints are being taken.

use blockvol_types::VolumeTopology;

use super::ledger::CheckpointRequestLedger;

/// Returns true if a write or zero request may execute now.
///
/// A disk-registry-based volume has no snapshot support in its partition, so
/// it stays read-only while any checkpoint holds data and while one is being
/// created. A blob-storage volume only pauses multi-partition writes during
/// checkpoint creation; a single partition orders writes against its own
/// checkpoint.
pub fn can_execute_write_request(topology: &VolumeTopology, ledger: &CheckpointRequestLedger) -> bool {
    if topology.is_disk_registry_based() {
        return !ledger.does_checkpoint_with_data_exist() && !ledger.is_checkpoint_being_created();
    }
    topology.partition_count() == 1 || !ledger.is_checkpoint_being_created()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use blockvol_types::{CheckpointRequestType, CheckpointType, PartitionDescriptor};
    use chrono::Utc;

    use super::*;

    fn topology(partitions: usize, disk_registry: bool) -> VolumeTopology {
        VolumeTopology::new(
            (0..partitions)
                .map(|i| {
                    PartitionDescriptor::builder()
                        .tablet_id(i as u64 + 1)
                        .address(format!("partition-{i}"))
                        .disk_registry_based(disk_registry)
                        .build()
                })
                .collect(),
        )
        .unwrap()
    }

    fn start_create(ledger: &mut CheckpointRequestLedger) -> blockvol_types::CheckpointRequestId {
        let id = ledger
            .create_new("snap", Utc::now(), CheckpointRequestType::Create, CheckpointType::Normal)
            .request_id;
        ledger.set_saved(id).unwrap();
        ledger.set_in_progress(id).unwrap();
        id
    }

    #[test]
    fn test_idle_volume_accepts_writes() {
        let ledger = CheckpointRequestLedger::new();
        assert!(can_execute_write_request(&topology(1, true), &ledger));
        assert!(can_execute_write_request(&topology(3, false), &ledger));
    }

    #[test]
    fn test_create_in_progress() {
        let mut ledger = CheckpointRequestLedger::new();
        start_create(&mut ledger);

        assert!(!can_execute_write_request(&topology(1, true), &ledger));
        assert!(!can_execute_write_request(&topology(3, false), &ledger));
        assert!(can_execute_write_request(&topology(1, false), &ledger));
    }

    #[test]
    fn test_disk_registry_volume_with_checkpoint_data() {
        let mut ledger = CheckpointRequestLedger::new();
        let id = start_create(&mut ledger);
        ledger.set_finished(id, true).unwrap();

        assert!(!can_execute_write_request(&topology(1, true), &ledger));
        assert!(can_execute_write_request(&topology(3, false), &ledger));
    }
}

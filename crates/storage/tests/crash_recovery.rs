//! Durability of the checkpoint request table across process restarts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use blockvol_storage::{CheckpointDatabase, CheckpointPersistence, MemoryCheckpointStore};
use blockvol_test_utils::TestDir;
use blockvol_types::{
    CheckpointRequest, CheckpointRequestId, CheckpointRequestState, CheckpointRequestType,
    CheckpointType, config::StorageConfig,
};
use chrono::Utc;
use proptest::prelude::*;

fn request(id: u64) -> CheckpointRequest {
    CheckpointRequest::received(
        CheckpointRequestId::new(id),
        format!("ckpt-{id}"),
        Utc::now(),
        CheckpointRequestType::Create,
        CheckpointType::Normal,
    )
}

#[test]
fn test_interrupted_request_stays_saved_after_restart() {
    let dir = TestDir::new();
    let path = dir.join("volume.redb");

    {
        let db = CheckpointDatabase::open(&path, &StorageConfig::default()).unwrap();
        db.write_checkpoint_request(&request(1)).unwrap();
        db.update_checkpoint_request(CheckpointRequestId::new(1), true).unwrap();
        // Request 2 is saved but the process dies before its outcome is recorded.
        db.write_checkpoint_request(&request(2)).unwrap();
    }

    let db = CheckpointDatabase::open(&path, &StorageConfig::default()).unwrap();
    let rows = db.load_checkpoint_requests().unwrap();
    let states: Vec<_> = rows.iter().map(|r| (r.request_id.value(), r.state)).collect();
    assert_eq!(
        states,
        vec![(1, CheckpointRequestState::Completed), (2, CheckpointRequestState::Saved)]
    );

    db.update_checkpoint_request(CheckpointRequestId::new(2), true).unwrap();
    let rows = db.load_checkpoint_requests().unwrap();
    assert!(rows.iter().all(|r| r.state == CheckpointRequestState::Completed));
}

#[derive(Debug, Clone)]
enum Op {
    Write(u64),
    Update(u64, bool),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..16).prop_map(Op::Write),
        (1u64..16, any::<bool>()).prop_map(|(id, ok)| Op::Update(id, ok)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Both backends agree with a simple model on every sequence of operations.
    #[test]
    fn prop_backends_match_model(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let dir = TestDir::new();
        let db = CheckpointDatabase::open(dir.join("model.redb"), &StorageConfig::default()).unwrap();
        let memory = MemoryCheckpointStore::new();
        let mut model: BTreeMap<u64, CheckpointRequestState> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Write(id) => {
                    db.write_checkpoint_request(&request(id)).unwrap();
                    memory.write_checkpoint_request(&request(id)).unwrap();
                    model.insert(id, CheckpointRequestState::Saved);
                },
                Op::Update(id, completed) => {
                    let expected = if completed {
                        CheckpointRequestState::Completed
                    } else {
                        CheckpointRequestState::Rejected
                    };
                    let db_result = db.update_checkpoint_request(CheckpointRequestId::new(id), completed);
                    let mem_result = memory.update_checkpoint_request(CheckpointRequestId::new(id), completed);
                    match model.get_mut(&id) {
                        Some(state) => {
                            prop_assert!(db_result.is_ok());
                            prop_assert!(mem_result.is_ok());
                            *state = expected;
                        },
                        None => {
                            prop_assert!(db_result.is_err());
                            prop_assert!(mem_result.is_err());
                        },
                    }
                },
            }
        }

        let expected: Vec<_> = model.into_iter().collect();
        let from_db: Vec<_> = db
            .load_checkpoint_requests()
            .unwrap()
            .into_iter()
            .map(|r| (r.request_id.value(), r.state))
            .collect();
        let from_memory: Vec<_> = memory
            .load_checkpoint_requests()
            .unwrap()
            .into_iter()
            .map(|r| (r.request_id.value(), r.state))
            .collect();
        prop_assert_eq!(&from_db, &expected);
        prop_assert_eq!(&from_memory, &expected);
    }
}

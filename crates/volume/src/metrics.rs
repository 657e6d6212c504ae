//! Metrics recorded through the `metrics` crate facade.
//!
//! ## Metric Naming Conventions
//!
//! All metrics follow the pattern: `blockvol_{subsystem}_{name}_{unit}`
//!
//! - Counters: `_total` suffix
//! - Gauges: no suffix
//!
//! Nothing is exported unless the embedding process installs a recorder.

use metrics::{counter, gauge};

// =============================================================================
// Metric Names
// =============================================================================

// Write admission
const ADMISSION_DECISIONS_TOTAL: &str = "blockvol_admission_decisions_total";

// Checkpoint requests
const CHECKPOINT_TRANSITIONS_TOTAL: &str = "blockvol_checkpoint_transitions_total";
const CHECKPOINT_QUEUE_DEPTH: &str = "blockvol_checkpoint_queue_depth";
const CHECKPOINT_PARTITION_REQUESTS_TOTAL: &str = "blockvol_checkpoint_partition_requests_total";
const CHECKPOINT_UNEXPECTED_MESSAGES_TOTAL: &str = "blockvol_checkpoint_unexpected_messages_total";

// Persistence
const PERSISTENCE_TRANSACTIONS_TOTAL: &str = "blockvol_persistence_transactions_total";

// Light checkpoints
const CHANGED_BLOCKS_REQUESTS_TOTAL: &str = "blockvol_changed_blocks_requests_total";

// =============================================================================
// Write Admission
// =============================================================================

/// Records one non-trivial admission decision
/// (`delayed`, `rejected`, `already_satisfied`, `duplicate`).
#[inline]
pub fn record_admission_decision(decision: &'static str) {
    counter!(ADMISSION_DECISIONS_TOTAL, "decision" => decision).increment(1);
}

// =============================================================================
// Checkpoints
// =============================================================================

/// Records a checkpoint request entering `state`.
#[inline]
pub fn record_checkpoint_transition(req_type: &'static str, state: &'static str) {
    counter!(CHECKPOINT_TRANSITIONS_TOTAL, "type" => req_type, "state" => state).increment(1);
}

/// Sets the number of checkpoint requests not yet finished.
#[inline]
pub fn set_checkpoint_queue_depth(depth: usize) {
    gauge!(CHECKPOINT_QUEUE_DEPTH).set(depth as f64);
}

/// Records a request fanned out to a partition and how it ended.
#[inline]
pub fn record_partition_request(kind: &'static str, outcome: &'static str) {
    counter!(CHECKPOINT_PARTITION_REQUESTS_TOTAL, "kind" => kind, "outcome" => outcome)
        .increment(1);
}

/// Records a coordinator message that had no handler in the current state.
#[inline]
pub fn record_unexpected_message(state: &'static str, kind: &'static str) {
    counter!(CHECKPOINT_UNEXPECTED_MESSAGES_TOTAL, "state" => state, "kind" => kind).increment(1);
}

// =============================================================================
// Persistence
// =============================================================================

/// Records a durable transaction.
#[inline]
pub fn record_persistence_transaction(operation: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(PERSISTENCE_TRANSACTIONS_TOTAL, "operation" => operation, "status" => status)
        .increment(1);
}

// =============================================================================
// Changed Blocks
// =============================================================================

/// Records a changed-blocks query and the path that served it (`light`, `partition`).
#[inline]
pub fn record_changed_blocks_request(path: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(CHANGED_BLOCKS_REQUESTS_TOTAL, "path" => path, "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_dont_panic() {
        // No recorder is installed; every call must be a no-op.
        record_admission_decision("delayed");
        record_checkpoint_transition("create_checkpoint", "saved");
        set_checkpoint_queue_depth(3);
        record_partition_request("drain", "success");
        record_unexpected_message("acting", "drain_response");
        record_persistence_transaction("write", true);
        record_persistence_transaction("update", false);
        record_changed_blocks_request("light", true);
    }
}

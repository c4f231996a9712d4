//! End-to-end tests at the environment and transaction level.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! to verify complete write/commit/read cycles.

#![cfg(test)]

mod helpers;

mod test_batch;
mod test_capacity_exhausted;
mod test_corruption;
mod test_deferred_reclamation;
mod test_delete_frees_overflow;
mod test_delete_rebalance;
mod test_failed_commit;
mod test_fault_injection;
mod test_iterator;
mod test_large_value_delete;
mod test_overflow_threshold;
mod test_page_accounting;
mod test_persistence;
mod test_round_trip;
mod test_single_writer;
mod test_snapshot_isolation;
mod test_tree_management;

//! Test commits against a store that fails writes and syncs at random.

use std::collections::BTreeMap;

use rand::Rng;
use rand::rngs::StdRng;

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, FaultConfig, PageReader};

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

/// Run `rounds` random transactions, keeping `model` in step with the
/// commits that succeed. Returns the number of failed commits.
fn run_rounds(test: &TestEnv, model: &mut Model, rng: &mut StdRng, rounds: usize) -> usize {
    let mut failed = 0;
    for _ in 0..rounds {
        let before = test.env.stats();
        let mut pending = model.clone();

        let mut tx = test.env.open_write_transaction().unwrap();
        let tree = tx.create_tree("t").unwrap();
        for _ in 0..rng.random_range(1..20) {
            let key = padded_key(rng.random_range(0..200));
            if rng.random_bool(0.25) {
                tree.delete(&mut tx, &key).unwrap();
                pending.remove(&key);
            } else {
                let len = if rng.random_bool(0.1) {
                    3000
                } else {
                    rng.random_range(1..80)
                };
                let value = random_value(rng, len);
                tree.add(&mut tx, &key, &value).unwrap();
                pending.insert(key, value);
            }
        }

        match tx.commit() {
            Ok(()) => *model = pending,
            Err(EngineError::Storage(_)) => {
                failed += 1;
                let after = test.env.stats();
                assert_eq!(after.txn_id, before.txn_id);
                assert_eq!(after.total_pages, before.total_pages);
                assert_eq!(after.free_pages, before.free_pages);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
        assert_eq!(&read_all(test), model);
        test.check().unwrap();
    }
    failed
}

fn read_all(test: &TestEnv) -> Model {
    let tx = test.env.open_read_transaction();
    if tx.tree_names().unwrap().is_empty() {
        return Model::new();
    }
    let tree = tx.open_tree("t").unwrap();
    collect_keys(&tx, "t")
        .unwrap()
        .into_iter()
        .map(|key| {
            let value = tree.read(&tx, &key).unwrap();
            (key, value)
        })
        .collect()
}

#[test]
fn test_failed_commits_leave_last_commit_intact() {
    let mut test = TestEnv::with_faults(1024, 41, FaultConfig::low_faults());
    let mut rng = seeded_rng(41);
    let mut model = Model::new();

    run_rounds(&test, &mut model, &mut rng, 40);

    test.storage.set_fault_config(FaultConfig {
        write_error_rate: 0.05,
        sync_error_rate: 0.05,
    });
    let failed = run_rounds(&test, &mut model, &mut rng, 80);
    assert!(failed > 0);
    let stats = test.storage.stats();
    assert!(stats.injected_write_errors + stats.injected_sync_errors > 0);

    // One clean commit overwrites any superblock a failed commit left behind.
    test.storage.set_fault_config(FaultConfig::no_faults());
    run_rounds(&test, &mut model, &mut rng, 5);

    test.reopen();
    assert_eq!(read_all(&test), model);
    test.check().unwrap();
}

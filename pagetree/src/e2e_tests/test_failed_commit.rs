//! Test that a commit whose writes fail leaves the last commit intact.

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

#[test]
fn test_failed_write_keeps_baseline() {
    let mut test = TestEnv::new(1024);
    for i in 0..50 {
        test.put("t", &padded_key(i), b"base").unwrap();
    }
    let baseline = test.env.stats();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    for i in 0..50 {
        tree.add(&mut tx, padded_key(i), b"changed").unwrap();
    }
    tx.create_tree("new").unwrap();

    test.storage.set_fail_writes(true);
    assert!(matches!(tx.commit(), Err(EngineError::Storage(_))));
    test.storage.set_fail_writes(false);

    let stats = test.env.stats();
    assert_eq!(stats.txn_id, baseline.txn_id);
    assert_eq!(stats.total_pages, baseline.total_pages);
    assert_eq!(test.get("t", &padded_key(7)).unwrap(), Some(b"base".to_vec()));
    assert!(matches!(test.state("new"), Err(EngineError::TreeNotFound(_))));
    test.check().unwrap();

    test.reopen();
    assert_eq!(test.env.stats().txn_id, baseline.txn_id);
    assert_eq!(test.get("t", &padded_key(7)).unwrap(), Some(b"base".to_vec()));

    test.put("t", &padded_key(7), b"after").unwrap();
    assert_eq!(test.get("t", &padded_key(7)).unwrap(), Some(b"after".to_vec()));
    assert_eq!(test.env.stats().txn_id, baseline.txn_id + 1);
    test.check().unwrap();
}

#[test]
fn test_writer_slot_released_after_failure() {
    let test = TestEnv::new(4096);
    test.put("t", b"a", b"1").unwrap();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    tree.add(&mut tx, "a", "2").unwrap();
    test.storage.set_fail_writes(true);
    assert!(tx.commit().is_err());
    test.storage.set_fail_writes(false);

    let tx = test.env.try_open_write_transaction().unwrap();
    assert_eq!(tx.txn_id(), 2);
    assert_eq!(tx.open_tree("t").unwrap().read(&tx, "a").unwrap(), b"1");
}

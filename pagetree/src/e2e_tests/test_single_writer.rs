//! Test that only one write transaction is active at a time.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

#[test]
fn test_second_writer_conflicts() {
    let test = TestEnv::new(4096);
    let tx = test.env.open_write_transaction().unwrap();

    assert!(matches!(
        test.env.try_open_write_transaction(),
        Err(EngineError::WriteConflict)
    ));
    assert!(matches!(
        test.env
            .open_write_transaction_timeout(Duration::from_millis(20)),
        Err(EngineError::WriteConflict)
    ));

    tx.commit().unwrap();
    test.env.try_open_write_transaction().unwrap().abort();
}

#[test]
fn test_abort_and_drop_release_the_slot() {
    let test = TestEnv::new(4096);

    let tx = test.env.open_write_transaction().unwrap();
    tx.abort();
    let tx = test.env.try_open_write_transaction().unwrap();
    drop(tx);
    test.env.try_open_write_transaction().unwrap();
}

#[test]
fn test_blocked_writer_starts_after_commit() {
    let test = TestEnv::new(4096);
    let mut first = test.env.open_write_transaction().unwrap();
    let tree = first.create_tree("t").unwrap();
    tree.add(&mut first, "owner", "first").unwrap();

    let env = test.env.clone();
    let (sender, receiver) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut tx = env.open_write_transaction().unwrap();
        sender.send(tx.txn_id()).unwrap();
        let tree = tx.open_tree("t").unwrap();
        let seen = tree.read(&tx, "owner").unwrap();
        tree.add(&mut tx, "owner", "second").unwrap();
        tx.commit().unwrap();
        seen
    });

    assert!(
        receiver.recv_timeout(Duration::from_millis(100)).is_err(),
        "second writer started while the first was active"
    );
    first.commit().unwrap();

    let txn_id = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(txn_id, 2);
    assert_eq!(handle.join().unwrap(), b"first");
    assert_eq!(test.get("t", b"owner").unwrap(), Some(b"second".to_vec()));
}

#[test]
fn test_concurrent_writers_serialize() {
    let test = TestEnv::new(4096);
    test.put("counter", b"n", &0u64.to_le_bytes()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let env = test.env.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let mut tx = env.open_write_transaction().unwrap();
                    let tree = tx.open_tree("counter").unwrap();
                    let bytes = tree.read(&tx, "n").unwrap();
                    let n = u64::from_le_bytes(bytes.try_into().unwrap());
                    tree.add(&mut tx, "n", (n + 1).to_le_bytes()).unwrap();
                    tx.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let value = test.get("counter", b"n").unwrap().unwrap();
    assert_eq!(u64::from_le_bytes(value.try_into().unwrap()), 100);
    assert_eq!(test.env.stats().txn_id, 101);
    test.check().unwrap();
}

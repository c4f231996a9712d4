//! Test that deleting a large value frees exactly the pages of its run.

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

#[test]
fn test_delete_frees_exact_run() {
    let test = TestEnv::new(4096);
    let mut rng = seeded_rng(3);
    let sizes = [5000, 12_000, 40_000];

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("blobs").unwrap();
    for (i, len) in sizes.iter().enumerate() {
        tree.add(&mut tx, padded_key(i), random_value(&mut rng, *len))
            .unwrap();
    }
    tx.commit().unwrap();

    let before = test.state("blobs").unwrap();
    let expected: u64 = sizes.iter().map(|len| overflow_run_pages(*len, 4096)).sum();
    assert_eq!(before.overflow_pages, expected);

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("blobs").unwrap();
    assert!(tree.delete(&mut tx, padded_key(1)).unwrap());
    tx.commit().unwrap();

    let after = test.state("blobs").unwrap();
    assert_eq!(
        before.overflow_pages - after.overflow_pages,
        overflow_run_pages(12_000, 4096)
    );
    assert_eq!(after.entry_count, 2);

    let tx = test.env.open_read_transaction();
    let tree = tx.open_tree("blobs").unwrap();
    assert!(matches!(
        tree.read(&tx, padded_key(1)),
        Err(EngineError::KeyNotFound)
    ));
    assert_eq!(tree.read(&tx, padded_key(2)).unwrap().len(), 40_000);
    drop(tx);

    test.check().unwrap();
}

#[test]
fn test_overwrite_in_same_transaction_reuses_run() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("blobs").unwrap();

    tree.add(&mut tx, "k", vec![1u8; 30_000]).unwrap();
    tree.add(&mut tx, "k", vec![2u8; 10_000]).unwrap();
    let state = tree.state(&tx).unwrap();
    assert_eq!(state.overflow_pages, overflow_run_pages(10_000, 4096));
    tx.commit().unwrap();

    assert_eq!(test.get("blobs", b"k").unwrap(), Some(vec![2u8; 10_000]));
    test.check().unwrap();
}

//! Test that a read transaction keeps seeing the commit it was opened on.

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

#[test]
fn test_reader_sees_values_from_its_snapshot() {
    let test = TestEnv::new(4096);
    test.put("t", b"a", b"old").unwrap();
    test.put("t", b"big", &vec![7u8; 10_000]).unwrap();

    let reader = test.env.open_read_transaction();
    let snapshot = reader.snapshot_id();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    tree.add(&mut tx, "a", "new").unwrap();
    tree.add(&mut tx, "b", "added").unwrap();
    tree.delete(&mut tx, "big").unwrap();
    tx.commit().unwrap();

    let tree = reader.open_tree("t").unwrap();
    assert_eq!(reader.snapshot_id(), snapshot);
    assert_eq!(tree.read(&reader, "a").unwrap(), b"old");
    assert_eq!(tree.get(&reader, "b").unwrap(), None);
    assert_eq!(tree.read(&reader, "big").unwrap(), vec![7u8; 10_000]);
    assert_eq!(
        collect_keys(&reader, "t").unwrap(),
        vec![b"a".to_vec(), b"big".to_vec()]
    );

    let latest = test.env.open_read_transaction();
    assert_eq!(latest.snapshot_id(), snapshot + 1);
    assert_eq!(tree.read(&latest, "a").unwrap(), b"new");
    assert_eq!(tree.read(&latest, "b").unwrap(), b"added");
    assert!(matches!(
        tree.read(&latest, "big"),
        Err(EngineError::KeyNotFound)
    ));
}

#[test]
fn test_reader_does_not_see_uncommitted_writes() {
    let test = TestEnv::new(4096);
    test.put("t", b"a", b"1").unwrap();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    tree.add(&mut tx, "a", "2").unwrap();
    tx.create_tree("pending").unwrap();

    let reader = test.env.open_read_transaction();
    assert_eq!(tree.read(&reader, "a").unwrap(), b"1");
    assert_eq!(reader.tree_names().unwrap(), vec!["t".to_string()]);

    tx.abort();
    assert_eq!(test.get("t", b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_reader_of_deleted_tree_keeps_reading() {
    let test = TestEnv::new(1024);
    for i in 0..200 {
        test.put("gone", &padded_key(i), b"value").unwrap();
    }

    let reader = test.env.open_read_transaction();
    let mut tx = test.env.open_write_transaction().unwrap();
    assert!(tx.delete_tree("gone").unwrap());
    tx.commit().unwrap();

    // Churn so freed pages would be reused if the reader did not pin them.
    for i in 0..50 {
        test.put("other", &padded_key(i), &[1u8; 300]).unwrap();
    }

    let expected: Vec<Vec<u8>> = (0..200).map(padded_key).collect();
    assert_eq!(collect_keys(&reader, "gone").unwrap(), expected);
    assert!(matches!(
        test.state("gone"),
        Err(EngineError::TreeNotFound(_))
    ));
    drop(reader);
    test.check().unwrap();
}

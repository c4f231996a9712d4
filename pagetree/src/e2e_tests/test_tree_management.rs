//! Test creating, listing and deleting trees.

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

#[test]
fn test_create_is_idempotent() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    let first = tx.create_tree("users").unwrap();
    first.add(&mut tx, "id", "1").unwrap();
    let second = tx.create_tree("users").unwrap();
    assert_eq!(second.read(&tx, "id").unwrap(), b"1");
    tx.commit().unwrap();

    let mut tx = test.env.open_write_transaction().unwrap();
    let again = tx.create_tree("users").unwrap();
    assert_eq!(again.state(&tx).unwrap().entry_count, 1);
    tx.commit().unwrap();
    test.check().unwrap();
}

#[test]
fn test_names_are_sorted_and_visible_in_write_transaction() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    for name in ["orders", "accounts", "zeta", "items"] {
        tx.create_tree(name).unwrap();
    }
    assert_eq!(
        tx.tree_names().unwrap(),
        vec!["accounts", "items", "orders", "zeta"]
    );
    assert!(tx.delete_tree("items").unwrap());
    assert_eq!(tx.tree_names().unwrap(), vec!["accounts", "orders", "zeta"]);
    tx.commit().unwrap();

    let tx = test.env.open_read_transaction();
    assert_eq!(tx.tree_names().unwrap(), vec!["accounts", "orders", "zeta"]);
}

#[test]
fn test_delete_tree_frees_pages() {
    let test = TestEnv::new(512);
    for i in 0..200 {
        test.put("big", &padded_key(i), &[1u8; 60]).unwrap();
    }
    test.put("big", b"overflow", &[2u8; 3000]).unwrap();
    let pages = test.state("big").unwrap().page_count();

    let mut tx = test.env.open_write_transaction().unwrap();
    assert!(tx.delete_tree("big").unwrap());
    assert!(!tx.delete_tree("big").unwrap());
    assert!(!tx.delete_tree("never").unwrap());
    tx.commit().unwrap();

    // The file never shrinks, so the tree's pages are now free or hold the free list.
    let stats = test.env.stats();
    assert!(stats.free_pages + stats.freelist_pages >= pages);
    assert!(matches!(test.state("big"), Err(EngineError::TreeNotFound(_))));
    test.check().unwrap();
}

#[test]
fn test_missing_tree_and_invalid_names() {
    let test = TestEnv::new(4096);
    let tx = test.env.open_read_transaction();
    assert!(matches!(
        tx.open_tree("missing"),
        Err(EngineError::TreeNotFound(name)) if name == "missing"
    ));
    drop(tx);

    let mut tx = test.env.open_write_transaction().unwrap();
    assert!(matches!(
        tx.create_tree(""),
        Err(EngineError::InvalidArgument(_))
    ));
    let long = "n".repeat(2000);
    assert!(matches!(
        tx.create_tree(&long),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(tx.open_tree("missing"), Err(EngineError::TreeNotFound(_))));
    tx.commit().unwrap();
}

#[test]
fn test_recreated_tree_starts_empty() {
    let test = TestEnv::new(4096);
    test.put("t", b"old", b"value").unwrap();

    let mut tx = test.env.open_write_transaction().unwrap();
    tx.delete_tree("t").unwrap();
    let tree = tx.create_tree("t").unwrap();
    assert_eq!(tree.get(&tx, "old").unwrap(), None);
    tree.add(&mut tx, "new", "value").unwrap();
    tx.commit().unwrap();

    assert_eq!(test.keys("t").unwrap(), vec![b"new".to_vec()]);
    test.check().unwrap();
}

//! Test adding and deleting a value twice the page size.

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

#[test]
fn test_large_value_page_counts() {
    let test = TestEnv::new(4096);
    let mut rng = seeded_rng(5);
    let value = random_value(&mut rng, 8192);

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    tree.add(&mut tx, "a", &value).unwrap();
    tx.commit().unwrap();

    let state = test.state("t").unwrap();
    assert_eq!(state.page_count(), 4);
    assert_eq!(state.overflow_pages, 3);
    assert_eq!(test.get("t", b"a").unwrap(), Some(value));

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    assert!(tree.delete(&mut tx, "a").unwrap());
    tx.commit().unwrap();

    let state = test.state("t").unwrap();
    assert_eq!(state.page_count(), 1);
    assert_eq!(state.overflow_pages, 0);
    assert_eq!(state.entry_count, 0);

    let tx = test.env.open_read_transaction();
    let tree = tx.open_tree("t").unwrap();
    assert!(matches!(tree.read(&tx, "a"), Err(EngineError::KeyNotFound)));
    assert_eq!(tree.get(&tx, "a").unwrap(), None);
    drop(tx);

    test.check().unwrap();
}

//! Test deletes that drain leaves and force borrows and merges.

use crate::e2e_tests::helpers::*;
use crate::storage::PageReader;

fn fill(test: &TestEnv, count: usize, value_len: usize) {
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    for i in 0..count {
        tree.add(&mut tx, padded_key(i), vec![b'v'; value_len]).unwrap();
    }
    tx.commit().unwrap();
}

#[test]
fn test_delete_first_fifteen_of_a_thousand() {
    let test = TestEnv::new(4096);
    fill(&test, 1000, 200);
    let before = test.state("t").unwrap();
    assert_eq!(before.depth, 2);

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    for i in 0..15 {
        assert!(tree.delete(&mut tx, padded_key(i)).unwrap());
    }
    tx.commit().unwrap();

    let expected: Vec<Vec<u8>> = (15..1000).map(padded_key).collect();
    assert_eq!(test.keys("t").unwrap(), expected);

    let after = test.state("t").unwrap();
    assert_eq!(after.entry_count, 985);
    assert!(
        after.page_count() < before.page_count(),
        "expected a merge: {before:?} -> {after:?}"
    );
    test.check().unwrap();
}

#[test]
fn test_delete_first_fifteen_with_short_values() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    for i in 0..1000 {
        tree.add(&mut tx, padded_key(i), "abcdefg").unwrap();
    }
    tx.commit().unwrap();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    for i in 0..15 {
        assert!(tree.delete(&mut tx, padded_key(i)).unwrap());
    }
    tx.commit().unwrap();

    let expected: Vec<Vec<u8>> = (15..1000).map(padded_key).collect();
    assert_eq!(test.keys("t").unwrap(), expected);
    assert_eq!(test.get("t", &padded_key(15)).unwrap(), Some(b"abcdefg".to_vec()));
    assert_eq!(test.state("t").unwrap().entry_count, 985);
    test.check().unwrap();
}

#[test]
fn test_underfilled_leaf_borrows_from_sibling_with_spare_entries() {
    let test = TestEnv::new(4096);
    fill(&test, 40, 100);
    // 112-byte entries: the first leaf holds 0..17, the second 18..39.
    let before = test.state("t").unwrap();
    assert_eq!((before.depth, before.leaf_pages), (2, 2));

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    for i in 0..12 {
        assert!(tree.delete(&mut tx, padded_key(i)).unwrap());
    }
    tx.commit().unwrap();

    // Merging would fit one page, but the right leaf can spare entries.
    let after = test.state("t").unwrap();
    assert_eq!(after.depth, 2);
    assert_eq!(after.leaf_pages, 2);
    let expected: Vec<Vec<u8>> = (12..40).map(padded_key).collect();
    assert_eq!(test.keys("t").unwrap(), expected);
    test.check().unwrap();
}

#[test]
fn test_merge_once_siblings_have_nothing_to_spare() {
    let test = TestEnv::new(4096);
    fill(&test, 40, 100);

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    for i in 0..25 {
        assert!(tree.delete(&mut tx, padded_key(i)).unwrap());
    }
    tx.commit().unwrap();

    let after = test.state("t").unwrap();
    assert_eq!(after.depth, 1);
    assert_eq!(after.leaf_pages, 1);
    assert_eq!(test.keys("t").unwrap().len(), 15);
    test.check().unwrap();
}

#[test]
fn test_delete_everything_collapses_to_one_leaf() {
    let test = TestEnv::new(512);
    fill(&test, 600, 20);
    assert!(test.state("t").unwrap().depth >= 3);

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    // Delete from both ends towards the middle so merges borrow from both sides.
    for i in 0..300 {
        assert!(tree.delete(&mut tx, padded_key(i)).unwrap());
        assert!(tree.delete(&mut tx, padded_key(599 - i)).unwrap());
        if i % 50 == 0 {
            tree.verify(&tx).unwrap();
        }
    }
    let state = tree.state(&tx).unwrap();
    tx.commit().unwrap();

    assert_eq!(state.entry_count, 0);
    assert_eq!(state.depth, 1);
    assert_eq!(state.page_count(), 1);
    assert!(test.keys("t").unwrap().is_empty());
    test.check().unwrap();
}

#[test]
fn test_interleaved_deletes_keep_tree_valid() {
    let test = TestEnv::new(1024);
    fill(&test, 2000, 30);

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    for i in (0..2000).filter(|i| i % 3 != 0) {
        assert!(tree.delete(&mut tx, padded_key(i)).unwrap());
    }
    tree.verify(&tx).unwrap();
    tx.commit().unwrap();

    let expected: Vec<Vec<u8>> = (0..2000).filter(|i| i % 3 == 0).map(padded_key).collect();
    assert_eq!(test.keys("t").unwrap(), expected);
    test.check().unwrap();
}

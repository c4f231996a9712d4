//! Test that pages freed while a reader is open are reused only after it closes.

use crate::e2e_tests::helpers::*;
use crate::storage::PageReader;

fn rewrite_all(test: &TestEnv, round: u8) {
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    for i in 0..40 {
        tree.add(&mut tx, padded_key(i), [round; 200]).unwrap();
    }
    tx.commit().unwrap();
}

#[test]
fn test_open_reader_pins_freed_pages() {
    let test = TestEnv::new(1024);
    rewrite_all(&test, 0);

    let reader = test.env.open_read_transaction();
    let pinned_total = test.env.stats().total_pages;
    for round in 1..=5 {
        rewrite_all(&test, round);
    }
    assert!(test.env.stats().total_pages > pinned_total);
    assert_eq!(test.env.stats().open_readers, 1);

    // The reader still sees its own snapshot byte for byte.
    let tree = reader.open_tree("t").unwrap();
    for i in 0..40 {
        assert_eq!(tree.read(&reader, padded_key(i)).unwrap(), [0u8; 200]);
    }
    drop(reader);
    assert_eq!(test.env.stats().open_readers, 0);

    // Once reclaimed, the file stops growing.
    rewrite_all(&test, 6);
    rewrite_all(&test, 7);
    let settled = test.env.stats().total_pages;
    for round in 8..13 {
        rewrite_all(&test, round);
        assert_eq!(test.env.stats().total_pages, settled);
    }
    assert_eq!(test.get("t", &padded_key(3)).unwrap(), Some(vec![12u8; 200]));
    test.check().unwrap();
}

#[test]
fn test_readers_on_different_snapshots() {
    let test = TestEnv::new(1024);
    rewrite_all(&test, 1);
    let first = test.env.open_read_transaction();
    rewrite_all(&test, 2);
    let second = test.env.open_read_transaction();
    rewrite_all(&test, 3);

    drop(first);
    rewrite_all(&test, 4);

    let tree = second.open_tree("t").unwrap();
    assert_eq!(tree.read(&second, padded_key(0)).unwrap(), [2u8; 200]);
    drop(second);
    test.check().unwrap();
}

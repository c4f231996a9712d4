//! Test the boundary between inline values and overflow runs.

use crate::e2e_tests::helpers::*;
use crate::storage::btree::max_inline_value_size;

#[test]
fn test_value_filling_the_page_is_inline() {
    let test = TestEnv::new(4096);
    let key = b"k";
    // Page header (24) plus entry header (7) plus the key leave 4064 bytes.
    let limit = max_inline_value_size(4096, key.len());
    assert_eq!(limit, 4064);

    test.put("t", key, &vec![1u8; limit]).unwrap();
    let state = test.state("t").unwrap();
    assert_eq!(state.overflow_pages, 0);
    assert_eq!(state.page_count(), 1);
    assert_eq!(test.get("t", key).unwrap(), Some(vec![1u8; limit]));
}

#[test]
fn test_one_byte_more_overflows() {
    let test = TestEnv::new(4096);
    let key = b"k";
    let len = max_inline_value_size(4096, key.len()) + 1;

    test.put("t", key, &vec![2u8; len]).unwrap();
    let state = test.state("t").unwrap();
    assert!(state.overflow_pages >= 1);
    assert_eq!(state.overflow_pages, overflow_run_pages(len, 4096));
    assert_eq!(test.get("t", key).unwrap(), Some(vec![2u8; len]));
    test.check().unwrap();
}

#[test]
fn test_threshold_depends_on_key_length() {
    let test = TestEnv::new(1024);
    let key = vec![b'x'; 100];
    let limit = max_inline_value_size(1024, key.len());
    assert_eq!(limit, 1024 - 24 - 7 - 100);

    test.put("t", &key, &vec![3u8; limit]).unwrap();
    assert_eq!(test.state("t").unwrap().overflow_pages, 0);

    test.put("t", &key, &vec![3u8; limit + 1]).unwrap();
    assert_eq!(
        test.state("t").unwrap().overflow_pages,
        overflow_run_pages(limit + 1, 1024)
    );
    test.check().unwrap();
}

#[test]
fn test_value_larger_than_remaining_space_overflows() {
    let test = TestEnv::new(4096);
    test.put("t", b"a", &vec![4u8; 2000]).unwrap();
    // Fits an empty page but not next to "a", so it moves to an overflow run.
    test.put("t", b"b", &vec![5u8; 3000]).unwrap();

    let state = test.state("t").unwrap();
    assert_eq!(state.overflow_pages, overflow_run_pages(3000, 4096));
    assert_eq!(state.depth, 1);
    assert_eq!(state.leaf_pages, 1);
    assert_eq!(test.get("t", b"b").unwrap(), Some(vec![5u8; 3000]));
    test.check().unwrap();
}

#[test]
fn test_value_filling_remaining_space_is_inline() {
    let test = TestEnv::new(4096);
    test.put("t", b"a", &vec![4u8; 2000]).unwrap();
    // "a" uses 7 + 1 + 2000 bytes; "b" takes everything that is left.
    let len = max_inline_value_size(4096, 1) - (7 + 1 + 2000);
    test.put("t", b"b", &vec![5u8; len]).unwrap();

    let state = test.state("t").unwrap();
    assert_eq!(state.overflow_pages, 0);
    assert_eq!(state.leaf_pages, 1);

    test.put("t", b"b", &vec![5u8; len + 1]).unwrap();
    assert_eq!(
        test.state("t").unwrap().overflow_pages,
        overflow_run_pages(len + 1, 4096)
    );
    test.check().unwrap();
}

#[test]
fn test_small_values_split_a_full_leaf() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    for i in 0..100 {
        tree.add(&mut tx, padded_key(i), [6u8; 100]).unwrap();
    }
    let state = tree.state(&tx).unwrap();
    tx.commit().unwrap();

    assert_eq!(state.overflow_pages, 0);
    assert_eq!(state.depth, 2);
    assert!(state.leaf_pages >= 3);
    test.check().unwrap();
}

//! Test that damaged pages are reported as corruption.

use crate::e2e_tests::helpers::*;
use crate::storage::btree::Node;
use crate::storage::{EngineError, PageReader, StorageEnvironment};

#[test]
fn test_corrupted_leaf_is_detected() {
    let test = TestEnv::new(4096);
    test.put("t", b"key", b"value").unwrap();
    let root = test.state("t").unwrap().root_page;

    test.storage
        .corrupt_page(root, 100, &[0xDE, 0xAD, 0xBE, 0xEF]);

    let tx = test.env.open_read_transaction();
    let tree = tx.open_tree("t").unwrap();
    assert!(matches!(
        tree.get(&tx, "key"),
        Err(EngineError::Corruption(_))
    ));
    assert!(matches!(tree.verify(&tx), Err(EngineError::Corruption(_))));
}

#[test]
fn test_corrupted_overflow_page_is_detected() {
    let test = TestEnv::new(1024);
    test.put("t", b"big", &[3u8; 5000]).unwrap();
    test.put("t", b"small", b"fine").unwrap();

    let tx = test.env.open_read_transaction();
    let root = test.state("t").unwrap().root_page;
    let Node::Leaf(leaf) = Node::decode(&tx.read_page(root).unwrap(), root).unwrap() else {
        panic!("root of a two-entry tree should be a leaf");
    };
    let overflow = leaf.entries[0].value.overflow().unwrap();
    assert_eq!(overflow.total_length, 5000);

    // Damage the second page of the run, past its header.
    test.storage
        .corrupt_page(overflow.first_page + 1, 600, &[0x5A; 8]);

    let tree = tx.open_tree("t").unwrap();
    assert!(matches!(
        tree.read(&tx, "big"),
        Err(EngineError::Corruption(_))
    ));
    assert_eq!(tree.read(&tx, "small").unwrap(), b"fine");
}

#[test]
fn test_both_superblocks_damaged_fails_to_open() {
    let test = TestEnv::new(4096);
    test.put("t", b"k", b"v").unwrap();
    test.storage.corrupt_page(0, 40, &[0xFF; 16]);
    test.storage.corrupt_page(1, 40, &[0xFF; 16]);

    let result = StorageEnvironment::open_with_storage(
        Box::new(std::sync::Arc::clone(&test.storage)),
        test.options.clone(),
    );
    assert!(matches!(result, Err(EngineError::Corruption(_))));
}

#[test]
fn test_one_damaged_superblock_falls_back() {
    let mut test = TestEnv::new(4096);
    test.put("t", b"k", b"first").unwrap();
    test.put("t", b"k", b"second").unwrap();
    // Commit 2 lives in slot 0; damaging it exposes commit 1 in slot 1.
    test.storage.corrupt_page(0, 40, &[0xFF; 16]);

    test.reopen();
    assert_eq!(test.env.stats().txn_id, 1);
    assert_eq!(test.get("t", b"k").unwrap(), Some(b"first".to_vec()));
}

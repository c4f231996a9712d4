//! Test that commits survive closing and reopening the environment.

use std::path::Path;

use crate::config::StorageEnvironmentOptions;
use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader, StorageEnvironment};

fn file_options(path: &Path, page_size: usize) -> StorageEnvironmentOptions {
    StorageEnvironmentOptions {
        page_size,
        ..StorageEnvironmentOptions::with_path(path)
    }
}

#[test]
fn test_file_environment_reopens_with_data() {
    let dir = tempfile::tempdir().unwrap();
    let options = file_options(&dir.path().join("data.db"), 1024);
    let mut rng = seeded_rng(31);
    let values: Vec<Vec<u8>> = (0..50)
        .map(|i| random_value(&mut rng, if i % 10 == 0 { 5000 } else { 40 }))
        .collect();

    let stats = {
        let env = StorageEnvironment::open(options.clone()).unwrap();
        let mut tx = env.open_write_transaction().unwrap();
        let tree = tx.create_tree("docs").unwrap();
        for (i, value) in values.iter().enumerate() {
            tree.add(&mut tx, padded_key(i), value).unwrap();
        }
        tx.create_tree("empty").unwrap();
        tx.commit().unwrap();

        let mut tx = env.open_write_transaction().unwrap();
        let tree = tx.open_tree("docs").unwrap();
        tree.delete(&mut tx, padded_key(0)).unwrap();
        tx.commit().unwrap();

        // Aborted work must not reach the file.
        let mut tx = env.open_write_transaction().unwrap();
        tx.create_tree("aborted").unwrap();
        tx.abort();
        env.stats()
    };

    let env = StorageEnvironment::open(options).unwrap();
    let reopened = env.stats();
    assert_eq!(reopened.txn_id, stats.txn_id);
    assert_eq!(reopened.total_pages, stats.total_pages);
    assert_eq!(reopened.free_pages, stats.free_pages);

    let tx = env.open_read_transaction();
    assert_eq!(
        tx.tree_names().unwrap(),
        vec!["docs".to_string(), "empty".to_string()]
    );
    let tree = tx.open_tree("docs").unwrap();
    assert_eq!(tree.get(&tx, padded_key(0)).unwrap(), None);
    for (i, value) in values.iter().enumerate().skip(1) {
        assert_eq!(&tree.read(&tx, padded_key(i)).unwrap(), value);
    }
    tree.verify(&tx).unwrap();
    drop(tx);
    crate::testing::check_page_accounting(&env).unwrap();
}

#[test]
fn test_reopen_with_other_page_size_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.db");
    {
        let env = StorageEnvironment::open(file_options(&path, 4096)).unwrap();
        let mut tx = env.open_write_transaction().unwrap();
        tx.create_tree("t").unwrap();
        tx.commit().unwrap();
    }

    let result = StorageEnvironment::open(file_options(&path, 1024));
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
}

#[test]
fn test_reopen_continues_transaction_ids() {
    let mut test = TestEnv::new(4096);
    for i in 0..5 {
        test.put("t", &padded_key(i), b"v").unwrap();
    }
    test.reopen();
    assert_eq!(test.env.stats().txn_id, 5);

    let tx = test.env.open_write_transaction().unwrap();
    assert_eq!(tx.txn_id(), 6);
    tx.commit().unwrap();

    test.reopen();
    assert_eq!(test.env.stats().txn_id, 6);
    assert_eq!(test.keys("t").unwrap().len(), 5);
    test.check().unwrap();
}

#[test]
fn test_reopen_keeps_free_pages() {
    let mut test = TestEnv::new(512);
    for i in 0..300 {
        test.put("t", &padded_key(i), &[2u8; 40]).unwrap();
    }
    let mut tx = test.env.open_write_transaction().unwrap();
    assert!(tx.delete_tree("t").unwrap());
    tx.commit().unwrap();

    let before = test.env.stats();
    assert!(before.free_pages > 0);
    test.reopen();
    let after = test.env.stats();
    assert_eq!(after.free_pages, before.free_pages);
    assert_eq!(after.freelist_pages, before.freelist_pages);

    // Freed pages are reused rather than growing the file.
    test.put("u", b"k", b"v").unwrap();
    assert_eq!(test.env.stats().total_pages, after.total_pages);
    test.check().unwrap();
}

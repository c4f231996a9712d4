//! Test ordered iteration and seeking.

use std::collections::BTreeMap;

use rand::Rng;

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader, SeekTarget};

#[test]
fn test_random_keys_iterate_sorted() {
    let test = TestEnv::new(512);
    let mut rng = seeded_rng(11);
    let mut model = BTreeMap::new();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    for _ in 0..500 {
        let len = rng.random_range(1..=24);
        let key = random_value(&mut rng, len);
        let value = random_value(&mut rng, 16);
        tree.add(&mut tx, &key, &value).unwrap();
        model.insert(key, value);
    }
    tx.commit().unwrap();

    let keys = test.keys("t").unwrap();
    let expected: Vec<Vec<u8>> = model.keys().cloned().collect();
    assert_eq!(keys, expected);
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));

    // Walk backwards from the end and compare values too.
    let tx = test.env.open_read_transaction();
    let mut it = tx.open_tree("t").unwrap().iterate(&tx).unwrap();
    let mut positioned = it.seek(SeekTarget::AfterAllKeys).unwrap();
    let mut reversed = Vec::new();
    while positioned {
        let key = it.current_key().unwrap().to_vec();
        assert_eq!(&it.current_value().unwrap(), &model[&key]);
        reversed.push(key);
        positioned = it.move_previous().unwrap();
    }
    reversed.reverse();
    assert_eq!(reversed, expected);
}

#[test]
fn test_seek_lands_on_next_key() {
    let test = TestEnv::new(512);
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    for i in (0..300).step_by(2) {
        tree.add(&mut tx, padded_key(i), padded_key(i)).unwrap();
    }
    tx.commit().unwrap();

    let tx = test.env.open_read_transaction();
    let tree = tx.open_tree("t").unwrap();
    let mut it = tree.iterate(&tx).unwrap();

    let exact = padded_key(100);
    assert!(it.seek(exact.as_slice()).unwrap());
    assert_eq!(it.current_key(), Some(exact.as_slice()));

    let between = padded_key(101);
    assert!(it.seek(between.as_slice()).unwrap());
    assert_eq!(it.current_key(), Some(padded_key(102).as_slice()));
    assert!(it.move_previous().unwrap());
    assert_eq!(it.current_key(), Some(exact.as_slice()));

    assert!(it.seek("").unwrap());
    assert_eq!(it.current_key(), Some(padded_key(0).as_slice()));
    assert!(!it.move_previous().unwrap());
    assert_eq!(it.current_key(), None);

    assert!(it.seek(SeekTarget::AfterAllKeys).unwrap());
    assert_eq!(it.current_key(), Some(padded_key(298).as_slice()));
    assert!(!it.move_next().unwrap());

    assert!(!it.seek("zzz").unwrap());
    assert_eq!(it.current_key(), None);
    assert!(matches!(it.current_value(), Err(EngineError::KeyNotFound)));
}

#[test]
fn test_empty_tree_has_no_entries() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    tx.create_tree("empty").unwrap();
    tx.commit().unwrap();

    let tx = test.env.open_read_transaction();
    let mut it = tx.open_tree("empty").unwrap().iterate(&tx).unwrap();
    assert!(!it.seek(SeekTarget::BeforeAllKeys).unwrap());
    assert!(!it.seek(SeekTarget::AfterAllKeys).unwrap());
    assert!(!it.seek("a").unwrap());
    assert!(!it.move_next().unwrap());
    assert!(!it.move_previous().unwrap());
}

#[test]
fn test_iterator_reads_overflow_values() {
    let test = TestEnv::new(1024);
    let mut rng = seeded_rng(12);
    let values: Vec<Vec<u8>> = (0..20)
        .map(|i| random_value(&mut rng, if i % 2 == 0 { 50 } else { 5000 }))
        .collect();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    for (i, value) in values.iter().enumerate() {
        tree.add(&mut tx, padded_key(i), value).unwrap();
    }

    // The write transaction iterates its own uncommitted pages.
    let mut it = tree.iterate(&tx).unwrap();
    let mut positioned = it.seek(SeekTarget::BeforeAllKeys).unwrap();
    let mut seen = Vec::new();
    while positioned {
        seen.push(it.current_value().unwrap());
        positioned = it.move_next().unwrap();
    }
    assert_eq!(seen, values);
    drop(it);
    tx.commit().unwrap();
}

//! Test that committed values read back byte for byte.

use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

#[test]
fn test_round_trip_mixed_sizes() {
    let test = TestEnv::new(4096);
    let mut rng = seeded_rng(1);

    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..300)
        .map(|i| {
            let len = match i % 5 {
                0 => 0,
                1 => 10,
                2 => 1000,
                3 => 4064,
                _ => 20_000,
            };
            (padded_key(i), random_value(&mut rng, len))
        })
        .collect();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("docs").unwrap();
    for (key, value) in &entries {
        tree.add(&mut tx, key, value).unwrap();
    }
    tx.commit().unwrap();

    let tx = test.env.open_read_transaction();
    let tree = tx.open_tree("docs").unwrap();
    for (key, value) in &entries {
        assert_eq!(&tree.read(&tx, key).unwrap(), value);
    }
    assert_eq!(tree.state(&tx).unwrap().entry_count, 300);
    drop(tx);

    test.check().unwrap();
}

#[test]
fn test_overwrite_replaces_value() {
    let test = TestEnv::new(4096);
    test.put("t", b"key", b"first").unwrap();
    test.put("t", b"key", &[9u8; 9000]).unwrap();
    assert_eq!(test.get("t", b"key").unwrap(), Some(vec![9u8; 9000]));

    test.put("t", b"key", b"small again").unwrap();
    assert_eq!(test.get("t", b"key").unwrap(), Some(b"small again".to_vec()));

    let state = test.state("t").unwrap();
    assert_eq!(state.entry_count, 1);
    assert_eq!(state.overflow_pages, 0);
    test.check().unwrap();
}

#[test]
fn test_reads_see_own_writes() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();
    tree.add(&mut tx, "a", "1").unwrap();
    assert_eq!(tree.read(&tx, "a").unwrap(), b"1");
    assert!(tree.delete(&mut tx, "a").unwrap());
    assert!(matches!(tree.read(&tx, "a"), Err(EngineError::KeyNotFound)));
    assert!(!tree.delete(&mut tx, "a").unwrap());
    tx.commit().unwrap();
}

#[test]
fn test_invalid_keys_are_rejected() {
    let test = TestEnv::new(4096);
    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.create_tree("t").unwrap();

    assert!(matches!(
        tree.add(&mut tx, b"", b"v"),
        Err(EngineError::InvalidArgument(_))
    ));
    let too_long = vec![b'k'; 1009];
    assert!(matches!(
        tree.add(&mut tx, &too_long, b"v"),
        Err(EngineError::InvalidArgument(_))
    ));

    // Rejected before any mutation, so the transaction is still usable.
    tree.add(&mut tx, &too_long[..1008], b"v").unwrap();
    tx.commit().unwrap();
    assert_eq!(test.get("t", &too_long[..1008]).unwrap(), Some(b"v".to_vec()));
}

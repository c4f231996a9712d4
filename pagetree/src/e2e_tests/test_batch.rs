//! Test all-or-nothing batches.

use crate::e2e_tests::helpers::*;
use crate::storage::{BatchCommand, EngineError, PageReader, SeekTarget, Slice, apply_batch};

fn put(i: usize, value: &[u8]) -> BatchCommand {
    BatchCommand::put(padded_key(i), value)
}

#[test]
fn test_batch_applies_every_command() {
    let test = TestEnv::new(4096);
    let commands: Vec<_> = (0..100).map(|i| put(i, b"v")).collect();
    let result = apply_batch(&test.env, "t", commands).unwrap();
    assert_eq!(result.count, 100);

    let deletes = (0..100)
        .step_by(2)
        .map(|i| BatchCommand::delete(padded_key(i)))
        .chain([BatchCommand::delete("absent")]);
    let result = apply_batch(&test.env, "t", deletes).unwrap();
    assert_eq!(result.count, 51);

    let expected: Vec<Vec<u8>> = (1..100).step_by(2).map(padded_key).collect();
    assert_eq!(test.keys("t").unwrap(), expected);
    test.check().unwrap();
}

#[test]
fn test_failed_batch_commits_nothing() {
    let test = TestEnv::new(4096);
    let commands = vec![
        put(1, b"one"),
        put(2, &[0u8; 9000]),
        BatchCommand::put(Slice::default(), "bad"),
        put(3, b"three"),
    ];

    let err = apply_batch(&test.env, "t", commands).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
    assert!(matches!(test.state("t"), Err(EngineError::TreeNotFound(_))));
    assert_eq!(test.env.stats().txn_id, 0);

    // The write slot is free again.
    let result = apply_batch(&test.env, "t", vec![put(1, b"one")]).unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(test.get("t", &padded_key(1)).unwrap(), Some(b"one".to_vec()));
    test.check().unwrap();
}

#[test]
fn test_slice_keys_order_like_stored_keys() {
    let test = TestEnv::new(4096);
    let mut keys: Vec<Slice> = ["pear", "apple", "fig", "apricot"]
        .into_iter()
        .map(Slice::from)
        .collect();
    let commands: Vec<_> = keys
        .iter()
        .map(|key| BatchCommand::put(key.clone(), key.as_bytes()))
        .collect();
    assert_eq!(commands[2].key(), &Slice::from("fig"));
    apply_batch(&test.env, "fruit", commands).unwrap();

    keys.sort();
    let stored: Vec<Vec<u8>> = keys.iter().map(|key| key.as_bytes().to_vec()).collect();
    assert_eq!(test.keys("fruit").unwrap(), stored);

    let tx = test.env.open_read_transaction();
    let tree = tx.open_tree("fruit").unwrap();
    let fig = Slice::from("fig");
    assert_eq!(tree.read(&tx, &fig).unwrap(), b"fig");

    let mut it = tree.iterate(&tx).unwrap();
    assert!(it.seek(&Slice::from("b")).unwrap());
    assert_eq!(it.current_key(), Some(fig.as_bytes()));
    assert!(it.seek(SeekTarget::AfterAllKeys).unwrap());
    assert_eq!(it.current_key(), Some(b"pear".as_slice()));
}

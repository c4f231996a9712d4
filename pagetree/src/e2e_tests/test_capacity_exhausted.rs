//! Test running out of pages under a `max_pages` limit.

use crate::config::StorageEnvironmentOptions;
use crate::e2e_tests::helpers::*;
use crate::storage::{EngineError, PageReader};

fn limited(max_pages: u64) -> TestEnv {
    let options = StorageEnvironmentOptions {
        max_pages: Some(max_pages),
        ..StorageEnvironmentOptions::in_memory(4096)
    };
    TestEnv::with_options(options)
}

#[test]
fn test_oversized_value_exhausts_capacity() {
    let test = limited(10);
    test.put("t", b"small", b"value").unwrap();
    let baseline = test.env.stats();

    let mut tx = test.env.open_write_transaction().unwrap();
    let tree = tx.open_tree("t").unwrap();
    let err = tree.add(&mut tx, "big", vec![0u8; 100_000]).unwrap_err();
    assert!(
        matches!(err, EngineError::CapacityExhausted { limit: 10, .. }),
        "unexpected error: {err}"
    );

    // The failed transaction can only be aborted.
    assert!(matches!(tx.commit(), Err(EngineError::InvalidArgument(_))));

    let stats = test.env.stats();
    assert_eq!(stats.txn_id, baseline.txn_id);
    assert_eq!(stats.total_pages, baseline.total_pages);
    assert_eq!(test.get("t", b"small").unwrap(), Some(b"value".to_vec()));
    assert_eq!(test.get("t", b"big").unwrap(), None);

    test.put("t", b"other", b"fits").unwrap();
    assert_eq!(test.keys("t").unwrap().len(), 2);
    test.check().unwrap();
}

#[test]
fn test_file_never_exceeds_limit() {
    let test = limited(16);
    let mut written = 0;
    for i in 0..1000 {
        match test.put("t", &padded_key(i), &[5u8; 500]) {
            Ok(()) => written += 1,
            Err(EngineError::CapacityExhausted { .. }) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert!(written > 0);
    assert!(test.env.stats().total_pages <= 16);
    assert_eq!(test.keys("t").unwrap().len(), written);
    test.check().unwrap();
}

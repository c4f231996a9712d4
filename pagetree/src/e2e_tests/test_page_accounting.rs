//! Randomized workload checking that no page is ever leaked.

use std::collections::BTreeMap;

use rand::Rng;

use crate::e2e_tests::helpers::*;
use crate::storage::PageReader;

const TREES: [&str; 3] = ["alpha", "beta", "gamma"];

#[test]
fn test_random_workload_accounts_for_every_page() {
    let test = TestEnv::new(512);
    let mut rng = seeded_rng(21);
    let mut model: BTreeMap<&str, BTreeMap<Vec<u8>, Vec<u8>>> = BTreeMap::new();

    for round in 0..60 {
        let mut tx = test.env.open_write_transaction().unwrap();
        for _ in 0..rng.random_range(1..40) {
            let name = TREES[rng.random_range(0..TREES.len())];
            let tree = tx.create_tree(name).unwrap();
            let entries = model.entry(name).or_default();
            let key = padded_key(rng.random_range(0..300));
            if rng.random_bool(0.3) {
                let existed = tree.delete(&mut tx, &key).unwrap();
                assert_eq!(existed, entries.remove(&key).is_some());
            } else {
                let len = match rng.random_range(0..10) {
                    0 => rng.random_range(500..3000),
                    _ => rng.random_range(0..60),
                };
                let value = random_value(&mut rng, len);
                tree.add(&mut tx, &key, &value).unwrap();
                entries.insert(key, value);
            }
        }
        if round % 15 == 14 {
            let name = TREES[rng.random_range(0..TREES.len())];
            let existed = tx.delete_tree(name).unwrap();
            assert_eq!(existed, model.remove(name).is_some());
        }

        if rng.random_bool(0.1) {
            tx.abort();
            // Rebuild the model from the last commit.
            model = snapshot(&test);
        } else {
            tx.commit().unwrap();
        }
        test.check().unwrap();
    }

    assert_eq!(snapshot(&test), model);
}

fn snapshot(test: &TestEnv) -> BTreeMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>> {
    let tx = test.env.open_read_transaction();
    let names = tx.tree_names().unwrap();
    TREES
        .iter()
        .filter(|name| names.iter().any(|n| n == **name))
        .map(|name| {
            let tree = tx.open_tree(name).unwrap();
            let entries = collect_keys(&tx, name)
                .unwrap()
                .into_iter()
                .map(|key| {
                    let value = tree.read(&tx, &key).unwrap();
                    (key, value)
                })
                .collect();
            (*name, entries)
        })
        .collect()
}

#[test]
fn test_reused_pages_keep_file_size_stable() {
    let test = TestEnv::new(1024);
    for i in 0..100 {
        test.put("t", &padded_key(i), &[1u8; 100]).unwrap();
    }
    let settled = test.env.stats().total_pages;

    for round in 0..20u8 {
        let mut tx = test.env.open_write_transaction().unwrap();
        let tree = tx.open_tree("t").unwrap();
        for i in 0..100 {
            tree.add(&mut tx, padded_key(i), [round; 100]).unwrap();
        }
        tx.commit().unwrap();
        test.check().unwrap();
    }

    let stats = test.env.stats();
    assert!(
        stats.total_pages <= settled * 2,
        "file grew from {settled} to {} pages",
        stats.total_pages
    );
}

//! Common helpers for end-to-end tests.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StorageEnvironmentOptions;
use crate::storage::{
    EngineError, FaultConfig, MemoryStorage, PageReader, SeekTarget, StorageEnvironment,
    TreeState,
};
use crate::testing::{check_page_accounting, new_faulty_environment, new_shared_environment};

/// An in-memory environment whose store outlives it, so it can be reopened
/// and have faults injected.
pub struct TestEnv {
    pub env: StorageEnvironment,
    pub storage: Arc<MemoryStorage>,
    pub options: StorageEnvironmentOptions,
}

impl TestEnv {
    /// A fresh environment with the given page size.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self::with_options(StorageEnvironmentOptions::in_memory(page_size))
    }

    /// A fresh environment with custom options.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_options(options: StorageEnvironmentOptions) -> Self {
        let (storage, env) =
            new_shared_environment(options.clone()).expect("Failed to create environment");
        Self {
            env,
            storage,
            options,
        }
    }

    /// A fresh environment whose store injects `faults` from `seed` onwards.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_faults(page_size: usize, seed: u64, faults: FaultConfig) -> Self {
        let options = StorageEnvironmentOptions::in_memory(page_size);
        let (storage, env) = new_faulty_environment(options.clone(), seed, faults)
            .expect("Failed to create environment");
        Self {
            env,
            storage,
            options,
        }
    }

    /// Drop the environment and open it again over the same store.
    #[allow(clippy::expect_used, clippy::disallowed_methods)]
    pub fn reopen(&mut self) {
        self.env = StorageEnvironment::open_with_storage(
            Box::new(Arc::clone(&self.storage)),
            self.options.clone(),
        )
        .expect("Failed to reopen environment");
    }

    /// Add one entry in its own committed transaction.
    pub fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let mut tx = self.env.open_write_transaction()?;
        let handle = tx.create_tree(tree)?;
        handle.add(&mut tx, key, value)?;
        tx.commit()
    }

    /// Read one entry from the latest commit.
    pub fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let tx = self.env.open_read_transaction();
        tx.open_tree(tree)?.get(&tx, key)
    }

    /// State of a tree in the latest commit.
    pub fn state(&self, tree: &str) -> Result<TreeState, EngineError> {
        let tx = self.env.open_read_transaction();
        tx.open_tree(tree)?.state(&tx)
    }

    /// Every key of a tree, in iteration order.
    pub fn keys(&self, tree: &str) -> Result<Vec<Vec<u8>>, EngineError> {
        let tx = self.env.open_read_transaction();
        collect_keys(&tx, tree)
    }

    /// Check page accounting and the structure of every tree.
    pub fn check(&self) -> Result<(), EngineError> {
        check_page_accounting(&self.env)?;
        let tx = self.env.open_read_transaction();
        for name in tx.tree_names()? {
            tx.open_tree(&name)?.verify(&tx)?;
        }
        Ok(())
    }
}

/// Every key of `tree` as seen by `tx`, walking forward from the start.
pub fn collect_keys<R: PageReader>(tx: &R, tree: &str) -> Result<Vec<Vec<u8>>, EngineError> {
    let mut it = tx.open_tree(tree)?.iterate(tx)?;
    let mut keys = Vec::new();
    let mut positioned = it.seek(SeekTarget::BeforeAllKeys)?;
    while positioned {
        if let Some(key) = it.current_key() {
            keys.push(key.to_vec());
        }
        positioned = it.move_next()?;
    }
    Ok(keys)
}

/// Five-character, space-padded decimal key, so keys sort numerically.
#[must_use]
pub fn padded_key(i: usize) -> Vec<u8> {
    format!("{i:>5}").into_bytes()
}

/// Deterministic pseudo-random bytes.
#[must_use]
pub fn random_value(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut value = vec![0u8; len];
    rng.fill(&mut value[..]);
    value
}

/// A seeded RNG for reproducible tests.
#[must_use]
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Pages an overflow run of `len` bytes spans.
#[must_use]
pub const fn overflow_run_pages(len: usize, page_size: usize) -> u64 {
    (24 + len).div_ceil(page_size) as u64
}

//! Helpers for building environments in tests.

use std::sync::Arc;

use crate::config::StorageEnvironmentOptions;
use crate::storage::{
    EngineError, FaultConfig, MemoryStorage, PageReader, StorageEnvironment,
};

/// A fresh in-memory environment.
pub fn new_test_environment(page_size: usize) -> Result<StorageEnvironment, EngineError> {
    StorageEnvironment::open(StorageEnvironmentOptions::in_memory(page_size))
}

/// A fresh in-memory environment whose store the caller keeps a handle to,
/// for reopening it or injecting faults.
pub fn new_shared_environment(
    options: StorageEnvironmentOptions,
) -> Result<(Arc<MemoryStorage>, StorageEnvironment), EngineError> {
    new_faulty_environment(options, 0, FaultConfig::no_faults())
}

/// A shared in-memory environment whose store injects `faults`, seeded by
/// `seed`, once the environment has been created.
#[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
pub fn new_faulty_environment(
    options: StorageEnvironmentOptions,
    seed: u64,
    faults: FaultConfig,
) -> Result<(Arc<MemoryStorage>, StorageEnvironment), EngineError> {
    let storage = Arc::new(MemoryStorage::with_faults(
        options.page_size,
        seed,
        FaultConfig::no_faults(),
    ));
    let env = StorageEnvironment::open_with_storage(Box::new(Arc::clone(&storage)), options)?;
    storage.set_fault_config(faults);
    Ok((storage, env))
}

/// Check that every page of the file is accounted for exactly once:
/// superblocks, free-list chain, free pages, the root catalog and the trees.
pub fn check_page_accounting(env: &StorageEnvironment) -> Result<(), EngineError> {
    let tx = env.open_read_transaction();
    let stats = env.stats();
    if stats.txn_id != tx.snapshot_id() {
        return Err(EngineError::InvalidArgument(
            "a commit raced the page accounting check".to_string(),
        ));
    }

    let mut tree_pages = 0;
    for name in tx.tree_names()? {
        tree_pages += tx.open_tree(&name)?.state(&tx)?.page_count();
    }

    let accounted =
        2 + stats.freelist_pages + stats.free_pages + stats.catalog_pages + tree_pages;
    if accounted != stats.total_pages {
        return Err(EngineError::Corruption(format!(
            "{} pages in the file but {accounted} accounted for \
             ({} free-list, {} free, {} catalog, {tree_pages} tree)",
            stats.total_pages, stats.freelist_pages, stats.free_pages, stats.catalog_pages
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_environment_is_accounted() {
        let env = new_test_environment(4096).expect("open");
        check_page_accounting(&env).expect("accounting");
    }

    #[test]
    fn test_faults_start_after_creation() {
        let always = FaultConfig {
            write_error_rate: 1.0,
            sync_error_rate: 0.0,
        };
        let (storage, env) =
            new_faulty_environment(StorageEnvironmentOptions::in_memory(4096), 7, always)
                .expect("open");
        check_page_accounting(&env).expect("accounting");

        let mut tx = env.open_write_transaction().expect("writer");
        tx.create_tree("t").expect("create");
        assert!(matches!(tx.commit(), Err(EngineError::Storage(_))));
        assert!(storage.stats().injected_write_errors > 0);
        assert_eq!(env.stats().txn_id, 0);
    }
}

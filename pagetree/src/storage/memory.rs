//! In-memory storage with fault injection.
//!
//! Pages live in a hash map behind a mutex. A seeded RNG decides when to
//! inject write or sync failures, so the same seed reproduces the same
//! sequence of faults. Tests can also flip a switch that fails every write
//! until it is cleared, which is how commit-abort paths are exercised.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{Storage, StorageError, check_page_size};
use crate::storage::page::{Page, PageId};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
}

impl FaultConfig {
    /// No faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Low fault rates, for stress testing.
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            write_error_rate: 0.001,
            sync_error_rate: 0.001,
        }
    }
}

/// Statistics about memory storage operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorageStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of injected sync errors.
    pub injected_sync_errors: u64,
}

struct Inner {
    pages: HashMap<PageId, Page>,
    total_pages: u64,
    fault_config: FaultConfig,
    fail_writes: bool,
    rng: StdRng,
    stats: MemoryStorageStats,
}

impl Inner {
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random_bool(rate.min(1.0))
    }
}

/// In-memory page store.
pub struct MemoryStorage {
    page_size: usize,
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    /// Create an empty store without fault injection.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self::with_faults(page_size, 0, FaultConfig::no_faults())
    }

    /// Create an empty store that injects faults using the given seed.
    #[must_use]
    pub fn with_faults(page_size: usize, seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            page_size,
            inner: Mutex::new(Inner {
                pages: HashMap::new(),
                total_pages: 0,
                fault_config,
                fail_writes: false,
                rng: StdRng::seed_from_u64(seed),
                stats: MemoryStorageStats::default(),
            }),
        }
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("lock poisoned")
    }

    /// Fail every write until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Replace the fault configuration.
    pub fn set_fault_config(&self, config: FaultConfig) {
        self.lock().fault_config = config;
    }

    /// Snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStorageStats {
        self.lock().stats.clone()
    }

    /// Overwrite raw bytes of a stored page, bypassing checksums.
    ///
    /// Used by tests to simulate on-media corruption.
    pub fn corrupt_page(&self, page_id: PageId, offset: usize, bytes: &[u8]) {
        let mut inner = self.lock();
        if let Some(page) = inner.pages.get_mut(&page_id) {
            page.write_bytes(offset, bytes);
        }
    }
}

impl Storage for MemoryStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), StorageError> {
        check_page_size(self.page_size, page)?;
        let mut inner = self.lock();
        inner.stats.reads += 1;

        if page_id >= inner.total_pages {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: inner.total_pages,
            });
        }

        match inner.pages.get(&page_id) {
            Some(stored) => page.as_bytes_mut().copy_from_slice(stored.as_bytes()),
            None => page.as_bytes_mut().fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        check_page_size(self.page_size, page)?;
        let mut inner = self.lock();
        inner.stats.writes += 1;

        let rate = inner.fault_config.write_error_rate;
        if inner.fail_writes || inner.should_inject_fault(rate) {
            inner.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "simulated write error on page {page_id}"
            )));
        }

        inner.pages.insert(page_id, page.clone());
        inner.total_pages = inner.total_pages.max(page_id + 1);
        Ok(())
    }

    fn sync(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.stats.syncs += 1;

        let rate = inner.fault_config.sync_error_rate;
        if inner.should_inject_fault(rate) {
            inner.stats.injected_sync_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }
        Ok(())
    }

    fn page_count(&self) -> Result<u64, StorageError> {
        Ok(self.lock().total_pages)
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_write_read() {
        let storage = MemoryStorage::new(512);
        let mut page = Page::new(512);
        page.write_bytes(0, b"abc");
        storage.write_page(2, &page).expect("write");

        let mut read = Page::new(512);
        storage.read_page(2, &mut read).expect("read");
        assert_eq!(read.read_bytes(0, 3), b"abc");

        storage.read_page(0, &mut read).expect("read hole");
        assert!(read.as_bytes().iter().all(|&b| b == 0));

        assert!(matches!(
            storage.read_page(3, &mut read),
            Err(StorageError::PageOutOfBounds { page_id: 3, .. })
        ));
        assert_eq!(storage.page_count().expect("count"), 3);
    }

    #[test]
    fn test_memory_fail_writes_switch() {
        let storage = MemoryStorage::new(512);
        let page = Page::new(512);

        storage.set_fail_writes(true);
        assert!(matches!(
            storage.write_page(0, &page),
            Err(StorageError::InjectedFault(_))
        ));
        assert_eq!(storage.page_count().expect("count"), 0);

        storage.set_fail_writes(false);
        storage.write_page(0, &page).expect("write after clearing");
        assert_eq!(storage.stats().injected_write_errors, 1);
    }

    #[test]
    fn test_memory_faults_are_deterministic() {
        let config = FaultConfig {
            write_error_rate: 0.3,
            sync_error_rate: 0.0,
        };
        let outcomes = |seed| {
            let storage = MemoryStorage::with_faults(512, seed, config.clone());
            let page = Page::new(512);
            (0..64)
                .map(|i| storage.write_page(i, &page).is_ok())
                .collect::<Vec<_>>()
        };

        let first = outcomes(7);
        assert_eq!(first, outcomes(7));
        assert!(first.iter().any(|ok| !ok));
        assert!(first.iter().any(|ok| *ok));
    }
}

//! The storage environment: backing store, committed state, and transaction
//! admission.
//!
//! # File Layout
//!
//! - Pages 0 and 1: superblock slots, written alternately by commit id
//! - Page 2 (at creation): root catalog leaf, mapping tree names to tree states
//! - Remaining pages: tree nodes, overflow runs, and free-list chain pages
//!
//! # Concurrency
//!
//! Any number of read transactions may be open. Each one pins the commit it
//! started from so pages that commit can see are not reused. At most one write
//! transaction is open at a time; it holds the page allocator for its whole
//! life and hands it back on commit or abort.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::config::StorageEnvironmentOptions;
use crate::storage::allocator::{PageAllocator, decode_chain_page};
use crate::storage::btree::{Node, TreeState, usable_space};
use crate::storage::error::EngineError;
use crate::storage::file::FileStorage;
use crate::storage::io::Storage;
use crate::storage::memory::MemoryStorage;
use crate::storage::page::{Page, PageId};
use crate::storage::superblock::{SUPERBLOCK_SLOTS, Superblock};
use crate::storage::transaction::{ReadTransaction, WriteTransaction};

/// Page holding the root catalog of a newly created file.
const INITIAL_CATALOG_PAGE: PageId = SUPERBLOCK_SLOTS;

/// The state published by the latest commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommittedState {
    pub(crate) txn_id: u64,
    pub(crate) catalog: TreeState,
    pub(crate) total_pages: u64,
}

#[derive(Debug)]
pub(crate) struct EnvState {
    pub(crate) committed: CommittedState,
    /// Open read transactions, counted by the commit they started from.
    pub(crate) readers: BTreeMap<u64, usize>,
    pub(crate) free_pages: u64,
    pub(crate) freelist_pages: u64,
}

/// State shared by the environment handle and its transactions.
pub(crate) struct Shared {
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) options: StorageEnvironmentOptions,
    /// Content bytes below which a non-root node is rebalanced.
    pub(crate) fill_threshold: usize,
    /// The write slot. `None` while a write transaction holds the allocator.
    pub(crate) writer: Mutex<Option<PageAllocator>>,
    pub(crate) writer_released: Condvar,
    pub(crate) state: Mutex<EnvState>,
}

impl Shared {
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, EnvState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Hand the allocator back and wake one waiting writer.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub(crate) fn release_writer(&self, allocator: PageAllocator) {
        *self.writer.lock().expect("lock poisoned") = Some(allocator);
        self.writer_released.notify_one();
    }

    pub(crate) fn register_reader(&self) -> CommittedState {
        let mut state = self.lock_state();
        let snapshot = state.committed;
        *state.readers.entry(snapshot.txn_id).or_default() += 1;
        snapshot
    }

    pub(crate) fn unregister_reader(&self, txn_id: u64) {
        let mut state = self.lock_state();
        if let Some(count) = state.readers.get_mut(&txn_id) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&txn_id);
            }
        }
    }

    /// Read a committed page from the store, bounds-checked against a snapshot.
    pub(crate) fn read_committed(
        &self,
        page_id: PageId,
        total_pages: u64,
    ) -> Result<Page, EngineError> {
        if page_id < SUPERBLOCK_SLOTS || page_id >= total_pages {
            return Err(EngineError::corrupt_page(
                page_id,
                format!("reference outside the data pages 2..{total_pages}"),
            ));
        }
        let mut page = Page::new(self.options.page_size);
        self.storage.read_page(page_id, &mut page)?;
        Ok(page)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("options", &self.options)
            .field("fill_threshold", &self.fill_threshold)
            .finish_non_exhaustive()
    }
}

/// How long to wait for the write slot.
#[derive(Debug, Clone, Copy)]
enum WriterWait {
    Block,
    Try,
    Timeout(Duration),
}

/// Point-in-time environment counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentStats {
    /// Id of the latest commit.
    pub txn_id: u64,
    /// Pages in the file, including superblocks and free pages.
    pub total_pages: u64,
    /// Pages on the free list, reusable now or once readers move on.
    pub free_pages: u64,
    /// Pages holding the persisted free list.
    pub freelist_pages: u64,
    /// Pages owned by the root catalog.
    pub catalog_pages: u64,
    /// Open read transactions.
    pub open_readers: usize,
}

/// A transactional store of named B-trees.
///
/// The handle is cheap to clone; clones share the same store and write slot.
#[derive(Debug, Clone)]
pub struct StorageEnvironment {
    shared: Arc<Shared>,
}

impl StorageEnvironment {
    /// Open an environment as described by `options`.
    ///
    /// With no `path` the environment lives in memory and is lost on drop.
    pub fn open(options: StorageEnvironmentOptions) -> Result<Self, EngineError> {
        options.validate()?;
        let storage: Box<dyn Storage> = match &options.path {
            Some(path) => Box::new(FileStorage::open(path, options.page_size)?),
            None => Box::new(MemoryStorage::new(options.page_size)),
        };
        Self::open_with_storage(storage, options)
    }

    /// Open an environment over an existing store, creating the initial
    /// layout if the store is empty. `options.path` is ignored.
    pub fn open_with_storage(
        storage: Box<dyn Storage>,
        options: StorageEnvironmentOptions,
    ) -> Result<Self, EngineError> {
        options.validate()?;
        if storage.page_size() != options.page_size {
            return Err(EngineError::InvalidArgument(format!(
                "store uses {}-byte pages, options ask for {}",
                storage.page_size(),
                options.page_size
            )));
        }

        let (superblock, allocator) = if storage.page_count()? == 0 {
            create(storage.as_ref(), &options)?
        } else {
            load(storage.as_ref(), &options)?
        };

        let state = EnvState {
            committed: CommittedState {
                txn_id: superblock.txn_id,
                catalog: superblock.root_catalog,
                total_pages: superblock.total_pages,
            },
            readers: BTreeMap::new(),
            free_pages: superblock.free_page_count,
            freelist_pages: superblock.free_list_pages,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                storage,
                fill_threshold: fill_threshold(&options),
                options,
                writer: Mutex::new(Some(allocator)),
                writer_released: Condvar::new(),
                state: Mutex::new(state),
            }),
        })
    }

    /// Options the environment was opened with.
    #[must_use]
    pub fn options(&self) -> &StorageEnvironmentOptions {
        &self.shared.options
    }

    /// Open a read transaction on the latest commit.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn open_read_transaction(&self) -> ReadTransaction {
        ReadTransaction::begin(Arc::clone(&self.shared))
    }

    /// Open the write transaction, blocking until the write slot is free.
    ///
    /// Waiting writers are woken in no particular order.
    pub fn open_write_transaction(&self) -> Result<WriteTransaction, EngineError> {
        self.begin_write(WriterWait::Block)
    }

    /// Open the write transaction, or fail with `WriteConflict` if another
    /// one is active.
    pub fn try_open_write_transaction(&self) -> Result<WriteTransaction, EngineError> {
        self.begin_write(WriterWait::Try)
    }

    /// Open the write transaction, waiting at most `timeout` for the write slot.
    pub fn open_write_transaction_timeout(
        &self,
        timeout: Duration,
    ) -> Result<WriteTransaction, EngineError> {
        self.begin_write(WriterWait::Timeout(timeout))
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> EnvironmentStats {
        let state = self.shared.lock_state();
        EnvironmentStats {
            txn_id: state.committed.txn_id,
            total_pages: state.committed.total_pages,
            free_pages: state.free_pages,
            freelist_pages: state.freelist_pages,
            catalog_pages: state.committed.catalog.page_count(),
            open_readers: state.readers.values().sum(),
        }
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn begin_write(&self, wait: WriterWait) -> Result<WriteTransaction, EngineError> {
        let mut allocator = self.acquire_writer(wait)?;

        let (committed, oldest_reader) = {
            let state = self.shared.lock_state();
            (state.committed, state.readers.keys().next().copied())
        };

        let released = allocator.release(oldest_reader);
        if released > 0 {
            tracing::debug!(
                "released {released} pages for reuse (oldest reader: {oldest_reader:?})"
            );
        }

        let txn_id = committed.txn_id + 1;
        tracing::debug!("write transaction {txn_id} started");
        Ok(WriteTransaction::begin(
            Arc::clone(&self.shared),
            txn_id,
            committed,
            allocator,
        ))
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn acquire_writer(&self, wait: WriterWait) -> Result<PageAllocator, EngineError> {
        let shared = &self.shared;
        let mut slot = shared.writer.lock().expect("lock poisoned");

        if slot.is_none() {
            match wait {
                WriterWait::Try => return Err(EngineError::WriteConflict),
                WriterWait::Block => {
                    tracing::debug!("waiting for the write slot");
                    slot = shared
                        .writer_released
                        .wait_while(slot, |s| s.is_none())
                        .expect("lock poisoned");
                }
                WriterWait::Timeout(timeout) => {
                    tracing::debug!("waiting up to {timeout:?} for the write slot");
                    let (guard, _) = shared
                        .writer_released
                        .wait_timeout_while(slot, timeout, |s| s.is_none())
                        .expect("lock poisoned");
                    slot = guard;
                }
            }
        }

        slot.take().ok_or(EngineError::WriteConflict)
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)] // min_fill is validated to 0.0..=0.5 and page sizes are small
fn fill_threshold(options: &StorageEnvironmentOptions) -> usize {
    (options.min_fill * usable_space(options.page_size) as f64) as usize
}

/// Write the initial layout: an empty root catalog and both superblock slots.
fn create(
    storage: &dyn Storage,
    options: &StorageEnvironmentOptions,
) -> Result<(Superblock, PageAllocator), EngineError> {
    let page_size = options.page_size;
    let catalog = TreeState::new(INITIAL_CATALOG_PAGE);

    storage.write_page(
        INITIAL_CATALOG_PAGE,
        &Node::empty_leaf().encode(INITIAL_CATALOG_PAGE, page_size),
    )?;

    let superblock = Superblock {
        page_size: u32::try_from(page_size).map_err(|_| {
            EngineError::InvalidArgument(format!("page size {page_size} is too large"))
        })?,
        txn_id: 0,
        total_pages: INITIAL_CATALOG_PAGE + 1,
        free_list_head: 0,
        free_list_pages: 0,
        free_page_count: 0,
        root_catalog: catalog,
    };
    let page = superblock.to_page(page_size);
    for slot in 0..SUPERBLOCK_SLOTS {
        storage.write_page(slot, &page)?;
    }
    storage.sync()?;

    tracing::info!("created environment with {page_size}-byte pages");
    let allocator = PageAllocator::new(superblock.total_pages, options.max_pages);
    Ok((superblock, allocator))
}

/// Read the newest superblock and the free list it points to.
fn load(
    storage: &dyn Storage,
    options: &StorageEnvironmentOptions,
) -> Result<(Superblock, PageAllocator), EngineError> {
    let page_size = options.page_size;
    let read_slot = |slot: PageId| -> Result<_, EngineError> {
        let mut page = Page::new(page_size);
        storage.read_page(slot, &mut page)?;
        Ok(Superblock::from_page(&page))
    };
    let superblock = Superblock::newest(read_slot(0)?, read_slot(1)?)?;

    if superblock.page_size as usize != page_size {
        return Err(EngineError::InvalidArgument(format!(
            "file was created with {}-byte pages, options ask for {page_size}",
            superblock.page_size
        )));
    }

    let mut chain = Vec::new();
    let mut ids = Vec::new();
    let mut next = (superblock.free_list_pages > 0).then_some(superblock.free_list_head);
    while let Some(page_id) = next {
        if chain.len() as u64 >= superblock.free_list_pages || page_id >= superblock.total_pages {
            return Err(EngineError::corrupt_page(page_id, "free list chain is malformed"));
        }
        let mut page = Page::new(page_size);
        storage.read_page(page_id, &mut page)?;
        let (chunk, following) = decode_chain_page(&page)?;
        chain.push(page_id);
        ids.extend(chunk);
        next = following;
    }

    if chain.len() as u64 != superblock.free_list_pages
        || ids.len() as u64 != superblock.free_page_count
        || ids.iter().any(|&id| id < SUPERBLOCK_SLOTS || id >= superblock.total_pages)
    {
        return Err(EngineError::Corruption(format!(
            "free list holds {} ids in {} pages, superblock records {} ids in {} pages",
            ids.len(),
            chain.len(),
            superblock.free_page_count,
            superblock.free_list_pages
        )));
    }

    tracing::info!(
        "opened environment at commit {}: {} pages, {} free",
        superblock.txn_id,
        superblock.total_pages,
        ids.len()
    );
    let allocator =
        PageAllocator::from_persisted(superblock.total_pages, options.max_pages, ids, chain);
    Ok((superblock, allocator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::new_test_environment;

    #[test]
    fn test_create_initial_layout() {
        let env = new_test_environment(4096).expect("open");
        let stats = env.stats();
        assert_eq!(stats.txn_id, 0);
        assert_eq!(stats.total_pages, 3);
        assert_eq!(stats.free_pages, 0);
        assert_eq!(stats.catalog_pages, 1);
        assert_eq!(stats.open_readers, 0);
    }

    #[test]
    fn test_fill_threshold() {
        let options = StorageEnvironmentOptions::default();
        assert_eq!(fill_threshold(&options), (4096 - 24) / 4);
        let options = StorageEnvironmentOptions {
            min_fill: 0.0,
            ..StorageEnvironmentOptions::default()
        };
        assert_eq!(fill_threshold(&options), 0);
    }

    #[test]
    fn test_try_open_write_conflict() {
        let env = new_test_environment(4096).expect("open");
        let tx = env.try_open_write_transaction().expect("first writer");
        assert!(matches!(
            env.try_open_write_transaction(),
            Err(EngineError::WriteConflict)
        ));
        assert!(matches!(
            env.open_write_transaction_timeout(Duration::from_millis(20)),
            Err(EngineError::WriteConflict)
        ));
        drop(tx);
        assert!(env.try_open_write_transaction().is_ok());
    }

    #[test]
    fn test_readers_are_counted() {
        let env = new_test_environment(4096).expect("open");
        let a = env.open_read_transaction();
        let b = env.open_read_transaction();
        assert_eq!(env.stats().open_readers, 2);
        drop(a);
        assert_eq!(env.stats().open_readers, 1);
        drop(b);
        assert_eq!(env.stats().open_readers, 0);
    }

    #[test]
    fn test_page_size_mismatch_with_store() {
        let storage = Box::new(MemoryStorage::new(8192));
        assert!(matches!(
            StorageEnvironment::open_with_storage(storage, StorageEnvironmentOptions::default()),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}

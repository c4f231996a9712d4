//! Read and write transactions.
//!
//! A read transaction pins the commit that was current when it began and reads
//! pages straight from the store; committed pages are never overwritten while
//! a reader might still reach them.
//!
//! The write transaction keeps every page it writes in a private overlay.
//! Pages taken over from the committed state are copied on first write, and
//! their old versions are freed once the commit that replaced them is older
//! than every open reader. On commit the overlay, the free list and a new
//! superblock are written; on abort (or drop) the overlay is discarded and
//! committed state is untouched.
//!
//! # Commit Order
//!
//! 1. Fold tree state changes into the root catalog
//! 2. Move pages freed by this transaction to the pending list
//! 3. Allocate and encode the free-list chain
//! 4. Write overlay and chain pages, then sync
//! 5. Write the superblock to slot `txn_id % 2`, then sync
//! 6. Publish the new committed state and release the write slot

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crate::storage::allocator::{PageAllocator, encode_chain, ids_per_page};
use crate::storage::btree::{self, Node, Tree, TreeIterator, TreeState, max_key_size};
use crate::storage::environment::{CommittedState, Shared};
use crate::storage::error::EngineError;
use crate::storage::page::{Page, PageId};
use crate::storage::slice::SeekTarget;
use crate::storage::superblock::Superblock;

/// Read access to a consistent set of pages.
///
/// Implemented by both transaction kinds so tree reads work on either.
pub trait PageReader {
    /// Page size in bytes.
    fn page_size(&self) -> usize;

    /// Pages in the file as seen by this transaction.
    fn total_pages(&self) -> u64;

    /// Read a page as of this transaction.
    fn read_page(&self, page_id: PageId) -> Result<Cow<'_, Page>, EngineError>;

    /// State of the named tree, or `None` if it does not exist.
    fn tree_state(&self, name: &str) -> Result<Option<TreeState>, EngineError>;

    /// Names of every tree, in sorted order.
    fn tree_names(&self) -> Result<Vec<String>, EngineError>;

    /// Handle to an existing tree.
    fn open_tree(&self, name: &str) -> Result<Tree, EngineError> {
        match self.tree_state(name)? {
            Some(_) => Ok(Tree::new(name)),
            None => Err(EngineError::TreeNotFound(name.to_string())),
        }
    }
}

fn catalog_state<R: PageReader + ?Sized>(
    tx: &R,
    catalog: &TreeState,
    name: &str,
) -> Result<Option<TreeState>, EngineError> {
    let Some(value) = btree::lookup(tx, catalog, name.as_bytes())? else {
        return Ok(None);
    };
    let bytes = btree::resolve_value(tx, value)?;
    TreeState::from_bytes(&bytes)
        .map(Some)
        .ok_or_else(|| EngineError::Corruption(format!("catalog entry for tree {name:?}")))
}

fn catalog_names<R: PageReader + ?Sized>(
    tx: &R,
    catalog: TreeState,
) -> Result<BTreeSet<String>, EngineError> {
    let mut names = BTreeSet::new();
    let mut it = TreeIterator::new(tx, catalog);
    let mut positioned = it.seek(SeekTarget::BeforeAllKeys)?;
    while positioned {
        if let Some(key) = it.current_key() {
            names.insert(String::from_utf8_lossy(key).into_owned());
        }
        positioned = it.move_next()?;
    }
    Ok(names)
}

fn validate_tree_name(name: &str, page_size: usize) -> Result<(), EngineError> {
    let max = max_key_size(page_size);
    if name.is_empty() || name.len() > max {
        return Err(EngineError::InvalidArgument(format!(
            "tree names must be 1 to {max} bytes, got {}",
            name.len()
        )));
    }
    Ok(())
}

/// A snapshot of the latest commit at the time it was opened.
///
/// Dropping the transaction releases the snapshot.
#[derive(Debug)]
pub struct ReadTransaction {
    shared: Arc<Shared>,
    snapshot: CommittedState,
}

impl ReadTransaction {
    pub(crate) fn begin(shared: Arc<Shared>) -> Self {
        let snapshot = shared.register_reader();
        Self { shared, snapshot }
    }

    /// Id of the commit this transaction reads.
    #[must_use]
    pub const fn snapshot_id(&self) -> u64 {
        self.snapshot.txn_id
    }

    /// Release the snapshot.
    pub fn dispose(self) {}
}

impl PageReader for ReadTransaction {
    fn page_size(&self) -> usize {
        self.shared.options.page_size
    }

    fn total_pages(&self) -> u64 {
        self.snapshot.total_pages
    }

    fn read_page(&self, page_id: PageId) -> Result<Cow<'_, Page>, EngineError> {
        self.shared
            .read_committed(page_id, self.snapshot.total_pages)
            .map(Cow::Owned)
    }

    fn tree_state(&self, name: &str) -> Result<Option<TreeState>, EngineError> {
        catalog_state(self, &self.snapshot.catalog, name)
    }

    fn tree_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(catalog_names(self, self.snapshot.catalog)?.into_iter().collect())
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        self.shared.unregister_reader(self.snapshot.txn_id);
    }
}

/// The single open write transaction.
///
/// Changes become visible to new read transactions on [`commit`](Self::commit).
/// Dropping an uncommitted transaction aborts it.
pub struct WriteTransaction {
    shared: Arc<Shared>,
    txn_id: u64,
    base: CommittedState,
    /// Working allocator; becomes the writer's allocator on commit.
    allocator: PageAllocator,
    /// Allocator as it was at begin, restored on abort. `None` once finished.
    original: Option<PageAllocator>,
    /// Pages allocated and written by this transaction.
    dirty: HashMap<PageId, Page>,
    /// Committed pages this transaction no longer references.
    freed: Vec<PageId>,
    /// Tree states changed by this transaction; `None` marks a deleted tree.
    trees: BTreeMap<String, Option<TreeState>>,
    /// Set when an operation failed part way; the transaction can only abort.
    poisoned: bool,
}

impl WriteTransaction {
    pub(crate) fn begin(
        shared: Arc<Shared>,
        txn_id: u64,
        base: CommittedState,
        allocator: PageAllocator,
    ) -> Self {
        Self {
            shared,
            txn_id,
            base,
            original: Some(allocator.clone()),
            allocator,
            dirty: HashMap::new(),
            freed: Vec::new(),
            trees: BTreeMap::new(),
            poisoned: false,
        }
    }

    /// Id this transaction will commit as.
    #[must_use]
    pub const fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// Create a tree, or open it if it already exists.
    pub fn create_tree(&mut self, name: &str) -> Result<Tree, EngineError> {
        validate_tree_name(name, self.page_size())?;
        if self.tree_state(name)?.is_some() {
            return Ok(Tree::new(name));
        }

        let root = self.guard(|tx| tx.write_node(None, &Node::empty_leaf()))?;
        self.record_tree(name, TreeState::new(root));
        tracing::debug!("created tree {name:?} with root page {root}");
        Ok(Tree::new(name))
    }

    /// Delete a tree and free all of its pages. Returns whether it existed.
    pub fn delete_tree(&mut self, name: &str) -> Result<bool, EngineError> {
        let Some(state) = self.tree_state(name)? else {
            return Ok(false);
        };
        self.guard(|tx| btree::free_tree(tx, &state))?;
        self.trees.insert(name.to_string(), None);
        tracing::debug!("deleted tree {name:?}, freed {} pages", state.page_count());
        Ok(true)
    }

    /// Commit all changes.
    ///
    /// On failure nothing becomes visible and the transaction is aborted.
    pub fn commit(mut self) -> Result<(), EngineError> {
        if self.poisoned {
            return Err(EngineError::InvalidArgument(
                "write transaction failed and must be aborted".to_string(),
            ));
        }

        let started = Instant::now();
        let (committed, free_pages, freelist_pages) = match self.write_commit() {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("commit of transaction {} failed: {e}", self.txn_id);
                return Err(e);
            }
        };

        {
            let mut state = self.shared.lock_state();
            state.committed = committed;
            state.free_pages = free_pages;
            state.freelist_pages = freelist_pages;
        }

        let dirty_pages = self.dirty.len();
        self.original = None;
        let allocator = std::mem::replace(&mut self.allocator, PageAllocator::new(0, None));
        self.shared.release_writer(allocator);

        tracing::debug!(
            "committed transaction {}: {dirty_pages} pages written, {} total, {free_pages} free, in {:?}",
            committed.txn_id,
            committed.total_pages,
            started.elapsed()
        );
        Ok(())
    }

    /// Discard all changes.
    pub fn abort(self) {}

    /// Persist the overlay, free list and superblock.
    fn write_commit(&mut self) -> Result<(CommittedState, u64, u64), EngineError> {
        let page_size = self.page_size();

        let mut catalog = self.base.catalog;
        for (name, state) in std::mem::take(&mut self.trees) {
            match state {
                Some(state) => btree::insert(self, &mut catalog, name.as_bytes(), &state.to_bytes())?,
                None => {
                    btree::remove(self, &mut catalog, name.as_bytes())?;
                }
            }
        }

        let freed = std::mem::take(&mut self.freed);
        self.allocator.defer(self.txn_id, freed);
        let old_chain = self.allocator.take_chain();
        self.allocator.defer(self.txn_id, old_chain);

        let per_page = ids_per_page(page_size) as u64;
        let mut chain = Vec::new();
        while (chain.len() as u64) < self.allocator.free_count().div_ceil(per_page) {
            chain.push(self.allocator.allocate(1)?);
        }
        let ids = self.allocator.persisted_ids();
        let chain_pages = encode_chain(&ids, &chain, page_size);

        let mut page_ids: Vec<PageId> = self.dirty.keys().copied().collect();
        page_ids.sort_unstable();
        for page_id in page_ids {
            if let Some(page) = self.dirty.get(&page_id) {
                self.shared.storage.write_page(page_id, page)?;
            }
        }
        for (page_id, page) in &chain_pages {
            self.shared.storage.write_page(*page_id, page)?;
        }

        let sync = self.shared.options.sync_on_commit;
        if sync {
            self.shared.storage.sync()?;
        }

        let total_pages = self.allocator.total_pages();
        let superblock = Superblock {
            page_size: u32::try_from(page_size).map_err(|_| {
                EngineError::InvalidArgument(format!("page size {page_size} is too large"))
            })?,
            txn_id: self.txn_id,
            total_pages,
            free_list_head: chain.first().copied().unwrap_or(0),
            free_list_pages: chain.len() as u64,
            free_page_count: ids.len() as u64,
            root_catalog: catalog,
        };
        self.shared.storage.write_page(
            Superblock::slot_for(self.txn_id),
            &superblock.to_page(page_size),
        )?;
        if sync {
            self.shared.storage.sync()?;
        }

        self.allocator.set_chain(chain);
        Ok((
            CommittedState {
                txn_id: self.txn_id,
                catalog,
                total_pages,
            },
            superblock.free_page_count,
            superblock.free_list_pages,
        ))
    }

    /// Rebalancing threshold in content bytes.
    pub(crate) fn fill_threshold(&self) -> usize {
        self.shared.fill_threshold
    }

    /// Whether `page_id` was allocated by this transaction.
    pub(crate) fn is_dirty(&self, page_id: PageId) -> bool {
        self.dirty.contains_key(&page_id)
    }

    /// Allocate `count` contiguous pages. The caller must `put_page` each one.
    pub(crate) fn allocate_pages(&mut self, count: u64) -> Result<PageId, EngineError> {
        self.allocator.allocate(count)
    }

    pub(crate) fn put_page(&mut self, page_id: PageId, page: Page) {
        self.dirty.insert(page_id, page);
    }

    /// Free a page. Pages this transaction allocated are reusable at once;
    /// committed pages wait until no reader can see them.
    pub(crate) fn free_page(&mut self, page_id: PageId) {
        if self.dirty.remove(&page_id).is_some() {
            self.allocator.free_now(page_id);
        } else {
            self.freed.push(page_id);
        }
    }

    /// Write a node, copying it to a new page unless `page_id` already
    /// belongs to this transaction. Returns the page it was written to.
    pub(crate) fn write_node(
        &mut self,
        page_id: Option<PageId>,
        node: &Node,
    ) -> Result<PageId, EngineError> {
        let target = match page_id {
            Some(id) if self.is_dirty(id) => id,
            Some(id) => {
                let copy = self.allocator.allocate(1)?;
                self.freed.push(id);
                copy
            }
            None => self.allocator.allocate(1)?,
        };
        self.dirty.insert(target, node.encode(target, self.page_size()));
        Ok(target)
    }

    /// Run a mutation, poisoning the transaction if it fails part way.
    pub(crate) fn guard<T>(
        &mut self,
        operation: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if self.poisoned {
            return Err(EngineError::InvalidArgument(
                "write transaction failed and must be aborted".to_string(),
            ));
        }
        let result = operation(self);
        if let Err(e) = &result {
            tracing::debug!("transaction {} poisoned: {e}", self.txn_id);
            self.poisoned = true;
        }
        result
    }

    pub(crate) fn record_tree(&mut self, name: &str, state: TreeState) {
        self.trees.insert(name.to_string(), Some(state));
    }
}

impl PageReader for WriteTransaction {
    fn page_size(&self) -> usize {
        self.shared.options.page_size
    }

    fn total_pages(&self) -> u64 {
        self.allocator.total_pages()
    }

    fn read_page(&self, page_id: PageId) -> Result<Cow<'_, Page>, EngineError> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(Cow::Borrowed(page));
        }
        self.shared
            .read_committed(page_id, self.base.total_pages)
            .map(Cow::Owned)
    }

    fn tree_state(&self, name: &str) -> Result<Option<TreeState>, EngineError> {
        match self.trees.get(name) {
            Some(state) => Ok(*state),
            None => catalog_state(self, &self.base.catalog, name),
        }
    }

    fn tree_names(&self) -> Result<Vec<String>, EngineError> {
        let mut names = catalog_names(self, self.base.catalog)?;
        for (name, state) in &self.trees {
            if state.is_some() {
                names.insert(name.clone());
            } else {
                names.remove(name);
            }
        }
        Ok(names.into_iter().collect())
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            tracing::debug!(
                "write transaction {} aborted, discarding {} pages",
                self.txn_id,
                self.dirty.len()
            );
            self.shared.release_writer(original);
        }
    }
}

impl std::fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("txn_id", &self.txn_id)
            .field("dirty_pages", &self.dirty.len())
            .field("freed_pages", &self.freed.len())
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

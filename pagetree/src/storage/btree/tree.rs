//! Named B-trees: search, insert, delete, and the bottom-up write-back loop.
//!
//! Every mutation follows the same shape. The path from the root to the
//! target leaf is read into memory, the leaf is changed, and then the path is
//! written back bottom-up. At each level the node is split if it overflows,
//! rebalanced with a sibling if it is underfilled, or simply copied on write.
//! The parent absorbs any new separators or child ids and becomes the next
//! node to process, until the root is reached.

// Page counts stay far below usize::MAX.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::btree::iterator::TreeIterator;
use crate::storage::btree::node::{
    BranchNode, LeafEntry, LeafNode, LeafValue, Node, OverflowRef, max_key_size, stays_inline,
};
use crate::storage::btree::{rebalance, verify};
use crate::storage::error::EngineError;
use crate::storage::overflow;
use crate::storage::page::PageId;
use crate::storage::transaction::{PageReader, WriteTransaction};

/// Persistent description of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeState {
    /// Page holding the root node.
    pub root_page: PageId,
    /// Number of levels, 1 for a tree whose root is a leaf.
    pub depth: u32,
    /// Branch pages owned by the tree.
    pub branch_pages: u64,
    /// Leaf pages owned by the tree.
    pub leaf_pages: u64,
    /// Overflow pages owned by the tree.
    pub overflow_pages: u64,
    /// Number of stored entries.
    pub entry_count: u64,
}

impl TreeState {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = 48;

    /// State of an empty tree rooted at `root_page`.
    #[must_use]
    pub const fn new(root_page: PageId) -> Self {
        Self {
            root_page,
            depth: 1,
            branch_pages: 0,
            leaf_pages: 1,
            overflow_pages: 0,
            entry_count: 0,
        }
    }

    /// Total pages owned by the tree.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.branch_pages + self.leaf_pages + self.overflow_pages
    }

    /// Serialize to the catalog representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..8].copy_from_slice(&self.root_page.to_le_bytes());
        buf[8..12].copy_from_slice(&self.depth.to_le_bytes());
        // bytes 12-15 reserved
        buf[16..24].copy_from_slice(&self.branch_pages.to_le_bytes());
        buf[24..32].copy_from_slice(&self.leaf_pages.to_le_bytes());
        buf[32..40].copy_from_slice(&self.overflow_pages.to_le_bytes());
        buf[40..48].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    /// Deserialize; `None` if the length is wrong or the state is impossible.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_SIZE {
            return None;
        }
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };
        let mut depth = [0u8; 4];
        depth.copy_from_slice(&bytes[8..12]);

        let state = Self {
            root_page: u64_at(0),
            depth: u32::from_le_bytes(depth),
            branch_pages: u64_at(16),
            leaf_pages: u64_at(24),
            overflow_pages: u64_at(32),
            entry_count: u64_at(40),
        };
        (state.depth >= 1 && state.leaf_pages >= 1).then_some(state)
    }

    fn add_node_pages(&mut self, node: &Node, count: u64) {
        match node {
            Node::Leaf(_) => self.leaf_pages += count,
            Node::Branch(_) => self.branch_pages += count,
        }
    }

    pub(super) fn remove_node_page(&mut self, node: &Node) {
        match node {
            Node::Leaf(_) => self.leaf_pages -= 1,
            Node::Branch(_) => self.branch_pages -= 1,
        }
    }
}

/// A handle to a named tree.
///
/// The handle holds no state of its own; every operation looks the tree up in
/// the transaction it is given, so a handle stays valid across transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    name: String,
}

impl Tree {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Name of the tree.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state of the tree as seen by `tx`.
    pub fn state<R: PageReader + ?Sized>(&self, tx: &R) -> Result<TreeState, EngineError> {
        tx.tree_state(&self.name)?
            .ok_or_else(|| EngineError::TreeNotFound(self.name.clone()))
    }

    /// Look up a value.
    pub fn get<R: PageReader + ?Sized>(
        &self,
        tx: &R,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let state = self.state(tx)?;
        lookup(tx, &state, key.as_ref())?
            .map(|value| resolve_value(tx, value))
            .transpose()
    }

    /// Look up a value that must exist.
    pub fn read<R: PageReader + ?Sized>(
        &self,
        tx: &R,
        key: impl AsRef<[u8]>,
    ) -> Result<Vec<u8>, EngineError> {
        self.get(tx, key)?.ok_or(EngineError::KeyNotFound)
    }

    /// Insert or overwrite a value.
    pub fn add(
        &self,
        tx: &mut WriteTransaction,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<(), EngineError> {
        let key = key.as_ref();
        let value = value.as_ref();
        validate_key(key, tx.page_size())?;
        if u32::try_from(value.len()).is_err() {
            return Err(EngineError::InvalidArgument(format!(
                "value of {} bytes exceeds the maximum of {} bytes",
                value.len(),
                u32::MAX
            )));
        }

        let mut state = self.state(tx)?;
        tx.guard(|tx| insert(tx, &mut state, key, value))?;
        tx.record_tree(&self.name, state);
        Ok(())
    }

    /// Remove a key. Returns whether it existed; a missing key is not an error.
    pub fn delete(
        &self,
        tx: &mut WriteTransaction,
        key: impl AsRef<[u8]>,
    ) -> Result<bool, EngineError> {
        let key = key.as_ref();
        validate_key(key, tx.page_size())?;

        let mut state = self.state(tx)?;
        let removed = tx.guard(|tx| remove(tx, &mut state, key))?;
        if removed {
            tx.record_tree(&self.name, state);
        }
        Ok(removed)
    }

    /// Open a cursor over the tree. Call `seek` before reading from it.
    pub fn iterate<'t, R: PageReader + ?Sized>(
        &self,
        tx: &'t R,
    ) -> Result<TreeIterator<'t, R>, EngineError> {
        Ok(TreeIterator::new(tx, self.state(tx)?))
    }

    /// Walk the whole tree and check its structural invariants.
    pub fn verify<R: PageReader + ?Sized>(&self, tx: &R) -> Result<(), EngineError> {
        verify::verify_tree(tx, &self.state(tx)?)
    }
}

fn validate_key(key: &[u8], page_size: usize) -> Result<(), EngineError> {
    if key.is_empty() {
        return Err(EngineError::InvalidArgument(
            "keys must not be empty".to_string(),
        ));
    }
    let max = max_key_size(page_size);
    if key.len() > max {
        return Err(EngineError::InvalidArgument(format!(
            "key of {} bytes exceeds the maximum of {max} bytes",
            key.len()
        )));
    }
    Ok(())
}

/// Read and decode a node page.
pub(crate) fn read_node<R: PageReader + ?Sized>(
    tx: &R,
    page_id: PageId,
) -> Result<Node, EngineError> {
    let page = tx.read_page(page_id)?;
    Node::decode(&page, page_id).map_err(|e| {
        tracing::error!("failed to decode page {page_id}: {e}");
        EngineError::corrupt_page(page_id, e)
    })
}

/// Turn a stored value into bytes, following overflow runs.
pub(crate) fn resolve_value<R: PageReader + ?Sized>(
    tx: &R,
    value: LeafValue,
) -> Result<Vec<u8>, EngineError> {
    match value {
        LeafValue::Inline(bytes) => Ok(bytes),
        LeafValue::Overflow(overflow) => overflow::read_run(tx, overflow),
    }
}

/// A branch on the path from the root to a leaf.
pub(super) struct PathEntry {
    pub(super) page_id: PageId,
    pub(super) node: BranchNode,
    /// Index of the child the path continues through.
    pub(super) index: usize,
}

fn descend<R: PageReader + ?Sized>(
    tx: &R,
    state: &TreeState,
    key: &[u8],
) -> Result<(Vec<PathEntry>, PageId, LeafNode), EngineError> {
    let mut path = Vec::with_capacity(state.depth as usize);
    let mut page_id = state.root_page;

    loop {
        match read_node(tx, page_id)? {
            Node::Branch(node) => {
                if path.len() + 1 >= state.depth as usize {
                    return Err(EngineError::corrupt_page(
                        page_id,
                        format!("branch below the recorded depth {}", state.depth),
                    ));
                }
                let index = node.find_child_index(key);
                let child = node.children[index];
                path.push(PathEntry {
                    page_id,
                    node,
                    index,
                });
                page_id = child;
            }
            Node::Leaf(leaf) => {
                if path.len() + 1 != state.depth as usize {
                    return Err(EngineError::corrupt_page(
                        page_id,
                        format!(
                            "leaf at depth {}, tree depth is {}",
                            path.len() + 1,
                            state.depth
                        ),
                    ));
                }
                return Ok((path, page_id, leaf));
            }
        }
    }
}

/// Find the stored value for `key`.
pub(crate) fn lookup<R: PageReader + ?Sized>(
    tx: &R,
    state: &TreeState,
    key: &[u8],
) -> Result<Option<LeafValue>, EngineError> {
    let (_, _, leaf) = descend(tx, state, key)?;
    Ok(leaf.get(key).map(|entry| entry.value.clone()))
}

/// Insert or overwrite `key`.
pub(crate) fn insert(
    tx: &mut WriteTransaction,
    state: &mut TreeState,
    key: &[u8],
    value: &[u8],
) -> Result<(), EngineError> {
    let (path, leaf_id, mut leaf) = descend(tx, state, key)?;

    match leaf.find_index(key) {
        Ok(i) => {
            let previous = leaf.entries[i].value.overflow();
            let used = leaf.content_size() - leaf.entries[i].encoded_size();
            leaf.entries[i].value = store_value(tx, state, previous, key.len(), value, used)?;
        }
        Err(i) => {
            let used = leaf.content_size();
            let stored = store_value(tx, state, None, key.len(), value, used)?;
            leaf.entries.insert(
                i,
                LeafEntry {
                    key: key.to_vec(),
                    value: stored,
                },
            );
            state.entry_count += 1;
        }
    }

    write_back(tx, state, path, leaf_id, Node::Leaf(leaf))
}

/// Remove `key`, returning whether it was present.
pub(crate) fn remove(
    tx: &mut WriteTransaction,
    state: &mut TreeState,
    key: &[u8],
) -> Result<bool, EngineError> {
    let (path, leaf_id, mut leaf) = descend(tx, state, key)?;
    let Ok(i) = leaf.find_index(key) else {
        return Ok(false);
    };

    let entry = leaf.entries.remove(i);
    if let Some(previous) = entry.value.overflow() {
        release_overflow(tx, state, previous);
    }
    state.entry_count -= 1;

    write_back(tx, state, path, leaf_id, Node::Leaf(leaf))?;
    Ok(true)
}

/// Store `value` for a key of `key_len` bytes in a leaf whose other entries
/// use `used` bytes, replacing the overflow run `previous` if any.
fn store_value(
    tx: &mut WriteTransaction,
    state: &mut TreeState,
    previous: Option<OverflowRef>,
    key_len: usize,
    value: &[u8],
    used: usize,
) -> Result<LeafValue, EngineError> {
    let page_size = tx.page_size();
    if stays_inline(page_size, key_len, value.len(), used) {
        if let Some(previous) = previous {
            release_overflow(tx, state, previous);
        }
        return Ok(LeafValue::Inline(value.to_vec()));
    }

    let previous_pages =
        previous.map_or(0, |p| overflow::run_length(p.total_length as usize, page_size));
    let stored = overflow::write_run(tx, previous, value)?;
    state.overflow_pages =
        state.overflow_pages - previous_pages + overflow::run_length(value.len(), page_size);
    Ok(LeafValue::Overflow(stored))
}

fn release_overflow(tx: &mut WriteTransaction, state: &mut TreeState, previous: OverflowRef) {
    overflow::free_run(tx, previous);
    state.overflow_pages -= overflow::run_length(previous.total_length as usize, tx.page_size());
}

/// Write a modified node and its ancestors back, bottom-up.
fn write_back(
    tx: &mut WriteTransaction,
    state: &mut TreeState,
    mut path: Vec<PathEntry>,
    page_id: PageId,
    node: Node,
) -> Result<(), EngineError> {
    let page_size = tx.page_size();
    let threshold = tx.fill_threshold();
    let mut current_id = Some(page_id);
    let mut current = node;

    loop {
        let Some(mut parent) = path.pop() else {
            return finish_root(tx, state, current_id, current);
        };

        let index = parent.index;
        if !current.fits(page_size) {
            let (first, rest) = current.split(page_size);
            parent.node.children[index] = tx.write_node(current_id, &first)?;
            state.add_node_pages(&first, rest.len() as u64);
            tracing::trace!(
                "split page {:?} into {} parts under {}",
                current_id,
                rest.len() + 1,
                parent.page_id
            );
            for (offset, (separator, part)) in rest.into_iter().enumerate() {
                let part_id = tx.write_node(None, &part)?;
                parent.node.insert_child(index + offset, separator, part_id);
            }
        } else if current.is_underfilled(threshold) {
            rebalance::rebalance(tx, state, &mut parent.node, index, current_id, current)?;
        } else {
            parent.node.children[index] = tx.write_node(current_id, &current)?;
        }

        current_id = Some(parent.page_id);
        current = Node::Branch(parent.node);
    }
}

/// Write the root, growing or shrinking the tree by one level when needed.
fn finish_root(
    tx: &mut WriteTransaction,
    state: &mut TreeState,
    mut root_id: Option<PageId>,
    mut root: Node,
) -> Result<(), EngineError> {
    let page_size = tx.page_size();

    while !root.fits(page_size) {
        let (first, rest) = root.split(page_size);
        let mut new_root = BranchNode {
            keys: Vec::with_capacity(rest.len()),
            children: vec![tx.write_node(root_id, &first)?],
        };
        state.add_node_pages(&first, rest.len() as u64);
        for (separator, part) in rest {
            new_root.keys.push(separator);
            new_root.children.push(tx.write_node(None, &part)?);
        }
        state.branch_pages += 1;
        state.depth += 1;
        tracing::trace!(
            "root split into {} children, depth now {}",
            new_root.children.len(),
            state.depth
        );
        root_id = None;
        root = Node::Branch(new_root);
    }

    if let Node::Branch(branch) = &root
        && branch.children.len() == 1
    {
        if let Some(id) = root_id {
            tx.free_page(id);
        }
        state.root_page = branch.children[0];
        state.branch_pages -= 1;
        state.depth -= 1;
        tracing::trace!(
            "root collapsed into page {}, depth now {}",
            state.root_page,
            state.depth
        );
        return Ok(());
    }

    state.root_page = tx.write_node(root_id, &root)?;
    Ok(())
}

/// Free every page owned by a tree.
pub(crate) fn free_tree(
    tx: &mut WriteTransaction,
    state: &TreeState,
) -> Result<(), EngineError> {
    let mut stack = vec![state.root_page];
    while let Some(page_id) = stack.pop() {
        match read_node(tx, page_id)? {
            Node::Branch(branch) => stack.extend(branch.children),
            Node::Leaf(leaf) => {
                for entry in leaf.entries {
                    if let Some(run) = entry.value.overflow() {
                        overflow::free_run(tx, run);
                    }
                }
            }
        }
        tx.free_page(page_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_state_roundtrip() {
        let state = TreeState {
            root_page: 77,
            depth: 3,
            branch_pages: 4,
            leaf_pages: 40,
            overflow_pages: 9,
            entry_count: 1234,
        };
        let restored = TreeState::from_bytes(&state.to_bytes()).expect("decode");
        assert_eq!(restored, state);
        assert_eq!(restored.page_count(), 53);
    }

    #[test]
    fn test_tree_state_rejects_garbage() {
        assert!(TreeState::from_bytes(&[0u8; 47]).is_none());
        assert!(TreeState::from_bytes(&[0u8; 48]).is_none());
        assert_eq!(TreeState::new(5).page_count(), 1);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key(b"k", 4096).is_ok());
        assert!(matches!(
            validate_key(b"", 4096),
            Err(EngineError::InvalidArgument(_))
        ));
        let long = vec![b'x'; max_key_size(4096) + 1];
        assert!(matches!(
            validate_key(&long, 4096),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(validate_key(&long[1..], 4096).is_ok());
    }
}

//! Ordered cursor over a tree.
//!
//! Leaves carry no sibling links, so the cursor keeps the branch path from
//! the root to the current leaf. Stepping off either end of a leaf walks up
//! the path to the nearest ancestor with a child on that side and back down
//! to the adjacent leaf.

use std::cmp::Ordering;

use crate::storage::btree::node::{BranchNode, LeafNode, Node};
use crate::storage::btree::tree::{TreeState, read_node, resolve_value};
use crate::storage::error::EngineError;
use crate::storage::page::PageId;
use crate::storage::slice::SeekTarget;
use crate::storage::transaction::PageReader;

/// Direction of a step between leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Cursor over the entries of one tree, in key order.
///
/// The cursor reads the snapshot of the transaction it was created from and
/// borrows it, so it cannot outlive the transaction. It is unpositioned until
/// a successful [`seek`](Self::seek).
pub struct TreeIterator<'t, R: PageReader + ?Sized> {
    tx: &'t R,
    state: TreeState,
    /// Branches from the root down to the current leaf, with the index of
    /// the child taken at each level.
    path: Vec<(BranchNode, usize)>,
    leaf: Option<LeafNode>,
    index: usize,
}

impl<'t, R: PageReader + ?Sized> TreeIterator<'t, R> {
    pub(crate) const fn new(tx: &'t R, state: TreeState) -> Self {
        Self {
            tx,
            state,
            path: Vec::new(),
            leaf: None,
            index: 0,
        }
    }

    /// Position the cursor at the first entry whose key is at least `target`.
    ///
    /// `BeforeAllKeys` lands on the first entry and `AfterAllKeys` on the
    /// last one. Returns whether the cursor is now on an entry.
    pub fn seek<'k>(&mut self, target: impl Into<SeekTarget<'k>>) -> Result<bool, EngineError> {
        let target = target.into();
        self.path.clear();
        self.leaf = None;

        let mut page_id = self.state.root_page;
        let leaf = loop {
            match self.read(page_id)? {
                Node::Branch(branch) => {
                    let index = match target {
                        SeekTarget::BeforeAllKeys => 0,
                        SeekTarget::Key(key) => branch.find_child_index(key),
                        SeekTarget::AfterAllKeys => branch.children.len() - 1,
                    };
                    page_id = branch.children[index];
                    self.path.push((branch, index));
                }
                Node::Leaf(leaf) => break leaf,
            }
        };

        // First entry at or after the target, or the last entry for `AfterAllKeys`.
        let index = match target {
            SeekTarget::AfterAllKeys => leaf.entries.len().saturating_sub(1),
            _ => leaf
                .entries
                .partition_point(|e| target.compare_key(&e.key) == Ordering::Greater),
        };

        if index < leaf.entries.len() {
            self.leaf = Some(leaf);
            self.index = index;
            return Ok(true);
        }
        // Every key in this leaf is below the target; the answer, if any,
        // is the first entry of the next leaf.
        self.step_leaf(Direction::Forward)
    }

    /// Advance to the next key. Returns `false` once past the last entry.
    pub fn move_next(&mut self) -> Result<bool, EngineError> {
        let Some(leaf) = &self.leaf else {
            return Ok(false);
        };
        if self.index + 1 < leaf.entries.len() {
            self.index += 1;
            return Ok(true);
        }
        self.step_leaf(Direction::Forward)
    }

    /// Step back to the previous key. Returns `false` once before the first entry.
    pub fn move_previous(&mut self) -> Result<bool, EngineError> {
        if self.leaf.is_none() {
            return Ok(false);
        }
        if self.index > 0 {
            self.index -= 1;
            return Ok(true);
        }
        self.step_leaf(Direction::Backward)
    }

    /// Key at the cursor, or `None` when unpositioned.
    #[must_use]
    pub fn current_key(&self) -> Option<&[u8]> {
        self.leaf
            .as_ref()
            .and_then(|leaf| leaf.entries.get(self.index))
            .map(|entry| entry.key.as_slice())
    }

    /// Value at the cursor, reading its overflow run if it has one.
    pub fn current_value(&self) -> Result<Vec<u8>, EngineError> {
        let entry = self
            .leaf
            .as_ref()
            .and_then(|leaf| leaf.entries.get(self.index))
            .ok_or(EngineError::KeyNotFound)?;
        resolve_value(self.tx, entry.value.clone())
    }

    /// Move to the nearest non-empty leaf in `direction`, landing on its
    /// first or last entry. Unpositions the cursor at either end of the tree.
    fn step_leaf(&mut self, direction: Direction) -> Result<bool, EngineError> {
        loop {
            let Some(page_id) = self.next_leaf_page(direction) else {
                self.leaf = None;
                return Ok(false);
            };
            let leaf = self.descend_edge(page_id, direction)?;
            if leaf.entries.is_empty() {
                continue;
            }
            self.index = match direction {
                Direction::Forward => 0,
                Direction::Backward => leaf.entries.len() - 1,
            };
            self.leaf = Some(leaf);
            return Ok(true);
        }
    }

    /// Pop up to the nearest ancestor with a child in `direction`, move to
    /// that child and return its page.
    fn next_leaf_page(&mut self, direction: Direction) -> Option<PageId> {
        while let Some((branch, index)) = self.path.last_mut() {
            let next = match direction {
                Direction::Forward => (*index + 1 < branch.children.len()).then(|| *index + 1),
                Direction::Backward => index.checked_sub(1),
            };
            if let Some(next) = next {
                *index = next;
                return Some(branch.children[next]);
            }
            self.path.pop();
        }
        None
    }

    /// Descend from `page_id` along the leftmost (forward) or rightmost
    /// (backward) children to a leaf.
    fn descend_edge(
        &mut self,
        mut page_id: PageId,
        direction: Direction,
    ) -> Result<LeafNode, EngineError> {
        loop {
            match self.read(page_id)? {
                Node::Branch(branch) => {
                    let index = match direction {
                        Direction::Forward => 0,
                        Direction::Backward => branch.children.len() - 1,
                    };
                    page_id = branch.children[index];
                    self.path.push((branch, index));
                }
                Node::Leaf(leaf) => return Ok(leaf),
            }
        }
    }

    fn read(&self, page_id: PageId) -> Result<Node, EngineError> {
        if self.path.len() >= self.state.depth as usize {
            return Err(EngineError::corrupt_page(
                page_id,
                format!("iterator passed the recorded depth {}", self.state.depth),
            ));
        }
        read_node(self.tx, page_id)
    }
}

impl<R: PageReader + ?Sized> std::fmt::Debug for TreeIterator<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeIterator")
            .field("root_page", &self.state.root_page)
            .field("depth", &self.path.len())
            .field("key", &self.current_key())
            .finish_non_exhaustive()
    }
}

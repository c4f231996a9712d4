//! Restoring minimum fill after a node shrinks.
//!
//! An underfilled node first borrows entries from its left sibling, then from
//! its right sibling, until it reaches the fill threshold. A donor never drops
//! below the threshold unless the recipient would otherwise be left without
//! entries. Only when neither sibling can spare an entry is the node merged
//! into a sibling that has room, freeing the right page of the pair.
//!
//! Entries larger than the threshold can leave a node underfilled when
//! neither a merge nor a borrow is possible. A non-root leaf is never left
//! empty and a branch never keeps fewer than two children: an empty leaf or
//! a single-child branch always merges or borrows.

use crate::storage::btree::node::{
    BRANCH_ENTRY_HEADER, BranchNode, FIRST_CHILD_SIZE, Node, usable_space,
};
use crate::storage::btree::tree::{TreeState, read_node};
use crate::storage::error::EngineError;
use crate::storage::page::PageId;
use crate::storage::transaction::{PageReader, WriteTransaction};

/// Which side of the underfilled node the sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    /// Parent child index of the sibling of child `index`.
    const fn sibling_index(self, index: usize) -> usize {
        match self {
            Self::Left => index - 1,
            Self::Right => index + 1,
        }
    }

    /// Parent key index of the separator between child `index` and its sibling.
    const fn separator_index(self, index: usize) -> usize {
        match self {
            Self::Left => index - 1,
            Self::Right => index,
        }
    }
}

/// Rebalance `node`, child `index` of `parent`, against its siblings.
///
/// Writes the surviving pages and updates `parent` in memory; the caller
/// writes `parent` back.
pub(super) fn rebalance(
    tx: &mut WriteTransaction,
    state: &mut TreeState,
    parent: &mut BranchNode,
    index: usize,
    page_id: Option<PageId>,
    mut node: Node,
) -> Result<(), EngineError> {
    let mut sides = Vec::with_capacity(2);
    if index > 0 {
        sides.push(Side::Left);
    }
    if index + 1 < parent.children.len() {
        sides.push(Side::Right);
    }

    let usable = usable_space(tx.page_size());
    let threshold = tx.fill_threshold();
    let mut siblings = Vec::with_capacity(sides.len());

    for side in sides {
        let sibling_index = side.sibling_index(index);
        let key_index = side.separator_index(index);
        let sibling_id = parent.children[sibling_index];
        let mut sibling = read_node(tx, sibling_id)?;
        if std::mem::discriminant(&sibling) != std::mem::discriminant(&node) {
            return Err(EngineError::corrupt_page(
                sibling_id,
                "sibling is not at the same level",
            ));
        }

        let mut separator = parent.keys[key_index].clone();
        let moved = borrow(&mut node, &mut sibling, &mut separator, side, threshold, usable);
        if moved > 0 {
            parent.children[index] = tx.write_node(page_id, &node)?;
            parent.children[sibling_index] = tx.write_node(Some(sibling_id), &sibling)?;
            parent.keys[key_index] = separator;
            tracing::trace!("moved {moved} entries from page {sibling_id} to {:?}", page_id);
            return Ok(());
        }
        siblings.push((side, sibling_id, sibling));
    }

    for (side, sibling_id, sibling) in siblings {
        let key_index = side.separator_index(index);
        let separator = &parent.keys[key_index];
        if merged_size(&node, &sibling, separator) > usable {
            continue;
        }

        let separator = parent.keys.remove(key_index);
        let (mut left, left_id, right, right_id) = match side {
            Side::Left => (sibling, Some(sibling_id), node, page_id),
            Side::Right => (node, page_id, sibling, Some(sibling_id)),
        };
        state.remove_node_page(&right);
        merge(&mut left, right, separator);
        if let Some(id) = right_id {
            tx.free_page(id);
        }
        parent.children.remove(key_index + 1);
        parent.children[key_index] = tx.write_node(left_id, &left)?;
        tracing::trace!(
            "merged page {:?} into {:?}, parent now has {} children",
            right_id,
            left_id,
            parent.children.len()
        );
        return Ok(());
    }

    parent.children[index] = tx.write_node(page_id, &node)?;
    Ok(())
}

/// Content size of `a` and `b` merged into one node.
fn merged_size(a: &Node, b: &Node, separator: &[u8]) -> usize {
    match (a, b) {
        (Node::Branch(_), Node::Branch(_)) => {
            a.content_size() + b.content_size() - FIRST_CHILD_SIZE
                + BRANCH_ENTRY_HEADER
                + separator.len()
        }
        _ => a.content_size() + b.content_size(),
    }
}

/// Append `right` to `left`. Branches pull the parent separator down.
fn merge(left: &mut Node, right: Node, separator: Vec<u8>) {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => left.entries.extend(right.entries),
        (Node::Branch(left), Node::Branch(right)) => {
            left.keys.push(separator);
            left.keys.extend(right.keys);
            left.children.extend(right.children);
        }
        _ => {}
    }
}

/// Whether a node is missing the entries every non-root node must have.
fn is_deficient(node: &Node) -> bool {
    match node {
        Node::Leaf(leaf) => leaf.entries.is_empty(),
        Node::Branch(branch) => branch.children.len() < 2,
    }
}

/// Whether `donor` can give up one entry and stay structurally valid.
fn can_donate(donor: &Node) -> bool {
    match donor {
        Node::Leaf(leaf) => leaf.entries.len() > 1,
        Node::Branch(branch) => branch.children.len() > 2,
    }
}

/// Bytes the recipient gains and the donor loses when one entry moves.
fn move_cost(donor: &Node, separator: &[u8], donor_side: Side) -> (usize, usize) {
    match donor {
        Node::Leaf(leaf) => {
            let entry = match donor_side {
                Side::Left => leaf.entries.last(),
                Side::Right => leaf.entries.first(),
            };
            let size = entry.map_or(0, |e| e.encoded_size());
            (size, size)
        }
        Node::Branch(branch) => {
            let key = match donor_side {
                Side::Left => branch.keys.last(),
                Side::Right => branch.keys.first(),
            };
            (
                BRANCH_ENTRY_HEADER + separator.len(),
                BRANCH_ENTRY_HEADER + key.map_or(0, Vec::len),
            )
        }
    }
}

/// Move entries from `donor` into `recipient` until it is no longer underfilled.
///
/// `separator` is the parent key between the two nodes and is updated as
/// entries cross it. Returns the number of entries moved.
fn borrow(
    recipient: &mut Node,
    donor: &mut Node,
    separator: &mut Vec<u8>,
    donor_side: Side,
    threshold: usize,
    usable: usize,
) -> usize {
    let mut moved = 0;
    while recipient.is_underfilled(threshold) && can_donate(donor) {
        let (gain, loss) = move_cost(donor, separator, donor_side);
        if recipient.content_size() + gain > usable {
            break;
        }
        if donor.content_size() - loss < threshold && !is_deficient(recipient) {
            break;
        }
        move_one(recipient, donor, separator, donor_side);
        moved += 1;
    }
    moved
}

fn move_one(recipient: &mut Node, donor: &mut Node, separator: &mut Vec<u8>, donor_side: Side) {
    match (recipient, donor, donor_side) {
        (Node::Leaf(recipient), Node::Leaf(donor), Side::Right) => {
            let entry = donor.entries.remove(0);
            recipient.entries.push(entry);
            if let Some(first) = donor.entries.first() {
                separator.clone_from(&first.key);
            }
        }
        (Node::Leaf(recipient), Node::Leaf(donor), Side::Left) => {
            if let Some(entry) = donor.entries.pop() {
                separator.clone_from(&entry.key);
                recipient.entries.insert(0, entry);
            }
        }
        (Node::Branch(recipient), Node::Branch(donor), Side::Right) => {
            recipient.keys.push(std::mem::take(separator));
            recipient.children.push(donor.children.remove(0));
            *separator = donor.keys.remove(0);
        }
        (Node::Branch(recipient), Node::Branch(donor), Side::Left) => {
            if let (Some(key), Some(child)) = (donor.keys.pop(), donor.children.pop()) {
                recipient.keys.insert(0, std::mem::replace(separator, key));
                recipient.children.insert(0, child);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::node::{LeafEntry, LeafNode, LeafValue};

    fn leaf(keys: &[&str], value_len: usize) -> Node {
        Node::Leaf(LeafNode {
            entries: keys
                .iter()
                .map(|k| LeafEntry {
                    key: k.as_bytes().to_vec(),
                    value: LeafValue::Inline(vec![0; value_len]),
                })
                .collect(),
        })
    }

    fn keys(node: &Node) -> Vec<String> {
        match node {
            Node::Leaf(leaf) => leaf
                .entries
                .iter()
                .map(|e| String::from_utf8_lossy(&e.key).into_owned())
                .collect(),
            Node::Branch(branch) => branch
                .keys
                .iter()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .collect(),
        }
    }

    #[test]
    fn test_merge_branches_pulls_separator_down() {
        let mut left = Node::Branch(BranchNode {
            keys: vec![b"b".to_vec()],
            children: vec![1, 2],
        });
        let right = Node::Branch(BranchNode {
            keys: vec![b"f".to_vec()],
            children: vec![3, 4],
        });
        let expected = merged_size(&left, &right, b"d");

        merge(&mut left, right, b"d".to_vec());
        assert_eq!(keys(&left), vec!["b", "d", "f"]);
        assert_eq!(left.content_size(), expected);
        let Node::Branch(branch) = &left else {
            panic!("expected branch");
        };
        assert_eq!(branch.children, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_borrow_from_right_leaf_updates_separator() {
        let mut recipient = leaf(&["a"], 10);
        let mut donor = leaf(&["m", "n", "o", "p", "q", "r"], 100);
        let mut separator = b"m".to_vec();

        let moved = borrow(&mut recipient, &mut donor, &mut separator, Side::Right, 200, 4072);
        assert_eq!(moved, 2);
        assert_eq!(keys(&recipient), vec!["a", "m", "n"]);
        assert_eq!(keys(&donor), vec!["o", "p", "q", "r"]);
        assert_eq!(separator, b"o".to_vec());
    }

    #[test]
    fn test_borrow_from_left_leaf_updates_separator() {
        let mut recipient = leaf(&["x"], 10);
        let mut donor = leaf(&["a", "b", "c", "d"], 100);
        let mut separator = b"x".to_vec();

        let moved = borrow(&mut recipient, &mut donor, &mut separator, Side::Left, 150, 4072);
        assert_eq!(moved, 2);
        assert_eq!(keys(&recipient), vec!["c", "d", "x"]);
        assert_eq!(separator, b"c".to_vec());
    }

    #[test]
    fn test_borrow_keeps_donor_above_threshold() {
        let mut recipient = leaf(&["a"], 10);
        let mut donor = leaf(&["m", "n"], 100);
        let mut separator = b"m".to_vec();

        // Moving one entry would drop the donor below the threshold.
        let moved = borrow(&mut recipient, &mut donor, &mut separator, Side::Right, 200, 4072);
        assert_eq!(moved, 0);
        assert_eq!(separator, b"m".to_vec());
    }

    #[test]
    fn test_branch_rotation_through_parent() {
        let mut recipient = Node::Branch(BranchNode {
            keys: vec![],
            children: vec![10],
        });
        let mut donor = Node::Branch(BranchNode {
            keys: vec![b"p".to_vec(), b"t".to_vec(), b"w".to_vec()],
            children: vec![20, 30, 40, 50],
        });
        let mut separator = b"m".to_vec();

        let moved = borrow(&mut recipient, &mut donor, &mut separator, Side::Right, 30, 4072);
        assert!(moved >= 1);
        let (Node::Branch(recipient), Node::Branch(donor)) = (&recipient, &donor) else {
            panic!("expected branches");
        };
        assert_eq!(recipient.keys[0], b"m".to_vec());
        assert_eq!(recipient.children[..2], [10, 20]);
        assert_eq!(recipient.children.len(), recipient.keys.len() + 1);
        assert_eq!(donor.children.len(), donor.keys.len() + 1);
        assert!(donor.children.len() >= 2);
        assert!(recipient.keys.last().is_some_and(|k| *k < separator));
        assert!(donor.keys.first().is_none_or(|k| *k > separator));
    }
}

//! Structural checks over a whole tree.

use crate::storage::btree::node::Node;
use crate::storage::btree::tree::{TreeState, read_node};
use crate::storage::error::EngineError;
use crate::storage::overflow;
use crate::storage::page::PageId;
use crate::storage::transaction::PageReader;

/// A page waiting to be checked, with the key range its parent allows.
struct Pending {
    page_id: PageId,
    depth: u32,
    /// Inclusive lower bound.
    lower: Option<Vec<u8>>,
    /// Exclusive upper bound.
    upper: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Counts {
    branch_pages: u64,
    leaf_pages: u64,
    overflow_pages: u64,
    entries: u64,
}

/// Walk every page of the tree and check that:
///
/// - keys are strictly increasing within each node and lie inside the range
///   the parent separators allow
/// - every leaf sits at the recorded depth and only the root leaf is empty
/// - child pages are inside the file
/// - overflow runs decode and match their checksums
/// - page and entry counts match the recorded tree state
pub(crate) fn verify_tree<R: PageReader + ?Sized>(
    tx: &R,
    state: &TreeState,
) -> Result<(), EngineError> {
    let total_pages = tx.total_pages();
    let mut counts = Counts::default();
    let mut stack = vec![Pending {
        page_id: state.root_page,
        depth: 1,
        lower: None,
        upper: None,
    }];

    while let Some(pending) = stack.pop() {
        let page_id = pending.page_id;
        if page_id >= total_pages {
            return Err(EngineError::corrupt_page(
                page_id,
                format!("child page beyond the end of the file ({total_pages} pages)"),
            ));
        }

        let node = read_node(tx, page_id)?;
        let keys: Vec<&[u8]> = match &node {
            Node::Leaf(leaf) => leaf.entries.iter().map(|e| e.key.as_slice()).collect(),
            Node::Branch(branch) => branch.keys.iter().map(Vec::as_slice).collect(),
        };
        check_order(page_id, &keys, pending.lower.as_deref(), pending.upper.as_deref())?;

        match node {
            Node::Branch(branch) => {
                if pending.depth >= state.depth {
                    return Err(EngineError::corrupt_page(
                        page_id,
                        format!("branch at depth {}, tree depth is {}", pending.depth, state.depth),
                    ));
                }
                counts.branch_pages += 1;

                for (i, &child) in branch.children.iter().enumerate() {
                    let lower = if i == 0 {
                        pending.lower.clone()
                    } else {
                        Some(branch.keys[i - 1].clone())
                    };
                    let upper = branch
                        .keys
                        .get(i)
                        .cloned()
                        .or_else(|| pending.upper.clone());
                    stack.push(Pending {
                        page_id: child,
                        depth: pending.depth + 1,
                        lower,
                        upper,
                    });
                }
            }
            Node::Leaf(leaf) => {
                if pending.depth != state.depth {
                    return Err(EngineError::corrupt_page(
                        page_id,
                        format!("leaf at depth {}, tree depth is {}", pending.depth, state.depth),
                    ));
                }
                if leaf.entries.is_empty() && page_id != state.root_page {
                    return Err(EngineError::corrupt_page(page_id, "empty non-root leaf"));
                }
                counts.leaf_pages += 1;
                counts.entries += leaf.entries.len() as u64;

                for entry in &leaf.entries {
                    if let Some(run) = entry.value.overflow() {
                        overflow::read_run(tx, run)?;
                        counts.overflow_pages +=
                            overflow::run_length(run.total_length as usize, tx.page_size());
                    }
                }
            }
        }
    }

    let recorded = (
        state.branch_pages,
        state.leaf_pages,
        state.overflow_pages,
        state.entry_count,
    );
    let walked = (
        counts.branch_pages,
        counts.leaf_pages,
        counts.overflow_pages,
        counts.entries,
    );
    if recorded != walked {
        return Err(EngineError::Corruption(format!(
            "tree rooted at page {} records {recorded:?} (branch, leaf, overflow, entries) \
             but the walk found {walked:?}",
            state.root_page
        )));
    }
    Ok(())
}

fn check_order(
    page_id: PageId,
    keys: &[&[u8]],
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
) -> Result<(), EngineError> {
    if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(EngineError::corrupt_page(page_id, "keys out of order"));
    }
    if let (Some(lower), Some(first)) = (lower, keys.first())
        && *first < lower
    {
        return Err(EngineError::corrupt_page(
            page_id,
            "key below the parent separator",
        ));
    }
    if let (Some(upper), Some(last)) = (upper, keys.last())
        && *last >= upper
    {
        return Err(EngineError::corrupt_page(
            page_id,
            "key at or above the parent separator",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<'a>(keys: &[&'a str]) -> Vec<&'a [u8]> {
        keys.iter().map(|k| k.as_bytes()).collect()
    }

    #[test]
    fn test_check_order_accepts_sorted_keys_in_range() {
        assert!(check_order(1, &keys(&["a", "b", "c"]), None, None).is_ok());
        assert!(check_order(1, &keys(&["b", "c"]), Some(&b"b"[..]), Some(&b"d"[..])).is_ok());
        assert!(check_order(1, &[], Some(&b"b"[..]), Some(&b"d"[..])).is_ok());
    }

    #[test]
    fn test_check_order_rejects_violations() {
        let cases: [(Vec<&[u8]>, Option<&[u8]>, Option<&[u8]>); 4] = [
            (keys(&["b", "a"]), None, None),
            (keys(&["a", "a"]), None, None),
            (keys(&["a"]), Some(&b"b"[..]), None),
            (keys(&["d"]), None, Some(&b"d"[..])),
        ];
        for (keys, lower, upper) in cases {
            assert!(matches!(
                check_order(9, &keys, lower, upper),
                Err(EngineError::Corruption(_))
            ));
        }
    }
}

//! B-tree node types and serialization.
//!
//! Nodes are decoded from pages into owned structures, mutated, and encoded
//! back into freshly sealed pages. Two node kinds exist:
//! - Branch nodes: separator keys and child page pointers
//! - Leaf nodes: key/value entries, with large values pushed to overflow runs
//!
//! # Branch layout (after the page header)
//!
//! ```text
//! first_child: u64
//! repeated: key_len: u16, child: u64, key: [u8; key_len]
//! ```
//!
//! `children[i]` holds keys `< keys[i]`, `children[i + 1]` holds keys `>= keys[i]`.
//!
//! # Leaf layout (after the page header)
//!
//! ```text
//! repeated: key_len: u16, flags: u8, value_len: u32, key, (value | first_overflow_page: u64)
//! ```

// Entry counts and lengths are bounded by the page size, which fits in u16/u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{Page, PageError, PageHeader, PageId, PageType};

/// Fixed bytes per leaf entry before the key.
pub const LEAF_ENTRY_HEADER: usize = 7;

/// Fixed bytes per branch separator before the key.
pub const BRANCH_ENTRY_HEADER: usize = 10;

/// Bytes used by the leftmost child pointer of a branch.
pub(super) const FIRST_CHILD_SIZE: usize = 8;

/// Leaf entry flag: value is stored inline.
const FLAG_INLINE: u8 = 0;

/// Leaf entry flag: value lives in an overflow run.
const FLAG_OVERFLOW: u8 = 1;

/// Bytes available for node content on a page.
#[must_use]
pub const fn usable_space(page_size: usize) -> usize {
    page_size - PageHeader::SIZE
}

/// Largest key accepted by a tree.
///
/// Separators are limited to a quarter of the usable space, so a branch of
/// maximum-size keys still holds at least three of them.
#[must_use]
pub const fn max_key_size(page_size: usize) -> usize {
    usable_space(page_size) / 4 - BRANCH_ENTRY_HEADER
}

/// Largest value stored inline next to a key of `key_len` bytes.
///
/// A value this size fills an empty leaf exactly; one byte more goes to an
/// overflow run.
#[must_use]
pub const fn max_inline_value_size(page_size: usize, key_len: usize) -> usize {
    usable_space(page_size).saturating_sub(LEAF_ENTRY_HEADER + key_len)
}

/// Whether a value is stored inline in a leaf whose other entries use `used` bytes.
///
/// An entry that fits the leaf's remaining space is inline, including one
/// that fills it exactly. Entries of up to a quarter of the usable space stay
/// inline regardless and split the leaf instead of moving to an overflow run.
#[must_use]
pub const fn stays_inline(page_size: usize, key_len: usize, value_len: usize, used: usize) -> bool {
    let usable = usable_space(page_size);
    let entry = LEAF_ENTRY_HEADER + key_len + value_len;
    entry + used <= usable || entry <= usable / 4
}

/// Reference from a leaf entry to an overflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowRef {
    /// First page of the contiguous run.
    pub first_page: PageId,
    /// Length of the stored value in bytes.
    pub total_length: u32,
}

/// A value as stored in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafValue {
    Inline(Vec<u8>),
    Overflow(OverflowRef),
}

impl LeafValue {
    /// Length of the user value.
    #[must_use]
    pub fn value_len(&self) -> usize {
        match self {
            Self::Inline(bytes) => bytes.len(),
            Self::Overflow(overflow) => overflow.total_length as usize,
        }
    }

    /// Bytes this value occupies inside the leaf.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::Inline(bytes) => bytes.len(),
            Self::Overflow(_) => 8,
        }
    }

    /// The overflow reference, if any.
    #[must_use]
    pub const fn overflow(&self) -> Option<OverflowRef> {
        match self {
            Self::Inline(_) => None,
            Self::Overflow(overflow) => Some(*overflow),
        }
    }
}

/// A key/value entry in a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: LeafValue,
}

impl LeafEntry {
    /// Encoded size of this entry including its header.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        LEAF_ENTRY_HEADER + self.key.len() + self.value.encoded_len()
    }
}

/// A leaf B-tree node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafNode {
    /// Entries in sorted order by key.
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    /// Bytes used by all entries.
    #[must_use]
    pub fn content_size(&self) -> usize {
        self.entries.iter().map(LeafEntry::encoded_size).sum()
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.key.as_slice().cmp(key))
    }

    /// Get an entry by key.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&LeafEntry> {
        self.find_index(key).ok().map(|i| &self.entries[i])
    }

    fn decode(page: &Page, count: usize) -> Result<Self, NodeError> {
        let mut reader = Reader::new(page);
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let key_len = reader.u16()? as usize;
            let flags = reader.u8()?;
            let value_len = reader.u32()?;
            let key = reader.bytes(key_len)?.to_vec();
            let value = match flags {
                FLAG_INLINE => LeafValue::Inline(reader.bytes(value_len as usize)?.to_vec()),
                FLAG_OVERFLOW => LeafValue::Overflow(OverflowRef {
                    first_page: reader.u64()?,
                    total_length: value_len,
                }),
                other => return Err(NodeError::InvalidEntryFlags(other)),
            };
            entries.push(LeafEntry { key, value });
        }

        Ok(Self { entries })
    }

    fn encode_into(&self, page: &mut Page) {
        let mut offset = PageHeader::SIZE;
        for entry in &self.entries {
            page.write_u16(offset, entry.key.len() as u16);
            let value_len = entry.value.value_len() as u32;
            match &entry.value {
                LeafValue::Inline(_) => page.write_u8(offset + 2, FLAG_INLINE),
                LeafValue::Overflow(_) => page.write_u8(offset + 2, FLAG_OVERFLOW),
            }
            page.write_u32(offset + 3, value_len);
            offset += LEAF_ENTRY_HEADER;

            page.write_bytes(offset, &entry.key);
            offset += entry.key.len();

            match &entry.value {
                LeafValue::Inline(bytes) => page.write_bytes(offset, bytes),
                LeafValue::Overflow(overflow) => page.write_u64(offset, overflow.first_page),
            }
            offset += entry.value.encoded_len();
        }
    }

    /// Split an overfull leaf into pages that each fit `usable` bytes.
    ///
    /// Prefers the most balanced two-way split. When no two-way split fits,
    /// which happens only with entries larger than a third of a page, entries
    /// are packed greedily into as many parts as needed.
    fn split(self, usable: usize) -> Vec<Self> {
        let sizes: Vec<usize> = self.entries.iter().map(LeafEntry::encoded_size).collect();
        let total: usize = sizes.iter().sum();

        let mut best: Option<(usize, usize)> = None;
        let mut left = 0;
        for (i, size) in sizes.iter().enumerate().take(sizes.len().saturating_sub(1)) {
            left += size;
            let right = total - left;
            if left <= usable && right <= usable {
                let imbalance = left.abs_diff(right);
                if best.is_none_or(|(_, b)| imbalance < b) {
                    best = Some((i + 1, imbalance));
                }
            }
        }

        let mut entries = self.entries;
        if let Some((at, _)) = best {
            let right = entries.split_off(at);
            return vec![Self { entries }, Self { entries: right }];
        }

        let mut parts = Vec::new();
        let mut current = Self::default();
        let mut current_size = 0;
        for (entry, size) in entries.into_iter().zip(sizes) {
            if !current.entries.is_empty() && current_size + size > usable {
                parts.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current_size += size;
            current.entries.push(entry);
        }
        parts.push(current);
        parts
    }
}

/// A branch B-tree node.
///
/// Stores N separator keys and N+1 child pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    /// Separator keys in sorted order.
    pub keys: Vec<Vec<u8>>,
    /// Child page pointers. `children.len()` == `keys.len()` + 1
    pub children: Vec<PageId>,
}

impl BranchNode {
    /// Bytes used by the child pointers and separators.
    #[must_use]
    pub fn content_size(&self) -> usize {
        FIRST_CHILD_SIZE
            + self
                .keys
                .iter()
                .map(|k| BRANCH_ENTRY_HEADER + k.len())
                .sum::<usize>()
    }

    /// Find the child index for a given key.
    #[must_use]
    pub fn find_child_index(&self, key: &[u8]) -> usize {
        match self.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,
        }
    }

    /// Insert a separator and the child to its right after child `index`.
    pub fn insert_child(&mut self, index: usize, key: Vec<u8>, right_child: PageId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
    }

    fn decode(page: &Page, count: usize) -> Result<Self, NodeError> {
        let mut reader = Reader::new(page);
        let mut keys = Vec::with_capacity(count);
        let mut children = Vec::with_capacity(count + 1);

        children.push(reader.u64()?);
        for _ in 0..count {
            let key_len = reader.u16()? as usize;
            children.push(reader.u64()?);
            keys.push(reader.bytes(key_len)?.to_vec());
        }

        Ok(Self { keys, children })
    }

    fn encode_into(&self, page: &mut Page) {
        let mut offset = PageHeader::SIZE;
        page.write_u64(offset, self.children[0]);
        offset += FIRST_CHILD_SIZE;

        for (key, child) in self.keys.iter().zip(&self.children[1..]) {
            page.write_u16(offset, key.len() as u16);
            page.write_u64(offset + 2, *child);
            offset += BRANCH_ENTRY_HEADER;
            page.write_bytes(offset, key);
            offset += key.len();
        }
    }

    /// Split at separator `at`, returning the promoted key and the right half.
    fn split_at(&mut self, at: usize) -> (Vec<u8>, Self) {
        let right_keys = self.keys.split_off(at + 1);
        let right_children = self.children.split_off(at + 1);
        let promoted = self.keys.pop().unwrap_or_default();
        (
            promoted,
            Self {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    /// Split an overfull branch around the separator that best balances both halves.
    ///
    /// Halves that still do not fit are split again.
    fn split(self, usable: usize) -> Vec<(Option<Vec<u8>>, Self)> {
        let mut done: Vec<(Option<Vec<u8>>, Self)> = Vec::new();
        let mut pending = vec![(None, self)];

        while let Some((separator, mut node)) = pending.pop() {
            if node.content_size() <= usable || node.keys.len() < 3 {
                done.push((separator, node));
                continue;
            }

            let total = node.content_size();
            let mut best = (1, usize::MAX);
            let mut left = FIRST_CHILD_SIZE;
            for (i, key) in node.keys.iter().enumerate() {
                let entry = BRANCH_ENTRY_HEADER + key.len();
                if i >= 1 && i + 1 < node.keys.len() {
                    let right = total - left - entry + FIRST_CHILD_SIZE;
                    let imbalance = left.abs_diff(right);
                    if imbalance < best.1 {
                        best = (i, imbalance);
                    }
                }
                left += entry;
            }

            let (promoted, right) = node.split_at(best.0);
            // Right half is handled first so `done` ends up in key order after reversal.
            pending.push((separator, node));
            pending.push((Some(promoted), right));
        }

        done.reverse();
        done
    }
}

/// A decoded B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    Branch(BranchNode),
}

impl Node {
    /// An empty leaf, the node of an empty tree.
    #[must_use]
    pub fn empty_leaf() -> Self {
        Self::Leaf(LeafNode::default())
    }

    /// Decode a node page, verifying its checksum and page number.
    pub fn decode(page: &Page, page_id: PageId) -> Result<Self, NodeError> {
        page.verify_checksum()?;
        let header = PageHeader::from_page(page)?;
        if header.page_id != page_id {
            return Err(NodeError::PageIdMismatch {
                expected: page_id,
                actual: header.page_id,
            });
        }

        let count = header.entry_count as usize;
        match header.page_type {
            PageType::Leaf => LeafNode::decode(page, count).map(Self::Leaf),
            PageType::Branch => {
                let branch = BranchNode::decode(page, count)?;
                if branch.keys.is_empty() {
                    return Err(NodeError::EmptyBranch);
                }
                Ok(Self::Branch(branch))
            }
            other => Err(NodeError::UnexpectedPageType(other)),
        }
    }

    /// Encode this node into a sealed page.
    #[must_use]
    pub fn encode(&self, page_id: PageId, page_size: usize) -> Page {
        debug_assert!(self.content_size() <= usable_space(page_size));

        let mut page = Page::new(page_size);
        let (page_type, count) = match self {
            Self::Leaf(leaf) => (PageType::Leaf, leaf.entries.len()),
            Self::Branch(branch) => (PageType::Branch, branch.keys.len()),
        };

        let mut header = PageHeader::new(page_type, page_id);
        header.entry_count = count as u16;
        page.write_bytes(0, &header.to_bytes());

        match self {
            Self::Leaf(leaf) => leaf.encode_into(&mut page),
            Self::Branch(branch) => branch.encode_into(&mut page),
        }
        page.seal();
        page
    }

    /// Bytes of node content (excluding the page header).
    #[must_use]
    pub fn content_size(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.content_size(),
            Self::Branch(branch) => branch.content_size(),
        }
    }

    /// Whether the node fits on one page.
    #[must_use]
    pub fn fits(&self, page_size: usize) -> bool {
        self.content_size() <= usable_space(page_size)
    }

    /// Whether a non-root node is below the fill threshold.
    #[must_use]
    pub fn is_underfilled(&self, threshold: usize) -> bool {
        match self {
            Self::Leaf(leaf) => leaf.entries.is_empty() || leaf.content_size() < threshold,
            Self::Branch(branch) => {
                branch.children.len() < 2 || branch.content_size() < threshold
            }
        }
    }

    /// Split an overfull node into parts that each fit a page.
    ///
    /// Returns the leftmost part and the remaining parts paired with the
    /// separator key that precedes each of them in the parent.
    #[must_use]
    pub fn split(self, page_size: usize) -> (Self, Vec<(Vec<u8>, Self)>) {
        let usable = usable_space(page_size);
        match self {
            Self::Leaf(leaf) => {
                let mut parts = leaf.split(usable).into_iter();
                let first = parts.next().unwrap_or_default();
                let rest = parts
                    .map(|part| {
                        let separator = part
                            .entries
                            .first()
                            .map(|e| e.key.clone())
                            .unwrap_or_default();
                        (separator, Self::Leaf(part))
                    })
                    .collect();
                (Self::Leaf(first), rest)
            }
            Self::Branch(branch) => {
                let mut parts = branch.split(usable).into_iter();
                let first = parts.next().map_or_else(
                    || {
                        Self::Branch(BranchNode {
                            keys: Vec::new(),
                            children: Vec::new(),
                        })
                    },
                    |(_, node)| Self::Branch(node),
                );
                let rest = parts
                    .map(|(separator, node)| (separator.unwrap_or_default(), Self::Branch(node)))
                    .collect();
                (first, rest)
            }
        }
    }
}

/// Bounds-checked little-endian reader over the content area of a page.
struct Reader<'a> {
    page: &'a Page,
    offset: usize,
}

impl<'a> Reader<'a> {
    const fn new(page: &'a Page) -> Self {
        Self {
            page,
            offset: PageHeader::SIZE,
        }
    }

    fn take(&mut self, len: usize) -> Result<usize, NodeError> {
        let start = self.offset;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.page.size())
            .ok_or(NodeError::Truncated { offset: start })?;
        self.offset = end;
        Ok(start)
    }

    fn u8(&mut self) -> Result<u8, NodeError> {
        let at = self.take(1)?;
        Ok(self.page.read_u8(at))
    }

    fn u16(&mut self) -> Result<u16, NodeError> {
        let at = self.take(2)?;
        Ok(self.page.read_u16(at))
    }

    fn u32(&mut self) -> Result<u32, NodeError> {
        let at = self.take(4)?;
        Ok(self.page.read_u32(at))
    }

    fn u64(&mut self) -> Result<u64, NodeError> {
        let at = self.take(8)?;
        Ok(self.page.read_u64(at))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let at = self.take(len)?;
        Ok(self.page.read_bytes(at, len))
    }
}

/// Errors that can occur when decoding B-tree nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Header or checksum problem.
    Page(PageError),
    /// The page is not a branch or leaf.
    UnexpectedPageType(PageType),
    /// The page header names a different page.
    PageIdMismatch { expected: PageId, actual: PageId },
    /// An entry runs past the end of the page.
    Truncated { offset: usize },
    /// Unknown leaf entry flags.
    InvalidEntryFlags(u8),
    /// A branch without separators.
    EmptyBranch,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "{e}"),
            Self::UnexpectedPageType(t) => write!(f, "expected a tree node, found {t:?} page"),
            Self::PageIdMismatch { expected, actual } => {
                write!(f, "page header says {actual}, expected {expected}")
            }
            Self::Truncated { offset } => write!(f, "entry truncated at offset {offset}"),
            Self::InvalidEntryFlags(flags) => write!(f, "invalid entry flags: 0x{flags:02x}"),
            Self::EmptyBranch => write!(f, "branch node has no separators"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PageError> for NodeError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;

    fn inline(key: &str, value: &[u8]) -> LeafEntry {
        LeafEntry {
            key: key.as_bytes().to_vec(),
            value: LeafValue::Inline(value.to_vec()),
        }
    }

    #[test]
    fn test_leaf_node_roundtrip() {
        let node = Node::Leaf(LeafNode {
            entries: vec![
                inline("a", b"value1"),
                LeafEntry {
                    key: b"big".to_vec(),
                    value: LeafValue::Overflow(OverflowRef {
                        first_page: 77,
                        total_length: 10_000,
                    }),
                },
                inline("c", b""),
            ],
        });

        let page = node.encode(9, PAGE_SIZE);
        let restored = Node::decode(&page, 9).expect("should parse");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_branch_node_roundtrip() {
        let node = Node::Branch(BranchNode {
            keys: vec![b"g".to_vec(), b"p".to_vec()],
            children: vec![10, 20, 30],
        });

        let page = node.encode(4, PAGE_SIZE);
        let restored = Node::decode(&page, 4).expect("should parse");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let node = Node::Leaf(LeafNode {
            entries: vec![inline("k", b"v")],
        });
        let mut page = node.encode(3, PAGE_SIZE);

        assert!(matches!(
            Node::decode(&page, 4),
            Err(NodeError::PageIdMismatch {
                expected: 4,
                actual: 3
            })
        ));

        page.write_u8(PageHeader::SIZE + 8, b'X');
        assert!(matches!(
            Node::decode(&page, 3),
            Err(NodeError::Page(PageError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_entry() {
        let mut page = Page::new(512);
        let mut header = PageHeader::new(PageType::Leaf, 1);
        header.entry_count = 1;
        page.write_bytes(0, &header.to_bytes());
        page.write_u16(PageHeader::SIZE, 1000);
        page.seal();

        assert!(matches!(
            Node::decode(&page, 1),
            Err(NodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_branch_find_child() {
        let node = BranchNode {
            keys: vec![b"10".to_vec(), b"20".to_vec(), b"30".to_vec()],
            children: vec![100, 200, 300, 400],
        };

        assert_eq!(node.find_child_index(b"05"), 0);
        // Equal to a separator routes right.
        assert_eq!(node.find_child_index(b"10"), 1);
        assert_eq!(node.find_child_index(b"15"), 1);
        assert_eq!(node.find_child_index(b"35"), 3);
    }

    #[test]
    fn test_inline_limits() {
        assert_eq!(max_inline_value_size(PAGE_SIZE, 1), 4064);
        assert_eq!(max_key_size(PAGE_SIZE), 1008);

        let exact = Node::Leaf(LeafNode {
            entries: vec![inline("a", &vec![7u8; max_inline_value_size(PAGE_SIZE, 1)])],
        });
        assert!(exact.fits(PAGE_SIZE));

        let over = Node::Leaf(LeafNode {
            entries: vec![inline(
                "a",
                &vec![7u8; max_inline_value_size(PAGE_SIZE, 1) + 1],
            )],
        });
        assert!(!over.fits(PAGE_SIZE));
    }

    #[test]
    fn test_inline_depends_on_leaf_fill() {
        let limit = max_inline_value_size(PAGE_SIZE, 1);
        assert!(stays_inline(PAGE_SIZE, 1, limit, 0));
        assert!(!stays_inline(PAGE_SIZE, 1, limit + 1, 0));

        // Exactly filling what is left of a half-full leaf is inline.
        assert!(stays_inline(PAGE_SIZE, 1, limit - 2000, 2000));
        assert!(!stays_inline(PAGE_SIZE, 1, limit - 1999, 2000));

        // Quarter-page entries never overflow, even into a full leaf.
        assert!(stays_inline(PAGE_SIZE, 1, 100, 4072));
        assert!(stays_inline(PAGE_SIZE, 1, 1018 - 8, 4072));
        assert!(!stays_inline(PAGE_SIZE, 1, 1018 - 7, 4072));
    }

    #[test]
    fn test_leaf_split_balanced() {
        let entries: Vec<LeafEntry> = (0..100)
            .map(|i| inline(&format!("{i:>5}"), &[0u8; 60]))
            .collect();
        let node = Node::Leaf(LeafNode { entries });
        assert!(!node.fits(PAGE_SIZE));

        let (first, rest) = node.split(PAGE_SIZE);
        assert_eq!(rest.len(), 1);
        let (separator, right) = &rest[0];
        let (Node::Leaf(left), Node::Leaf(right)) = (&first, right) else {
            panic!("expected leaves");
        };
        assert_eq!(left.entries.len() + right.entries.len(), 100);
        assert!(left.entries.len().abs_diff(right.entries.len()) <= 1);
        assert_eq!(separator, &right.entries[0].key);
        assert!(first.fits(PAGE_SIZE));
    }

    #[test]
    fn test_leaf_split_large_entries_three_way() {
        // Three entries each a little over a third of a page cannot be split in two.
        let size = usable_space(PAGE_SIZE) / 2 + 100 - LEAF_ENTRY_HEADER - 1;
        let node = Node::Leaf(LeafNode {
            entries: vec![inline("a", &vec![1; size]), inline("b", &vec![2; size]), inline("c", &vec![3; size])],
        });

        let (first, rest) = node.split(PAGE_SIZE);
        assert_eq!(rest.len(), 2);
        assert!(first.fits(PAGE_SIZE));
        assert_eq!(rest[0].0, b"b".to_vec());
        assert_eq!(rest[1].0, b"c".to_vec());
    }

    #[test]
    fn test_branch_split_promotes_median() {
        let keys: Vec<Vec<u8>> = (0..200u32).map(|i| format!("{i:>16}").into_bytes()).collect();
        let children: Vec<PageId> = (0..=200).collect();
        let node = Node::Branch(BranchNode {
            keys: keys.clone(),
            children,
        });
        assert!(!node.fits(PAGE_SIZE));

        let (first, rest) = node.split(PAGE_SIZE);
        assert_eq!(rest.len(), 1);
        let (promoted, right) = &rest[0];
        let (Node::Branch(left), Node::Branch(right)) = (&first, right) else {
            panic!("expected branches");
        };

        // Every key survives exactly once: in a half or as the promoted separator.
        assert_eq!(left.keys.len() + right.keys.len() + 1, keys.len());
        assert_eq!(left.children.len(), left.keys.len() + 1);
        assert_eq!(right.children.len(), right.keys.len() + 1);
        assert!(left.keys.last().is_some_and(|k| k < promoted));
        assert!(right.keys.first().is_some_and(|k| k > promoted));
        assert!(first.fits(PAGE_SIZE));
    }

    #[test]
    fn test_underfill_rules() {
        let threshold = 1000;
        assert!(Node::empty_leaf().is_underfilled(threshold));
        assert!(
            Node::Leaf(LeafNode {
                entries: vec![inline("a", &[0; 10])]
            })
            .is_underfilled(threshold)
        );
        assert!(
            !Node::Leaf(LeafNode {
                entries: vec![inline("a", &[0; 1000])]
            })
            .is_underfilled(threshold)
        );
        assert!(
            Node::Branch(BranchNode {
                keys: vec![],
                children: vec![1]
            })
            .is_underfilled(0)
        );
    }
}

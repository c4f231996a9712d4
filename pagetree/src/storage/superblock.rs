//! Superblock structure and serialization.
//!
//! Two superblock slots occupy pages 0 and 1. Each commit writes the slot
//! `txn_id % 2`, leaving the previous commit's slot intact; on open the valid
//! slot with the highest transaction id wins. Each slot carries its own CRC32,
//! so a torn superblock write falls back to the previous commit.

// Page sizes are bounded by MAX_PAGE_SIZE and fit in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::btree::TreeState;
use crate::storage::page::{Page, PageId};

/// Magic number identifying a pagetree file: "PAGETREE"
pub const MAGIC: [u8; 8] = *b"PAGETREE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Number of superblock slots at the start of the file.
pub const SUPERBLOCK_SLOTS: u64 = 2;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const TXN_ID: usize = 16;
    pub const TOTAL_PAGES: usize = 24;
    pub const FREE_LIST_HEAD: usize = 32;
    pub const FREE_LIST_PAGES: usize = 40;
    pub const FREE_PAGE_COUNT: usize = 48;
    pub const ROOT_CATALOG: usize = 56;
    pub const CHECKSUM: usize = 104;
    // 108..page_size: reserved
}

/// Metadata describing one committed state of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// Page size in bytes, fixed at creation.
    pub page_size: u32,
    /// Id of the commit that wrote this superblock.
    pub txn_id: u64,
    /// Pages in use or on the free list, including both superblock slots.
    pub total_pages: u64,
    /// First page of the persisted free list chain (0 if none).
    pub free_list_head: PageId,
    /// Number of pages in the free list chain.
    pub free_list_pages: u64,
    /// Number of page ids recorded in the chain.
    pub free_page_count: u64,
    /// State of the tree that maps tree names to tree states.
    pub root_catalog: TreeState,
}

impl Superblock {
    /// Slot a commit with this id writes to.
    #[must_use]
    pub const fn slot_for(txn_id: u64) -> PageId {
        txn_id % SUPERBLOCK_SLOTS
    }

    /// Serialize the superblock to a page.
    #[must_use]
    pub fn to_page(&self, page_size: usize) -> Page {
        let mut page = Page::new(page_size);

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, FORMAT_VERSION);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u64(offsets::TXN_ID, self.txn_id);
        page.write_u64(offsets::TOTAL_PAGES, self.total_pages);
        page.write_u64(offsets::FREE_LIST_HEAD, self.free_list_head);
        page.write_u64(offsets::FREE_LIST_PAGES, self.free_list_pages);
        page.write_u64(offsets::FREE_PAGE_COUNT, self.free_page_count);
        page.write_bytes(offsets::ROOT_CATALOG, &self.root_catalog.to_bytes());

        let checksum = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        page.write_u32(offsets::CHECKSUM, checksum);
        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let expected = page.read_u32(offsets::CHECKSUM);
        let actual = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        if expected != actual {
            return Err(SuperblockError::ChecksumMismatch { expected, actual });
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let root_catalog = TreeState::from_bytes(
            page.read_bytes(offsets::ROOT_CATALOG, TreeState::ENCODED_SIZE),
        )
        .ok_or(SuperblockError::InvalidRootCatalog)?;

        Ok(Self {
            page_size: page.read_u32(offsets::PAGE_SIZE),
            txn_id: page.read_u64(offsets::TXN_ID),
            total_pages: page.read_u64(offsets::TOTAL_PAGES),
            free_list_head: page.read_u64(offsets::FREE_LIST_HEAD),
            free_list_pages: page.read_u64(offsets::FREE_LIST_PAGES),
            free_page_count: page.read_u64(offsets::FREE_PAGE_COUNT),
            root_catalog,
        })
    }

    /// Pick the newest valid superblock from the two slots.
    ///
    /// Returns the first slot's error when neither slot is valid.
    pub fn newest(
        slot0: Result<Self, SuperblockError>,
        slot1: Result<Self, SuperblockError>,
    ) -> Result<Self, SuperblockError> {
        match (slot0, slot1) {
            (Ok(a), Ok(b)) => Ok(if b.txn_id > a.txn_id { b } else { a }),
            (Ok(a), Err(_)) => Ok(a),
            (Err(_), Ok(b)) => Ok(b),
            (Err(e), Err(_)) => Err(e),
        }
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Stored checksum does not match.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// The root catalog state is malformed.
    InvalidRootCatalog,
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "superblock checksum mismatch: expected {expected}, got {actual}"
            ),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidRootCatalog => write!(f, "invalid root catalog state"),
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(txn_id: u64) -> Superblock {
        Superblock {
            page_size: 4096,
            txn_id,
            total_pages: 128,
            free_list_head: 40,
            free_list_pages: 2,
            free_page_count: 600,
            root_catalog: TreeState {
                root_page: 9,
                depth: 2,
                branch_pages: 1,
                leaf_pages: 3,
                overflow_pages: 0,
                entry_count: 12,
            },
        }
    }

    #[test]
    fn test_superblock_roundtrip() {
        let sb = sample(42);
        let page = sb.to_page(4096);
        let restored = Superblock::from_page(&page).expect("should parse");
        assert_eq!(restored, sb);
        assert_eq!(Superblock::slot_for(42), 0);
        assert_eq!(Superblock::slot_for(43), 1);
    }

    #[test]
    fn test_superblock_invalid_magic() {
        let mut page = Page::new(4096);
        page.write_bytes(0, b"BADMAGIC");

        let result = Superblock::from_page(&page);
        assert!(matches!(result, Err(SuperblockError::InvalidMagic(_))));
    }

    #[test]
    fn test_superblock_detects_torn_write() {
        let mut page = sample(7).to_page(512);
        page.write_u64(offsets::TOTAL_PAGES, 9999);
        assert!(matches!(
            Superblock::from_page(&page),
            Err(SuperblockError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_newest_slot_wins() {
        let older = sample(4);
        let newer = sample(5);

        let picked = Superblock::newest(Ok(older), Ok(newer)).expect("pick");
        assert_eq!(picked.txn_id, 5);

        let picked = Superblock::newest(Ok(older), Err(SuperblockError::InvalidRootCatalog))
            .expect("fallback");
        assert_eq!(picked.txn_id, 4);

        assert!(
            Superblock::newest(
                Err(SuperblockError::InvalidRootCatalog),
                Err(SuperblockError::InvalidRootCatalog)
            )
            .is_err()
        );
    }
}

//! Page allocator with deferred reclamation.
//!
//! Pages freed by a commit may still be referenced by read transactions that
//! started earlier, so they are parked in a pending list tagged with the id of
//! the freeing commit. When a write transaction begins, every pending batch
//! freed at or before the oldest open reader's snapshot moves to the free set.
//! With no readers open, everything pending is released.
//!
//! The allocator is persisted at commit as a chain of free-list pages:
//!
//! ```text
//! header (24 bytes, entry_count = ids in this page)
//! next_page: u64 (0 = end of chain)
//! ids: [u64; entry_count]
//! ```

// Entry counts are bounded by the page size.
#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeSet;

use crate::storage::error::EngineError;
use crate::storage::page::{Page, PageError, PageHeader, PageId, PageType};

/// Offset of the next-page pointer in a free-list page.
const NEXT_OFFSET: usize = PageHeader::SIZE;

/// Offset of the first page id in a free-list page.
const IDS_OFFSET: usize = PageHeader::SIZE + 8;

/// Number of page ids a single free-list page holds.
#[must_use]
pub const fn ids_per_page(page_size: usize) -> usize {
    (page_size - IDS_OFFSET) / 8
}

/// Pages freed by one commit, reusable once no reader predates it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingFree {
    freed_by: u64,
    pages: Vec<PageId>,
}

/// Tracks reusable pages and the file's high-water mark.
///
/// The writer owns the allocator exclusively; a write transaction works on a
/// copy and hands it back on commit, or drops it on abort.
#[derive(Debug, Clone)]
pub struct PageAllocator {
    free: BTreeSet<PageId>,
    pending: Vec<PendingFree>,
    next_page: u64,
    max_pages: Option<u64>,
    chain: Vec<PageId>,
}

impl PageAllocator {
    /// Create an allocator for a file of `total_pages` pages.
    #[must_use]
    pub fn new(total_pages: u64, max_pages: Option<u64>) -> Self {
        Self {
            free: BTreeSet::new(),
            pending: Vec::new(),
            next_page: total_pages,
            max_pages,
            chain: Vec::new(),
        }
    }

    /// Restore an allocator from a persisted free list.
    #[must_use]
    pub fn from_persisted(
        total_pages: u64,
        max_pages: Option<u64>,
        free: impl IntoIterator<Item = PageId>,
        chain: Vec<PageId>,
    ) -> Self {
        Self {
            free: free.into_iter().collect(),
            pending: Vec::new(),
            next_page: total_pages,
            max_pages,
            chain,
        }
    }

    /// Move pending pages to the free set once no reader can see them.
    ///
    /// `oldest_reader` is the snapshot id of the oldest open read transaction.
    /// Returns the number of pages released.
    pub fn release(&mut self, oldest_reader: Option<u64>) -> usize {
        let mut released = 0;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| oldest_reader.is_none_or(|oldest| p.freed_by <= oldest));

        for batch in ready {
            released += batch.pages.len();
            self.free.extend(batch.pages);
        }
        self.pending = waiting;
        released
    }

    /// Allocate `count` contiguous pages.
    ///
    /// Reuses a free run when one exists, otherwise grows the file.
    pub fn allocate(&mut self, count: u64) -> Result<PageId, EngineError> {
        if let Some(start) = self.take_free_run(count) {
            return Ok(start);
        }

        let end = self.next_page + count;
        if let Some(limit) = self.max_pages
            && end > limit
        {
            return Err(EngineError::CapacityExhausted {
                requested: count,
                limit,
            });
        }

        let start = self.next_page;
        self.next_page = end;
        Ok(start)
    }

    fn take_free_run(&mut self, count: u64) -> Option<PageId> {
        if count == 1 {
            return self.free.pop_first();
        }

        let mut run_start = 0;
        let mut run_length = 0;
        let mut found = None;
        for &page_id in &self.free {
            if run_length > 0 && page_id == run_start + run_length {
                run_length += 1;
            } else {
                run_start = page_id;
                run_length = 1;
            }
            if run_length == count {
                found = Some(run_start);
                break;
            }
        }

        let start = found?;
        for page_id in start..start + count {
            self.free.remove(&page_id);
        }
        Some(start)
    }

    /// Return a page nobody else can see to the free set.
    pub fn free_now(&mut self, page_id: PageId) {
        self.free.insert(page_id);
    }

    /// Park pages freed by commit `freed_by` until readers move past it.
    pub fn defer(&mut self, freed_by: u64, pages: Vec<PageId>) {
        if !pages.is_empty() {
            self.pending.push(PendingFree { freed_by, pages });
        }
    }

    /// Take the pages of the persisted free-list chain, which become garbage
    /// once a new chain is written.
    pub fn take_chain(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.chain)
    }

    /// Record the chain written by the latest commit.
    pub fn set_chain(&mut self, chain: Vec<PageId>) {
        self.chain = chain;
    }

    /// Free and pending page ids, in the order they are persisted.
    #[must_use]
    pub fn persisted_ids(&self) -> Vec<PageId> {
        self.free
            .iter()
            .copied()
            .chain(self.pending.iter().flat_map(|p| p.pages.iter().copied()))
            .collect()
    }

    /// Free plus pending page count.
    #[must_use]
    pub fn free_count(&self) -> u64 {
        (self.free.len() + self.pending.iter().map(|p| p.pages.len()).sum::<usize>()) as u64
    }

    /// Pages reusable right now.
    #[must_use]
    pub fn reusable_count(&self) -> u64 {
        self.free.len() as u64
    }

    /// File high-water mark.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.next_page
    }
}

/// Encode `ids` into the chain pages `chain`.
///
/// `chain` must hold at least `ids.len().div_ceil(ids_per_page)` pages; extra
/// chain pages are written empty.
#[must_use]
pub fn encode_chain(ids: &[PageId], chain: &[PageId], page_size: usize) -> Vec<(PageId, Page)> {
    let per_page = ids_per_page(page_size);
    let mut chunks = ids.chunks(per_page);

    chain
        .iter()
        .enumerate()
        .map(|(i, &page_id)| {
            let chunk = chunks.next().unwrap_or(&[]);
            let mut page = Page::new(page_size);
            let mut header = PageHeader::new(PageType::FreeList, page_id);
            header.entry_count = chunk.len() as u16;
            page.write_bytes(0, &header.to_bytes());
            page.write_u64(NEXT_OFFSET, chain.get(i + 1).copied().unwrap_or(0));
            for (slot, id) in chunk.iter().enumerate() {
                page.write_u64(IDS_OFFSET + slot * 8, *id);
            }
            page.seal();
            (page_id, page)
        })
        .collect()
}

/// Decode one free-list page, returning its ids and the next page in the chain.
pub fn decode_chain_page(page: &Page) -> Result<(Vec<PageId>, Option<PageId>), PageError> {
    page.verify_checksum()?;
    let header = PageHeader::from_page(page)?;
    if header.page_type != PageType::FreeList {
        return Err(PageError::InvalidPageType(header.page_type as u8));
    }

    let count = (header.entry_count as usize).min(ids_per_page(page.size()));
    let ids = (0..count)
        .map(|slot| page.read_u64(IDS_OFFSET + slot * 8))
        .collect();
    let next = page.read_u64(NEXT_OFFSET);
    Ok((ids, (next != 0).then_some(next)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_grows_file() {
        let mut alloc = PageAllocator::new(3, None);
        assert_eq!(alloc.allocate(1).expect("alloc"), 3);
        assert_eq!(alloc.allocate(4).expect("alloc run"), 4);
        assert_eq!(alloc.total_pages(), 8);
    }

    #[test]
    fn test_allocate_reuses_free_pages() {
        let mut alloc = PageAllocator::new(20, None);
        alloc.free_now(7);
        alloc.free_now(5);

        assert_eq!(alloc.allocate(1).expect("alloc"), 5);
        assert_eq!(alloc.allocate(1).expect("alloc"), 7);
        assert_eq!(alloc.allocate(1).expect("alloc"), 20);
    }

    #[test]
    fn test_allocate_contiguous_run() {
        let mut alloc = PageAllocator::new(30, None);
        for id in [3, 5, 6, 7, 8, 12] {
            alloc.free_now(id);
        }

        assert_eq!(alloc.allocate(3).expect("alloc run"), 5);
        assert_eq!(alloc.persisted_ids(), vec![3, 8, 12]);
        // No run of two left, so the file grows.
        assert_eq!(alloc.allocate(2).expect("alloc run"), 30);
    }

    #[test]
    fn test_capacity_limit() {
        let mut alloc = PageAllocator::new(8, Some(10));
        alloc.allocate(2).expect("fits");
        assert!(matches!(
            alloc.allocate(1),
            Err(EngineError::CapacityExhausted {
                requested: 1,
                limit: 10
            })
        ));
        assert_eq!(alloc.total_pages(), 10);
    }

    #[test]
    fn test_release_respects_oldest_reader() {
        let mut alloc = PageAllocator::new(100, None);
        alloc.defer(5, vec![10, 11]);
        alloc.defer(8, vec![12]);
        assert_eq!(alloc.free_count(), 3);
        assert_eq!(alloc.reusable_count(), 0);

        // A reader on snapshot 6 may still see pages freed by commit 8.
        assert_eq!(alloc.release(Some(6)), 2);
        assert_eq!(alloc.reusable_count(), 2);

        assert_eq!(alloc.release(Some(7)), 0);
        assert_eq!(alloc.release(None), 1);
        assert_eq!(alloc.reusable_count(), 3);
    }

    #[test]
    fn test_chain_roundtrip() {
        let page_size = 512;
        let per_page = ids_per_page(page_size);
        let ids: Vec<PageId> = (100..100 + per_page as u64 + 5).collect();

        let pages = encode_chain(&ids, &[40, 41, 42], page_size);
        assert_eq!(pages.len(), 3);

        let mut decoded = Vec::new();
        let mut next = Some(40);
        while let Some(id) = next {
            let (_, page) = pages
                .iter()
                .find(|(p, _)| *p == id)
                .expect("chain page present");
            let (chunk, following) = decode_chain_page(page).expect("decode");
            decoded.extend(chunk);
            next = following;
        }
        assert_eq!(decoded, ids);
    }
}

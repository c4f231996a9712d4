//! Overflow runs for large values.
//!
//! A value too large to sit inline in a leaf is written to a run of contiguous
//! pages. Only the first page carries a header; the value bytes start right
//! after it and continue through the rest of the run.
//!
//! # Overflow Run Format
//!
//! ```text
//! +--------------------------------------+---------------------------------+
//! | Page Header (24 bytes)               | Value bytes ... (spans pages)   |
//! | type = Overflow, page_id = first,    |                                 |
//! | overflow_size = len, checksum = CRC  |                                 |
//! +--------------------------------------+---------------------------------+
//! ```
//!
//! The header checksum is the CRC32 of the value, not of the page.

// Value lengths are capped at u32::MAX before reaching this module.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::btree::OverflowRef;
use crate::storage::error::EngineError;
use crate::storage::page::{Page, PageHeader, PageId, PageType, pages_for};
use crate::storage::transaction::{PageReader, WriteTransaction};

/// Number of pages a run holding `value_len` bytes spans.
#[must_use]
pub const fn run_length(value_len: usize, page_size: usize) -> u64 {
    pages_for(PageHeader::SIZE + value_len, page_size)
}

/// Write `value` into an overflow run.
///
/// When `previous` is a run allocated by this transaction and is long enough,
/// it is rewritten in place and its tail is freed. Otherwise the previous run
/// is freed and a new one is allocated.
pub fn write_run(
    tx: &mut WriteTransaction,
    previous: Option<OverflowRef>,
    value: &[u8],
) -> Result<OverflowRef, EngineError> {
    let page_size = tx.page_size();
    let needed = run_length(value.len(), page_size);

    let first_page = match previous {
        Some(old) if tx.is_dirty(old.first_page) => {
            let old_len = run_length(old.total_length as usize, page_size);
            if needed <= old_len {
                for page_id in old.first_page + needed..old.first_page + old_len {
                    tx.free_page(page_id);
                }
                old.first_page
            } else {
                free_run(tx, old);
                tx.allocate_pages(needed)?
            }
        }
        Some(old) => {
            free_run(tx, old);
            tx.allocate_pages(needed)?
        }
        None => tx.allocate_pages(needed)?,
    };

    for (page_id, page) in encode_run(first_page, value, page_size) {
        tx.put_page(page_id, page);
    }

    Ok(OverflowRef {
        first_page,
        total_length: value.len() as u32,
    })
}

/// Read the value stored in an overflow run.
pub fn read_run<R: PageReader + ?Sized>(
    tx: &R,
    overflow: OverflowRef,
) -> Result<Vec<u8>, EngineError> {
    let page_size = tx.page_size();
    let length = overflow.total_length as usize;
    let count = run_length(length, page_size);

    let first = tx.read_page(overflow.first_page)?;
    let header = PageHeader::from_page(&first)?;
    if header.page_type != PageType::Overflow
        || header.page_id != overflow.first_page
        || header.overflow_size != overflow.total_length
    {
        return Err(EngineError::corrupt_page(
            overflow.first_page,
            format!(
                "expected overflow run of {length} bytes, found {:?} page of {} bytes",
                header.page_type, header.overflow_size
            ),
        ));
    }

    let mut value = Vec::with_capacity(length);
    let first_chunk = length.min(page_size - PageHeader::SIZE);
    value.extend_from_slice(first.read_bytes(PageHeader::SIZE, first_chunk));

    for page_id in overflow.first_page + 1..overflow.first_page + count {
        let page = tx.read_page(page_id)?;
        let chunk = (length - value.len()).min(page_size);
        value.extend_from_slice(page.read_bytes(0, chunk));
    }

    let actual = crc32fast::hash(&value);
    if actual != header.checksum {
        tracing::error!(
            page_id = overflow.first_page,
            expected = header.checksum,
            actual,
            "overflow checksum mismatch"
        );
        return Err(EngineError::corrupt_page(
            overflow.first_page,
            format!(
                "overflow checksum mismatch: expected {}, got {actual}",
                header.checksum
            ),
        ));
    }

    Ok(value)
}

/// Free every page of an overflow run.
pub fn free_run(tx: &mut WriteTransaction, overflow: OverflowRef) {
    let count = run_length(overflow.total_length as usize, tx.page_size());
    for page_id in overflow.first_page..overflow.first_page + count {
        tx.free_page(page_id);
    }
}

fn encode_run(first_page: PageId, value: &[u8], page_size: usize) -> Vec<(PageId, Page)> {
    let count = run_length(value.len(), page_size) as usize;
    let mut buffer = vec![0u8; count * page_size];

    let mut header = PageHeader::new(PageType::Overflow, first_page);
    header.overflow_size = value.len() as u32;
    header.checksum = crc32fast::hash(value);
    buffer[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
    buffer[PageHeader::SIZE..PageHeader::SIZE + value.len()].copy_from_slice(value);

    buffer
        .chunks(page_size)
        .zip(first_page..)
        .map(|(chunk, page_id)| (page_id, Page::from_bytes(chunk.to_vec())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_length() {
        assert_eq!(run_length(1, 4096), 1);
        assert_eq!(run_length(4096 - PageHeader::SIZE, 4096), 1);
        assert_eq!(run_length(4096 - PageHeader::SIZE + 1, 4096), 2);
        assert_eq!(run_length(8192, 4096), 3);
    }

    #[test]
    fn test_encode_run_layout() {
        let value: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        // 24 header bytes plus 1500 value bytes span three 512-byte pages.
        let pages = encode_run(10, &value, 512);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].0, 10);
        assert_eq!(pages[2].0, 12);

        let header = PageHeader::from_page(&pages[0].1).expect("header");
        assert_eq!(header.page_type, PageType::Overflow);
        assert_eq!(header.overflow_size, 1500);
        assert_eq!(header.checksum, crc32fast::hash(&value));

        let mut joined: Vec<u8> = pages
            .iter()
            .flat_map(|(_, page)| page.as_bytes().iter().copied())
            .skip(PageHeader::SIZE)
            .collect();
        joined.truncate(value.len());
        assert_eq!(joined, value);
    }
}

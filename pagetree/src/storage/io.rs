//! Storage abstraction over the backing page store.
//!
//! The environment only ever talks to a `Storage`, which lets the engine run
//! against a real file in production and against in-memory pages (optionally
//! with injected faults) in tests.
//!
//! # Implementation Notes
//!
//! Implementations must ensure:
//! - `read_page` returns the last written content for a page
//! - reading a page that was never written but is below `page_count` yields zeros
//! - `sync` makes all previous writes durable
//! - all methods take `&self`; readers and the single writer call them concurrently

use std::sync::Arc;

use crate::storage::page::{Page, PageId};

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Page beyond the end of the store.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Page buffer does not match the store's page size.
    PageSizeMismatch { expected: usize, actual: usize },
    /// Injected fault for testing.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::PageSizeMismatch { expected, actual } => {
                write!(f, "page buffer is {actual} bytes, store uses {expected}")
            }
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over page-based storage operations.
pub trait Storage: Send + Sync {
    /// Page size this store was opened with.
    fn page_size(&self) -> usize;

    /// Read a page into `page`.
    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), StorageError>;

    /// Write a page, growing the store if needed.
    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Make all previous writes durable.
    fn sync(&self) -> Result<(), StorageError>;

    /// Number of pages currently backed by the store.
    fn page_count(&self) -> Result<u64, StorageError>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), StorageError> {
        (**self).read_page(page_id, page)
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        (**self).write_page(page_id, page)
    }

    fn sync(&self) -> Result<(), StorageError> {
        (**self).sync()
    }

    fn page_count(&self) -> Result<u64, StorageError> {
        (**self).page_count()
    }
}

/// Check that a page buffer matches the store's page size.
pub(crate) const fn check_page_size(expected: usize, page: &Page) -> Result<(), StorageError> {
    if page.size() == expected {
        Ok(())
    } else {
        Err(StorageError::PageSizeMismatch {
            expected,
            actual: page.size(),
        })
    }
}

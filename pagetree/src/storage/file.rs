//! Database file I/O operations.
//!
//! Page `n` lives at byte offset `n * page_size`. The file handle sits behind a
//! mutex so concurrent readers and the committing writer can share it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::storage::io::{Storage, StorageError, check_page_size};
use crate::storage::page::{Page, PageId};

/// A single-file page store.
pub struct FileStorage {
    file: Mutex<File>,
    path: PathBuf,
    page_size: usize,
}

impl FileStorage {
    /// Open the file at `path`, creating it if it does not exist.
    pub fn open(path: &Path, page_size: usize) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock(&self) -> std::sync::MutexGuard<'_, File> {
        self.file.lock().expect("lock poisoned")
    }

    const fn offset(&self, page_id: PageId) -> u64 {
        page_id * self.page_size as u64
    }
}

impl Storage for FileStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), StorageError> {
        check_page_size(self.page_size, page)?;
        let mut file = self.lock();

        let total_pages = file.metadata()?.len() / self.page_size as u64;
        if page_id >= total_pages {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages,
            });
        }

        file.seek(SeekFrom::Start(self.offset(page_id)))?;
        file.read_exact(page.as_bytes_mut())?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        check_page_size(self.page_size, page)?;
        let mut file = self.lock();
        file.seek(SeekFrom::Start(self.offset(page_id)))?;
        file.write_all(page.as_bytes())?;
        Ok(())
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.lock().sync_all()?;
        Ok(())
    }

    fn page_count(&self) -> Result<u64, StorageError> {
        Ok(self.lock().metadata()?.len() / self.page_size as u64)
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_write_and_read_back() {
        let dir = tempdir().expect("create temp dir");
        let storage = FileStorage::open(&dir.path().join("data.pt"), 1024).expect("open");

        let mut page = Page::new(1024);
        page.write_bytes(10, b"hello");
        storage.write_page(3, &page).expect("write");

        assert_eq!(storage.page_count().expect("count"), 4);

        let mut read = Page::new(1024);
        storage.read_page(3, &mut read).expect("read");
        assert_eq!(read.read_bytes(10, 5), b"hello");

        // Pages below the high-water mark that were never written read as zeros.
        storage.read_page(1, &mut read).expect("read hole");
        assert!(read.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_file_read_out_of_bounds() {
        let dir = tempdir().expect("create temp dir");
        let storage = FileStorage::open(&dir.path().join("data.pt"), 1024).expect("open");

        let mut page = Page::new(1024);
        let result = storage.read_page(0, &mut page);
        assert!(matches!(
            result,
            Err(StorageError::PageOutOfBounds { page_id: 0, .. })
        ));
    }

    #[test]
    fn test_file_rejects_wrong_page_size() {
        let dir = tempdir().expect("create temp dir");
        let storage = FileStorage::open(&dir.path().join("data.pt"), 1024).expect("open");

        let page = Page::new(512);
        assert!(matches!(
            storage.write_page(0, &page),
            Err(StorageError::PageSizeMismatch {
                expected: 1024,
                actual: 512
            })
        ));
    }

    #[test]
    fn test_file_persists_across_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("nested").join("data.pt");

        {
            let storage = FileStorage::open(&path, 512).expect("open");
            let mut page = Page::new(512);
            page.write_u64(0, 42);
            storage.write_page(0, &page).expect("write");
            storage.sync().expect("sync");
        }

        let storage = FileStorage::open(&path, 512).expect("reopen");
        let mut page = Page::new(512);
        storage.read_page(0, &mut page).expect("read");
        assert_eq!(page.read_u64(0), 42);
    }
}

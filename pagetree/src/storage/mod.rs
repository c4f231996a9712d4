//! Transactional page-oriented B-tree storage.
//!
//! A [`StorageEnvironment`] owns a store of fixed-size pages and a set of named
//! [`Tree`]s. Read transactions see a stable snapshot; a single write
//! transaction at a time makes copy-on-write changes that become visible
//! atomically on commit.
//!
//! # Usage
//!
//! ```
//! use pagetree::config::StorageEnvironmentOptions;
//! use pagetree::storage::{EngineError, PageReader, StorageEnvironment};
//!
//! let env = StorageEnvironment::open(StorageEnvironmentOptions::default())?;
//!
//! let mut tx = env.open_write_transaction()?;
//! let docs = tx.create_tree("docs")?;
//! docs.add(&mut tx, "doc/1", vec![7u8; 10_000])?;
//! tx.commit()?;
//!
//! let tx = env.open_read_transaction();
//! let docs = tx.open_tree("docs")?;
//! assert_eq!(docs.read(&tx, "doc/1")?.len(), 10_000);
//! assert!(matches!(docs.read(&tx, "doc/2"), Err(EngineError::KeyNotFound)));
//! # Ok::<(), EngineError>(())
//! ```

mod allocator;
pub mod batch;
pub mod btree;
mod environment;
mod error;
mod file;
mod io;
mod memory;
mod overflow;
pub mod page;
mod slice;
mod superblock;
mod transaction;

pub use batch::{BatchCommand, BatchResult, apply_batch};
pub use btree::{Tree, TreeIterator, TreeState};
pub use environment::{EnvironmentStats, StorageEnvironment};
pub use error::EngineError;
pub use file::FileStorage;
pub use io::{Storage, StorageError};
pub use memory::{FaultConfig, MemoryStorage, MemoryStorageStats};
pub use page::{DEFAULT_PAGE_SIZE, Page, PageId};
pub use slice::{SeekTarget, Slice};
pub use superblock::{Superblock, SuperblockError};
pub use transaction::{PageReader, ReadTransaction, WriteTransaction};

//! Copy-on-write B-trees over fixed-size pages.
//!
//! # Structure
//!
//! - Branch nodes hold separator keys and child page numbers; the first child
//!   covers every key below the first separator.
//! - Leaf nodes hold sorted entries whose values are either inline or a
//!   reference to an overflow run.
//! - All leaves sit at the same depth. Only the root may be underfilled, and
//!   only the root leaf may be empty.
//!
//! Pages are never modified in place once committed: a write transaction
//! copies each page it touches, so readers keep seeing their snapshot.
//!
//! # Usage
//!
//! ```
//! use pagetree::config::StorageEnvironmentOptions;
//! use pagetree::storage::{PageReader, SeekTarget, StorageEnvironment};
//!
//! let env = StorageEnvironment::open(StorageEnvironmentOptions::default())?;
//!
//! let mut tx = env.open_write_transaction()?;
//! let users = tx.create_tree("users")?;
//! users.add(&mut tx, "alice", b"admin")?;
//! users.add(&mut tx, "bob", b"reader")?;
//! tx.commit()?;
//!
//! let tx = env.open_read_transaction();
//! let users = tx.open_tree("users")?;
//! assert_eq!(users.read(&tx, "bob")?, b"reader");
//!
//! let mut it = users.iterate(&tx)?;
//! assert!(it.seek(SeekTarget::BeforeAllKeys)?);
//! assert_eq!(it.current_key(), Some(&b"alice"[..]));
//! # Ok::<(), pagetree::storage::EngineError>(())
//! ```

mod iterator;
mod node;
mod rebalance;
mod tree;
mod verify;

pub use iterator::TreeIterator;
pub use node::{
    BranchNode, LeafEntry, LeafNode, LeafValue, Node, NodeError, OverflowRef, max_inline_value_size,
    max_key_size, stays_inline, usable_space,
};
pub use tree::{Tree, TreeState};
pub(crate) use tree::{free_tree, insert, lookup, remove, resolve_value};

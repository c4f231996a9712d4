//! Engine-level error taxonomy.
//!
//! Lower layers have their own error enums; this is what the transaction and
//! tree APIs return. Structural decode failures all surface as `Corruption`.

use crate::config::ConfigError;
use crate::storage::btree::NodeError;
use crate::storage::io::StorageError;
use crate::storage::page::{PageError, PageId};
use crate::storage::superblock::SuperblockError;

/// Errors returned by environment, transaction and tree operations.
#[derive(Debug)]
pub enum EngineError {
    /// The requested key is absent.
    KeyNotFound,
    /// No tree with this name exists.
    TreeNotFound(String),
    /// The single write slot is taken.
    WriteConflict,
    /// A structural invariant was violated on disk or in memory.
    Corruption(String),
    /// The store cannot grow to satisfy an allocation.
    CapacityExhausted { requested: u64, limit: u64 },
    /// The caller passed an unusable key, value, or name.
    InvalidArgument(String),
    /// The backing store failed.
    Storage(StorageError),
    /// Options were rejected.
    Config(ConfigError),
}

impl EngineError {
    /// Corruption error pointing at a page.
    #[must_use]
    pub fn corrupt_page(page_id: PageId, detail: impl std::fmt::Display) -> Self {
        Self::Corruption(format!("page {page_id}: {detail}"))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyNotFound => write!(f, "key not found"),
            Self::TreeNotFound(name) => write!(f, "tree not found: {name}"),
            Self::WriteConflict => write!(f, "another write transaction is active"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::CapacityExhausted { requested, limit } => write!(
                f,
                "capacity exhausted: cannot allocate {requested} page(s), limit is {limit} pages"
            ),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<PageError> for EngineError {
    fn from(e: PageError) -> Self {
        Self::Corruption(e.to_string())
    }
}

impl From<NodeError> for EngineError {
    fn from(e: NodeError) -> Self {
        Self::Corruption(e.to_string())
    }
}

impl From<SuperblockError> for EngineError {
    fn from(e: SuperblockError) -> Self {
        Self::Corruption(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        assert_eq!(EngineError::KeyNotFound.to_string(), "key not found");
        assert_eq!(
            EngineError::TreeNotFound("users".to_string()).to_string(),
            "tree not found: users"
        );
        assert_eq!(
            EngineError::CapacityExhausted {
                requested: 3,
                limit: 10
            }
            .to_string(),
            "capacity exhausted: cannot allocate 3 page(s), limit is 10 pages"
        );
    }

    #[test]
    fn test_lower_errors_become_corruption() {
        let err: EngineError = PageError::InvalidPageType(0x7F).into();
        assert!(matches!(err, EngineError::Corruption(msg) if msg.contains("0x7f")));

        let err = EngineError::corrupt_page(12, "bad child");
        assert_eq!(err.to_string(), "corruption: page 12: bad child");
    }

    #[test]
    fn test_storage_error_has_source() {
        use std::error::Error;

        let err: EngineError = StorageError::InjectedFault("boom".to_string()).into();
        assert!(err.source().is_some());
        assert!(EngineError::WriteConflict.source().is_none());
    }
}

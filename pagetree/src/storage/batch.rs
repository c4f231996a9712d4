//! All-or-nothing batches of puts and deletes.

use std::time::{Duration, Instant};

use crate::storage::environment::StorageEnvironment;
use crate::storage::error::EngineError;
use crate::storage::slice::Slice;

/// One operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchCommand {
    /// Insert or overwrite a key.
    Put { key: Slice, value: Vec<u8> },
    /// Remove a key; absent keys are skipped.
    Delete { key: Slice },
}

impl BatchCommand {
    #[must_use]
    pub fn put(key: impl Into<Slice>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn delete(key: impl Into<Slice>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Key the command applies to.
    #[must_use]
    pub const fn key(&self) -> &Slice {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    /// Commands applied.
    pub count: usize,
    /// Time from opening the write transaction to the end of commit.
    pub elapsed: Duration,
}

/// Apply `commands` to the tree `tree` in one write transaction.
///
/// The tree is created if it does not exist. Either every command is
/// committed or, on the first error, none are.
pub fn apply_batch(
    env: &StorageEnvironment,
    tree: &str,
    commands: impl IntoIterator<Item = BatchCommand>,
) -> Result<BatchResult, EngineError> {
    let started = Instant::now();
    let mut tx = env.open_write_transaction()?;
    let handle = tx.create_tree(tree)?;

    let mut count = 0;
    for command in commands {
        match command {
            BatchCommand::Put { key, value } => handle.add(&mut tx, key, value)?,
            BatchCommand::Delete { key } => {
                handle.delete(&mut tx, key)?;
            }
        }
        count += 1;
    }
    tx.commit()?;

    let elapsed = started.elapsed();
    tracing::debug!("applied batch of {count} commands to {tree:?} in {elapsed:?}");
    Ok(BatchResult { count, elapsed })
}

//! Storage backends for finalized chain state.
//!
//! A [`ChainStore`] persists finalized blocks together with the post-state
//! of the accounts they touched, and serves the committed view back to
//! validation through [`StateService`]. Validation of a whole block reads
//! through [`ChainStore::read_consistent`], so it never mixes state from
//! before and after a commit. Two backends are provided:
//!
//! - an in-memory store ([`mem::InMemoryChainStore`]) for tests and devnets,
//! - a RocksDB-backed store ([`rocksdb::RocksDbChainStore`]) for persistent
//!   validator nodes.

pub mod mem;
pub mod rocksdb;

use crate::state::{PostState, StateError, StateService};
use crate::types::{Block, Hash256};

pub use mem::InMemoryChainStore;
pub use rocksdb::{RocksDbChainStore, RocksDbConfig};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb: {0}")]
    RocksDb(#[from] ::rocksdb::Error),

    #[error("missing column family {0}")]
    MissingColumnFamily(&'static str),

    #[error("corrupted {what}: {reason}")]
    Corrupted { what: &'static str, reason: String },

    #[error("block at height {actual} does not extend the tip (expected height {expected})")]
    NotNextHeight { expected: u64, actual: u64 },

    #[error("block parent {declared} does not match the tip {tip}")]
    ParentMismatch { tip: Hash256, declared: Hash256 },
}

impl From<StorageError> for StateError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Corrupted { .. } => StateError::Corrupted(e.to_string()),
            other => StateError::Backend(other.to_string()),
        }
    }
}

/// Finalized chain: blocks by height plus committed account state.
///
/// Writes go through `&self`; backends handle their own synchronisation so
/// a store can be shared behind an `Arc` with concurrent readers.
pub trait ChainStore: StateService {
    fn tip_height(&self) -> Result<Option<u64>, StorageError>;

    fn tip(&self) -> Result<Option<Block>, StorageError>;

    /// Appends `block` at the tip and overwrites the accounts in
    /// `post_state`. The block must be the tip's direct child.
    fn commit_block(&self, block: &Block, post_state: &PostState) -> Result<(), StorageError>;

    /// Runs `f` against a view of committed state that commits made while
    /// `f` runs do not change.
    fn read_consistent<T>(&self, f: impl FnOnce(&dyn StateService) -> T) -> Result<T, StorageError>;
}

/// Checks that `block` is the direct child of `tip`.
pub(crate) fn check_extends(tip: Option<&Block>, block: &Block) -> Result<(), StorageError> {
    let (expected, parent) = match tip {
        Some(t) => (t.height() + 1, t.hash()),
        None => (0, Hash256::ZERO),
    };
    if block.height() != expected {
        return Err(StorageError::NotNextHeight {
            expected,
            actual: block.height(),
        });
    }
    if block.header.parent_hash != parent {
        return Err(StorageError::ParentMismatch {
            tip: parent,
            declared: block.header.parent_hash,
        });
    }
    Ok(())
}

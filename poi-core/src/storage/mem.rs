//! In-memory chain store.
//!
//! Useful for unit tests, benchmarks, and small devnets. Blocks live in a
//! `Vec` indexed by height and accounts in a `BTreeMap`, both behind one
//! `RwLock` so a commit is observed atomically.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use crate::state::{AccountState, PostState, StateError, StateService};
use crate::types::{Address, Block, U256};

use super::{ChainStore, StorageError, check_extends};

#[derive(Default)]
struct Inner {
    blocks: Vec<Block>,
    accounts: BTreeMap<Address, AccountState>,
}

/// In-memory implementation of [`ChainStore`].
#[derive(Default)]
pub struct InMemoryChainStore {
    inner: RwLock<Inner>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with pre-funded accounts and no blocks.
    pub fn with_genesis(balances: impl IntoIterator<Item = (Address, U256)>) -> Self {
        let accounts = balances
            .into_iter()
            .map(|(address, balance)| (address, AccountState { balance, nonce: 0 }))
            .collect();
        Self {
            inner: RwLock::new(Inner {
                blocks: Vec::new(),
                accounts,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().blocks.is_empty()
    }

    pub fn account(&self, address: &Address) -> AccountState {
        self.read().accounts.get(address).copied().unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |a| a.nonce)
    }

    fn balance(&self, address: &Address) -> U256 {
        self.accounts.get(address).map_or(U256::zero(), |a| a.balance)
    }

    fn block(&self, height: u64) -> Option<Block> {
        usize::try_from(height)
            .ok()
            .and_then(|h| self.blocks.get(h).cloned())
    }
}

impl StateService for InMemoryChainStore {
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self.read().nonce(address))
    }

    fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self.read().balance(address))
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, StateError> {
        Ok(self.read().block(height))
    }
}

/// Committed state seen through a held read guard.
struct MemView<'a>(&'a Inner);

impl StateService for MemView<'_> {
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self.0.nonce(address))
    }

    fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self.0.balance(address))
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, StateError> {
        Ok(self.0.block(height))
    }
}

impl ChainStore for InMemoryChainStore {
    fn tip_height(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.read().blocks.last().map(Block::height))
    }

    fn tip(&self) -> Result<Option<Block>, StorageError> {
        Ok(self.read().blocks.last().cloned())
    }

    fn commit_block(&self, block: &Block, post_state: &PostState) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        check_extends(inner.blocks.last(), block)?;
        inner
            .accounts
            .extend(post_state.iter().map(|(address, state)| (*address, *state)));
        inner.blocks.push(block.clone());
        Ok(())
    }

    /// Holds the read lock for the duration of `f`; commits wait.
    fn read_consistent<T>(&self, f: impl FnOnce(&dyn StateService) -> T) -> Result<T, StorageError> {
        let guard = self.read();
        Ok(f(&MemView(&guard)))
    }
}

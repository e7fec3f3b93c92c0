//! State service interface and the hypothetical-execution snapshot.
//!
//! Persistent balances, nonces and finalized blocks belong to an external
//! state service, consumed through [`StateService`]. Validation never writes
//! to it; instead it opens a [`StateSnapshot`], a copy-on-read overlay that
//! loads an account from the service the first time it is touched and then
//! mutates only its private copy. The snapshot hashes to the block's state
//! root and is either discarded or handed to [`crate::storage::ChainStore`]
//! as the post-state of a finalized block.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::merkle::merkle_root;
use crate::types::{Address, Block, Hash256, Transaction, U256, u256_to_be_bytes};

/// Balance and next expected nonce of one account.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: U256,
    pub nonce: u64,
}

impl AccountState {
    /// State-root leaf: `H(address || balance (32, BE) || nonce (8, BE))`.
    pub fn leaf_hash(&self, address: &Address) -> Hash256 {
        Hash256::compute_parts(&[
            address.as_bytes(),
            &u256_to_be_bytes(&self.balance),
            &self.nonce.to_be_bytes(),
        ])
    }
}

/// Accounts touched by a block, after applying it.
pub type PostState = BTreeMap<Address, AccountState>;

/// Errors surfaced by a state backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("state backend unavailable: {0}")]
    Backend(String),
    #[error("corrupted state entry: {0}")]
    Corrupted(String),
}

/// Read-only view of committed chain state.
///
/// Implementations must be read-consistent for the duration of a single
/// validation call; validation fans out across threads, hence `Sync`.
pub trait StateService: Send + Sync {
    /// Next expected nonce for `address` (0 for unknown accounts).
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError>;

    /// Balance of `address` (0 for unknown accounts).
    fn get_balance(&self, address: &Address) -> Result<U256, StateError>;

    /// Finalized block at `height`, if any.
    fn get_block(&self, height: u64) -> Result<Option<Block>, StateError>;
}

impl<T: StateService + ?Sized> StateService for &T {
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        (**self).get_nonce(address)
    }

    fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        (**self).get_balance(address)
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, StateError> {
        (**self).get_block(height)
    }
}

impl<T: StateService + ?Sized> StateService for Arc<T> {
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        (**self).get_nonce(address)
    }

    fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        (**self).get_balance(address)
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, StateError> {
        (**self).get_block(height)
    }
}

/// Failures while applying a transaction to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("insufficient balance for {address}: required {required}, available {available}")]
    InsufficientBalance {
        address: Address,
        required: U256,
        available: U256,
    },

    #[error("balance overflow for {0}")]
    BalanceOverflow(Address),

    #[error("nonce overflow for {0}")]
    NonceOverflow(Address),
}

/// Copy-on-read overlay over a [`StateService`].
///
/// Exclusively owned by the validation call that created it; never shared
/// across concurrent validations.
pub struct StateSnapshot<'a, S: ?Sized> {
    base: &'a S,
    accounts: BTreeMap<Address, AccountState>,
}

impl<'a, S: StateService + ?Sized> StateSnapshot<'a, S> {
    pub fn new(base: &'a S) -> Self {
        Self {
            base,
            accounts: BTreeMap::new(),
        }
    }

    fn account_mut(&mut self, address: Address) -> Result<&mut AccountState, StateError> {
        match self.accounts.entry(address) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let loaded = AccountState {
                    balance: self.base.get_balance(&address)?,
                    nonce: self.base.get_nonce(&address)?,
                };
                Ok(e.insert(loaded))
            }
        }
    }

    /// Current view of `address`, reading through to the base if untouched.
    pub fn account(&self, address: &Address) -> Result<AccountState, StateError> {
        match self.accounts.get(address) {
            Some(state) => Ok(*state),
            None => Ok(AccountState {
                balance: self.base.get_balance(address)?,
                nonce: self.base.get_nonce(address)?,
            }),
        }
    }

    /// Applies one transaction's balance delta and nonce increment.
    ///
    /// The sender is debited `value + gas_limit * gas_price` (the gas part is
    /// zero for zero-price transactions) and the recipient, if any, is
    /// credited `value`. Fees are burned.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), SnapshotError> {
        let cost = tx
            .total_cost()
            .ok_or(SnapshotError::BalanceOverflow(tx.from))?;

        let sender = self.account_mut(tx.from)?;
        if sender.balance < cost {
            return Err(SnapshotError::InsufficientBalance {
                address: tx.from,
                required: cost,
                available: sender.balance,
            });
        }
        sender.balance -= cost;
        sender.nonce = sender
            .nonce
            .checked_add(1)
            .ok_or(SnapshotError::NonceOverflow(tx.from))?;

        if let Some(to) = tx.to {
            let recipient = self.account_mut(to)?;
            recipient.balance = recipient
                .balance
                .checked_add(tx.value)
                .ok_or(SnapshotError::BalanceOverflow(to))?;
        }

        Ok(())
    }

    /// Applies `txs` in order, reporting the index of the first failure.
    pub fn apply_all<'t>(
        &mut self,
        txs: impl IntoIterator<Item = &'t Transaction>,
    ) -> Result<(), (usize, SnapshotError)> {
        for (index, tx) in txs.into_iter().enumerate() {
            self.apply(tx).map_err(|e| (index, e))?;
        }
        Ok(())
    }

    /// Merkle root over the touched accounts in address order.
    pub fn root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self
            .accounts
            .iter()
            .map(|(address, state)| state.leaf_hash(address))
            .collect();
        merkle_root(&leaves)
    }

    pub fn touched(&self) -> usize {
        self.accounts.len()
    }

    /// Consumes the snapshot, returning the touched accounts.
    pub fn into_post_state(self) -> PostState {
        self.accounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ADDRESS_LEN, SignatureBytes};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapState {
        accounts: HashMap<Address, AccountState>,
    }

    impl StateService for MapState {
        fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
            Ok(self.accounts.get(address).map_or(0, |a| a.nonce))
        }

        fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
            Ok(self.accounts.get(address).map_or(U256::zero(), |a| a.balance))
        }

        fn get_block(&self, _height: u64) -> Result<Option<Block>, StateError> {
            Ok(None)
        }
    }

    fn addr(byte: u8) -> Address {
        Address([byte; ADDRESS_LEN])
    }

    fn transfer(from: u8, to: u8, value: u64, gas_price: u64) -> Transaction {
        Transaction {
            hash: Hash256::ZERO,
            from: addr(from),
            to: Some(addr(to)),
            value: U256::from(value),
            nonce: 0,
            gas_limit: 10,
            gas_price: U256::from(gas_price),
            data: None,
            signature: SignatureBytes::default(),
        }
    }

    fn funded(balances: &[(u8, u64)]) -> MapState {
        let mut state = MapState::default();
        for (byte, balance) in balances {
            state.accounts.insert(
                addr(*byte),
                AccountState {
                    balance: U256::from(*balance),
                    nonce: 0,
                },
            );
        }
        state
    }

    #[test]
    fn apply_moves_value_debits_gas_and_bumps_nonce() {
        let base = funded(&[(1, 1_000)]);
        let mut snap = StateSnapshot::new(&base);

        snap.apply(&transfer(1, 2, 100, 3)).expect("apply");

        let sender = snap.account(&addr(1)).unwrap();
        let recipient = snap.account(&addr(2)).unwrap();
        assert_eq!(sender.balance, U256::from(1_000 - 100 - 30));
        assert_eq!(sender.nonce, 1);
        assert_eq!(recipient.balance, U256::from(100u64));
        assert_eq!(recipient.nonce, 0);

        // The base is untouched.
        assert_eq!(base.get_balance(&addr(1)).unwrap(), U256::from(1_000u64));
    }

    #[test]
    fn zero_gas_price_skips_gas_debit() {
        let base = funded(&[(1, 100)]);
        let mut snap = StateSnapshot::new(&base);
        snap.apply(&transfer(1, 2, 100, 0)).expect("exact balance");
        assert_eq!(snap.account(&addr(1)).unwrap().balance, U256::zero());
    }

    #[test]
    fn insufficient_balance_reports_index() {
        let base = funded(&[(1, 150)]);
        let mut snap = StateSnapshot::new(&base);
        let txs = [transfer(1, 2, 100, 0), transfer(1, 2, 100, 0)];

        let (index, err) = snap.apply_all(txs.iter()).unwrap_err();
        assert_eq!(index, 1);
        assert!(matches!(err, SnapshotError::InsufficientBalance { .. }));
    }

    #[test]
    fn root_is_order_sensitive_for_conflicting_transactions() {
        let base = funded(&[(1, 100), (2, 0)]);
        let a = transfer(1, 2, 100, 0);
        let b = transfer(2, 3, 100, 0);

        let mut forward = StateSnapshot::new(&base);
        forward.apply_all([&a, &b]).expect("a then b succeeds");

        let mut backward = StateSnapshot::new(&base);
        assert!(backward.apply_all([&b, &a]).is_err());

        let mut again = StateSnapshot::new(&base);
        again.apply_all([&a, &b]).unwrap();
        assert_eq!(forward.root(), again.root());
    }

    #[test]
    fn empty_snapshot_has_zero_root() {
        let base = MapState::default();
        assert_eq!(StateSnapshot::new(&base).root(), Hash256::ZERO);
    }
}

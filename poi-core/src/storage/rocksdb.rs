//! RocksDB-backed chain store.
//!
//! Finalized blocks and committed accounts are persisted in dedicated
//! column families:
//!
//! - `"blocks"`:   height (8 bytes, BE) -> canonical block bytes,
//! - `"accounts"`: address (20 bytes) -> bincode-encoded [`AccountState`],
//! - `"meta"`:     the tip height under the fixed key `"tip"`.
//!
//! A commit is a single `WriteBatch`, so a block and its post-state become
//! visible together. [`ChainStore::read_consistent`] reads through a RocksDB
//! snapshot pinned before `f` runs.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    SnapshotWithThreadMode, WriteBatch,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state::{AccountState, PostState, StateError, StateService};
use crate::types::{Address, Block, U256};

use super::{ChainStore, StorageError, check_extends};

const CF_BLOCKS: &str = "blocks";
const CF_ACCOUNTS: &str = "accounts";
const CF_META: &str = "meta";
const TIP_KEY: &[u8] = b"tip";

type Db = DBWithThreadMode<MultiThreaded>;
type DbSnapshot<'a> = SnapshotWithThreadMode<'a, Db>;

/// Configuration for [`RocksDbChainStore`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/chain-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// RocksDB-backed implementation of [`ChainStore`].
pub struct RocksDbChainStore {
    db: Db,
    // Serialises commits so the tip check and the write are one step.
    commit_lock: Mutex<()>,
}

impl RocksDbChainStore {
    /// Opens (or creates) a store at `cfg.path`.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = [CF_BLOCKS, CF_ACCOUNTS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = Db::open_cf_descriptors(&opts, Path::new(&cfg.path), cfs)?;
        info!(path = %cfg.path, "opened chain store");

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
        })
    }

    /// Seeds accounts that have never been written. Existing entries are
    /// left untouched, so reopening a database keeps its state.
    pub fn seed_genesis(
        &self,
        balances: impl IntoIterator<Item = (Address, U256)>,
    ) -> Result<usize, StorageError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        let mut seeded = 0;
        for (address, balance) in balances {
            if self.db.get_cf(&cf, address.as_bytes())?.is_none() {
                batch.put_cf(&cf, address.as_bytes(), encode_account(&AccountState { balance, nonce: 0 })?);
                seeded += 1;
            }
        }
        self.db.write(batch)?;
        Ok(seeded)
    }

    fn cf(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    fn get(
        &self,
        snapshot: Option<&DbSnapshot<'_>>,
        cf: &'static str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let handle = self.cf(cf)?;
        Ok(match snapshot {
            Some(snap) => snap.get_cf(&handle, key)?,
            None => self.db.get_cf(&handle, key)?,
        })
    }

    fn load_account(
        &self,
        snapshot: Option<&DbSnapshot<'_>>,
        address: &Address,
    ) -> Result<Option<AccountState>, StorageError> {
        self.get(snapshot, CF_ACCOUNTS, address.as_bytes())?
            .map(|bytes| decode_account(&bytes))
            .transpose()
    }

    fn load_block(
        &self,
        snapshot: Option<&DbSnapshot<'_>>,
        height: u64,
    ) -> Result<Option<Block>, StorageError> {
        match self.get(snapshot, CF_BLOCKS, &height.to_be_bytes())? {
            None => Ok(None),
            Some(bytes) => Block::from_canonical_bytes(&bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Corrupted {
                    what: "block",
                    reason: format!("undecodable block at height {height}"),
                }),
        }
    }

    fn load_tip_height(&self) -> Result<Option<u64>, StorageError> {
        match self.get(None, CF_META, TIP_KEY)? {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 8] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| StorageError::Corrupted {
                            what: "tip",
                            reason: format!("expected 8 bytes, found {}", bytes.len()),
                        })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
        }
    }
}

fn encode_account(state: &AccountState) -> Result<Vec<u8>, StorageError> {
    bincode::serde::encode_to_vec(state, bincode::config::standard()).map_err(|e| {
        StorageError::Corrupted {
            what: "account",
            reason: e.to_string(),
        }
    })
}

fn decode_account(bytes: &[u8]) -> Result<AccountState, StorageError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(state, _)| state)
        .map_err(|e| StorageError::Corrupted {
            what: "account",
            reason: e.to_string(),
        })
}

impl StateService for RocksDbChainStore {
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self.load_account(None, address)?.map_or(0, |a| a.nonce))
    }

    fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self
            .load_account(None, address)?
            .map_or(U256::zero(), |a| a.balance))
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, StateError> {
        Ok(self.load_block(None, height)?)
    }
}

/// Committed state as of a pinned RocksDB snapshot.
struct SnapshotView<'a> {
    store: &'a RocksDbChainStore,
    snapshot: DbSnapshot<'a>,
}

impl StateService for SnapshotView<'_> {
    fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self
            .store
            .load_account(Some(&self.snapshot), address)?
            .map_or(0, |a| a.nonce))
    }

    fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self
            .store
            .load_account(Some(&self.snapshot), address)?
            .map_or(U256::zero(), |a| a.balance))
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>, StateError> {
        Ok(self.store.load_block(Some(&self.snapshot), height)?)
    }
}

impl ChainStore for RocksDbChainStore {
    fn tip_height(&self) -> Result<Option<u64>, StorageError> {
        self.load_tip_height()
    }

    fn tip(&self) -> Result<Option<Block>, StorageError> {
        match self.load_tip_height()? {
            Some(height) => self.load_block(None, height),
            None => Ok(None),
        }
    }

    fn commit_block(&self, block: &Block, post_state: &PostState) -> Result<(), StorageError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        check_extends(self.tip()?.as_ref(), block)?;

        let (cf_blocks, cf_accounts, cf_meta) =
            (self.cf(CF_BLOCKS)?, self.cf(CF_ACCOUNTS)?, self.cf(CF_META)?);
        let height = block.height().to_be_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_blocks, height, block.canonical_bytes());
        for (address, state) in post_state {
            batch.put_cf(&cf_accounts, address.as_bytes(), encode_account(state)?);
        }
        batch.put_cf(&cf_meta, TIP_KEY, height);
        self.db.write(batch)?;

        debug!(height = block.height(), accounts = post_state.len(), "committed block");
        Ok(())
    }

    fn read_consistent<T>(&self, f: impl FnOnce(&dyn StateService) -> T) -> Result<T, StorageError> {
        let view = SnapshotView {
            store: self,
            snapshot: self.db.snapshot(),
        };
        Ok(f(&view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::block::tests::{build_block, funded_chain, transfer, user};
    use crate::validation::{BlockValidator, ValidationConfig};
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> RocksDbChainStore {
        RocksDbChainStore::open(&RocksDbConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        })
        .expect("open RocksDB")
    }

    #[test]
    fn commit_survives_reopen() {
        let tmp = TempDir::new().expect("create temp dir");
        let alice = user("alice");
        let block = build_block(
            &funded_chain(&[&alice], 50_000),
            vec![transfer(&alice, 0, 7)],
        );

        {
            let store = open(&tmp);
            assert_eq!(
                store
                    .seed_genesis([(alice.address(), U256::from(50_000u64))])
                    .unwrap(),
                1
            );
            let validated = BlockValidator::new(ValidationConfig::default())
                .validate(&block, &store)
                .expect("block validates against the store");
            store.commit_block(&block, &validated.post_state).unwrap();
        }

        let store = open(&tmp);
        assert_eq!(store.tip_height().unwrap(), Some(0));
        assert_eq!(store.tip().unwrap(), Some(block));
        assert_eq!(store.get_nonce(&alice.address()).unwrap(), 1);
        // Reseeding does not reset committed accounts.
        assert_eq!(
            store
                .seed_genesis([(alice.address(), U256::from(50_000u64))])
                .unwrap(),
            0
        );
        assert_eq!(
            store.get_balance(&alice.address()).unwrap(),
            U256::from(50_000u64 - 7 - 21_000)
        );
    }

    #[test]
    fn out_of_order_commit_is_refused() {
        let tmp = TempDir::new().expect("create temp dir");
        let store = open(&tmp);
        let mut block = build_block(&funded_chain(&[], 0), Vec::new());
        block.header.height = 3;

        assert!(matches!(
            store.commit_block(&block, &PostState::new()),
            Err(StorageError::NotNextHeight {
                expected: 0,
                actual: 3
            })
        ));
        assert_eq!(store.tip_height().unwrap(), None);
        assert_eq!(store.get_block(3).unwrap(), None);
    }

    #[test]
    fn snapshot_reads_ignore_later_commits() {
        let tmp = TempDir::new().expect("create temp dir");
        let alice = user("alice");
        let store = open(&tmp);
        store
            .seed_genesis([(alice.address(), U256::from(50_000u64))])
            .unwrap();
        let block = build_block(
            &funded_chain(&[&alice], 50_000),
            vec![transfer(&alice, 0, 7)],
        );
        let validated = BlockValidator::new(ValidationConfig::default())
            .validate(&block, &store)
            .unwrap();

        let (nonce, balance, stored) = store
            .read_consistent(|view| {
                store.commit_block(&block, &validated.post_state).unwrap();
                (
                    view.get_nonce(&alice.address()).unwrap(),
                    view.get_balance(&alice.address()).unwrap(),
                    view.get_block(0).unwrap(),
                )
            })
            .unwrap();
        assert_eq!(nonce, 0);
        assert_eq!(balance, U256::from(50_000u64));
        assert_eq!(stored, None);

        // The live view has the commit.
        assert_eq!(store.get_nonce(&alice.address()).unwrap(), 1);
        assert_eq!(
            store.read_consistent(|view| view.get_block(0).unwrap()).unwrap(),
            Some(block)
        );
    }
}

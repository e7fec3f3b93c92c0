//! Block proposal logic.
//!
//! The proposer assembles a candidate block on top of the current tip from
//! a transaction pool. It dry-runs every candidate against a state
//! snapshot, so the block it returns always applies cleanly and carries
//! correct roots and a valid proposer signature.

use tracing::{debug, trace};

use crate::crypto::{CryptoError, Keypair};
use crate::merkle::merkle_root;
use crate::state::{SnapshotError, StateError, StateService, StateSnapshot};
use crate::types::{Address, BLOCK_VERSION, Block, Hash256, Header, SignatureBytes, Transaction};

use super::config::ProposerConfig;

/// Abstract transaction pool interface.
///
/// Consensus does not care how transactions are stored or gossiped; it only
/// needs a way to ask for a batch of transactions that fit into a block.
pub trait TxPool {
    /// Selects a batch of transactions for inclusion in a block.
    ///
    /// `max_txs` and `max_bytes` are upper bounds; implementations may
    /// return fewer transactions.
    fn select_for_block(&mut self, max_txs: usize, max_bytes: usize) -> Vec<Transaction>;

    /// Drops transactions that can never be included on top of the current
    /// tip: their nonce is already used, or the sender cannot pay for them.
    fn evict(&mut self, _hashes: &[Hash256]) {}
}

#[derive(Debug, thiserror::Error)]
pub enum ProposerError {
    #[error("state read failed: {0}")]
    State(#[from] StateError),

    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),
}

/// Block proposer holding the node's signing key.
#[derive(Clone, Debug)]
pub struct Proposer {
    keypair: Keypair,
    cfg: ProposerConfig,
}

impl Proposer {
    pub fn new(keypair: Keypair, cfg: ProposerConfig) -> Self {
        Self { keypair, cfg }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn config(&self) -> &ProposerConfig {
        &self.cfg
    }

    /// Builds and signs a block on top of `parent` (genesis if `None`).
    ///
    /// Pool transactions whose nonce is already used, or that the sender can
    /// no longer pay for, are evicted from the pool. Transactions waiting on
    /// a lower nonce are skipped and kept. Returns `Ok(None)` when nothing is
    /// includable and empty blocks are disabled.
    pub fn build_block<S, P>(
        &self,
        state: &S,
        parent: Option<&Block>,
        pool: &mut P,
        timestamp: u64,
    ) -> Result<Option<Block>, ProposerError>
    where
        S: StateService + ?Sized,
        P: TxPool,
    {
        let (height, parent_hash) = match parent {
            Some(p) => (p.height() + 1, p.hash()),
            None => (0, Hash256::ZERO),
        };

        let candidates = pool.select_for_block(self.cfg.max_block_txs, self.cfg.max_block_size_bytes);
        let mut snapshot = StateSnapshot::new(state);
        let mut included = Vec::with_capacity(candidates.len());
        let mut evicted = Vec::new();

        for tx in candidates {
            let expected = snapshot.account(&tx.from)?.nonce;
            if tx.nonce < expected {
                trace!(tx = %tx.hash, nonce = tx.nonce, expected, "evicting stale transaction");
                evicted.push(tx.hash);
                continue;
            }
            if tx.nonce > expected {
                trace!(tx = %tx.hash, nonce = tx.nonce, expected, "skipping out-of-order transaction");
                continue;
            }
            match snapshot.apply(&tx) {
                Ok(()) => included.push(tx),
                Err(SnapshotError::State(e)) => return Err(e.into()),
                Err(e) => {
                    trace!(tx = %tx.hash, error = %e, "evicting unappliable transaction");
                    evicted.push(tx.hash);
                }
            }
        }

        if !evicted.is_empty() {
            debug!(height, evicted = evicted.len(), "evicted transactions from the pool");
            pool.evict(&evicted);
        }

        if included.is_empty() && !self.cfg.allow_empty_blocks {
            debug!(height, "nothing to propose");
            return Ok(None);
        }

        let tx_hashes: Vec<Hash256> = included.iter().map(|t| t.hash).collect();
        let mut block = Block {
            header: Header {
                version: BLOCK_VERSION,
                height,
                parent_hash,
                tx_root: merkle_root(&tx_hashes),
                state_root: snapshot.root(),
                timestamp,
                proposer: self.keypair.address(),
            },
            transactions: included,
            history_proof: Vec::new(),
            proposer_signature: SignatureBytes::default(),
        };
        block.proposer_signature = self.keypair.sign_prehash(&block.hash())?;

        debug!(
            height,
            block_hash = %block.hash(),
            txs = block.transactions.len(),
            "proposed block"
        );
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::block::tests::{funded_chain, proposer, transfer, user};
    use crate::validation::{BlockValidator, ValidationConfig};

    struct VecPool(Vec<Transaction>);

    impl TxPool for VecPool {
        fn select_for_block(&mut self, max_txs: usize, _max_bytes: usize) -> Vec<Transaction> {
            self.0.iter().take(max_txs).cloned().collect()
        }

        fn evict(&mut self, hashes: &[Hash256]) {
            self.0.retain(|t| !hashes.contains(&t.hash));
        }
    }

    fn block_proposer(cfg: ProposerConfig) -> Proposer {
        Proposer::new(proposer(), cfg)
    }

    #[test]
    fn proposed_blocks_pass_validation() {
        let (alice, bob) = (user("alice"), user("bob"));
        let chain = funded_chain(&[&alice, &bob], 1_000_000);
        let mut pool = VecPool(vec![
            transfer(&alice, 0, 10),
            transfer(&bob, 0, 20),
            transfer(&alice, 1, 30),
        ]);

        let block = block_proposer(ProposerConfig::default())
            .build_block(&chain, None, &mut pool, 1_700_000_000)
            .unwrap()
            .expect("block");
        assert_eq!(block.transactions.len(), 3);
        assert_eq!(block.header.height, 0);

        let validated = BlockValidator::new(ValidationConfig::default())
            .validate(&block, &chain)
            .expect("proposed block validates");
        assert_eq!(validated.state_root, block.header.state_root);
    }

    #[test]
    fn stale_and_unfunded_transactions_are_evicted_gaps_are_kept() {
        let (alice, carol) = (user("alice"), user("carol"));
        let mut chain = funded_chain(&[&alice], 1_000_000);
        chain.accounts.get_mut(&alice.address()).unwrap().nonce = 1;

        let mut pool = VecPool(vec![
            transfer(&alice, 0, 1), // already used nonce
            transfer(&carol, 0, 1), // no funds
            transfer(&alice, 1, 1),
            transfer(&alice, 3, 1), // gap
        ]);
        let block = block_proposer(ProposerConfig::default())
            .build_block(&chain, None, &mut pool, 1)
            .unwrap()
            .unwrap();
        let nonces: Vec<u64> = block.transactions.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![1]);
        assert_eq!(block.transactions[0].from, alice.address());

        let left: Vec<(Address, u64)> = pool.0.iter().map(|t| (t.from, t.nonce)).collect();
        assert_eq!(left, vec![(alice.address(), 1), (alice.address(), 3)]);
    }

    #[test]
    fn empty_blocks_follow_config() {
        let chain = funded_chain(&[], 0);
        let strict = ProposerConfig {
            allow_empty_blocks: false,
            ..ProposerConfig::default()
        };
        assert!(
            block_proposer(strict)
                .build_block(&chain, None, &mut VecPool(Vec::new()), 1)
                .unwrap()
                .is_none()
        );

        let genesis = block_proposer(ProposerConfig::default())
            .build_block(&chain, None, &mut VecPool(Vec::new()), 1)
            .unwrap()
            .unwrap();
        let child = block_proposer(ProposerConfig::default())
            .build_block(&chain, Some(&genesis), &mut VecPool(Vec::new()), 2)
            .unwrap()
            .unwrap();
        assert_eq!(child.header.height, 1);
        assert_eq!(child.header.parent_hash, genesis.hash());
        assert_eq!(child.header.tx_root, Hash256::ZERO);
    }

    #[test]
    fn count_limit_is_respected() {
        let alice = user("alice");
        let chain = funded_chain(&[&alice], 1_000_000);
        let mut pool = VecPool((0..5).map(|n| transfer(&alice, n, 1)).collect());
        let cfg = ProposerConfig {
            max_block_txs: 2,
            ..ProposerConfig::default()
        };
        let block = block_proposer(cfg)
            .build_block(&chain, None, &mut pool, 1)
            .unwrap()
            .unwrap();
        assert_eq!(block.transactions.len(), 2);
    }
}

//! Block validity predicate.
//!
//! [`BlockValidator::validate`] runs one linear protocol per call:
//!
//! 0. cheap limits (version, transaction count, encoded size),
//! 1. genesis / parent-link rule,
//! 2. proposer signature (when required),
//! 3. history proof, if present,
//! 4. every transaction, in parallel, collecting all failures,
//! 5. serial re-derivation of the state root over a fresh snapshot,
//! 6. re-derivation of the transaction Merkle root.
//!
//! Steps 5 and 6 report distinct mismatch errors so tampering with the body
//! can be told apart from a wrong state commitment.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::debug;

use crate::crypto::{Secp256k1Recovery, SignatureRecovery};
use crate::merkle::merkle_root;
use crate::state::{PostState, SnapshotError, StateService, StateSnapshot};
use crate::types::{BLOCK_VERSION, Address, Block, Hash256};

use super::config::ValidationConfig;
use super::error::{BlockError, TxFailure};
use super::history::{HistoryEngine, HistoryProofChecker, PermissiveHistoryEngine};
use super::tx::TransactionValidator;

/// Outcome of a successful block validation.
#[derive(Clone, Debug)]
pub struct ValidatedBlock {
    pub block_hash: Hash256,
    pub tx_root: Hash256,
    pub state_root: Hash256,
    /// Touched accounts after applying the block; handed to storage on
    /// finalization and otherwise dropped.
    pub post_state: PostState,
}

/// Header, history-proof and body validation.
#[derive(Clone, Debug)]
pub struct BlockValidator<R = Secp256k1Recovery, H = PermissiveHistoryEngine> {
    txs: TransactionValidator<R>,
    history: HistoryProofChecker<H>,
}

impl BlockValidator<Secp256k1Recovery, PermissiveHistoryEngine> {
    pub fn new(cfg: ValidationConfig) -> Self {
        Self::with_parts(
            TransactionValidator::new(cfg),
            HistoryProofChecker::default(),
        )
    }
}

impl<R, H> BlockValidator<R, H>
where
    R: SignatureRecovery,
    H: HistoryEngine,
{
    pub fn with_parts(txs: TransactionValidator<R>, history: HistoryProofChecker<H>) -> Self {
        Self { txs, history }
    }

    pub fn transactions(&self) -> &TransactionValidator<R> {
        &self.txs
    }

    fn cfg(&self) -> &ValidationConfig {
        self.txs.config()
    }

    /// Validates `block` against committed state and returns its roots and
    /// post-state.
    pub fn validate<S>(&self, block: &Block, state: &S) -> Result<ValidatedBlock, BlockError>
    where
        S: StateService + ?Sized,
    {
        let result = self.validate_inner(block, state);
        if let Err(e) = &result {
            debug!(
                height = block.height(),
                reason = e.reason_code(),
                class = %e.class(),
                error = %e,
                "block rejected"
            );
        }
        result
    }

    fn validate_inner<S>(&self, block: &Block, state: &S) -> Result<ValidatedBlock, BlockError>
    where
        S: StateService + ?Sized,
    {
        self.check_limits(block)?;
        self.check_parent(block, state)?;

        let block_hash = block.hash();
        self.check_proposer(block, &block_hash)?;

        self.history.check(&block.history_proof)?;

        self.check_transactions(block, state)?;

        let mut snapshot = StateSnapshot::new(state);
        snapshot
            .apply_all(&block.transactions)
            .map_err(|(index, source)| match source {
                SnapshotError::State(e) => BlockError::State(e),
                source => BlockError::Application { index, source },
            })?;
        let state_root = snapshot.root();
        if state_root != block.header.state_root {
            return Err(BlockError::StateRootMismatch {
                declared: block.header.state_root,
                computed: state_root,
            });
        }

        let tx_root = merkle_root(&block.tx_hashes());
        if tx_root != block.header.tx_root {
            return Err(BlockError::TxRootMismatch {
                declared: block.header.tx_root,
                computed: tx_root,
            });
        }

        Ok(ValidatedBlock {
            block_hash,
            tx_root,
            state_root,
            post_state: snapshot.into_post_state(),
        })
    }

    fn check_limits(&self, block: &Block) -> Result<(), BlockError> {
        if block.header.version != BLOCK_VERSION {
            return Err(BlockError::UnsupportedVersion(block.header.version));
        }

        let count = block.transactions.len();
        if count > self.cfg().max_block_txs {
            return Err(BlockError::TooManyTransactions {
                count,
                max: self.cfg().max_block_txs,
            });
        }

        let size = block.canonical_bytes().len();
        if size > self.cfg().max_block_size_bytes {
            return Err(BlockError::TooLarge {
                size,
                max: self.cfg().max_block_size_bytes,
            });
        }
        Ok(())
    }

    fn check_parent<S>(&self, block: &Block, state: &S) -> Result<(), BlockError>
    where
        S: StateService + ?Sized,
    {
        let header = &block.header;
        if header.height == 0 {
            if !header.parent_hash.is_zero() {
                return Err(BlockError::GenesisParentNotZero(header.parent_hash));
            }
            return Ok(());
        }

        let parent_height = header.height - 1;
        let parent = state
            .get_block(parent_height)?
            .ok_or(BlockError::UnknownParent(parent_height))?;
        let expected = parent.hash();
        if expected != header.parent_hash {
            return Err(BlockError::ParentMismatch {
                expected,
                declared: header.parent_hash,
            });
        }
        Ok(())
    }

    fn check_proposer(&self, block: &Block, block_hash: &Hash256) -> Result<(), BlockError> {
        if !self.cfg().require_proposer_signature {
            return Ok(());
        }
        let recovered = self
            .txs
            .recovery()
            .recover(block_hash, &block.proposer_signature)
            .map_err(|e| BlockError::ProposerSignature(e.to_string()))?;
        if recovered != block.header.proposer {
            return Err(BlockError::ProposerSignature(format!(
                "recovers to {recovered}, expected {}",
                block.header.proposer
            )));
        }
        Ok(())
    }

    /// Validates every transaction independently and in parallel.
    ///
    /// The k-th transaction of a sender within the block expects nonce
    /// `committed + k`; everything else reads committed state only.
    fn check_transactions<S>(&self, block: &Block, state: &S) -> Result<(), BlockError>
    where
        S: StateService + ?Sized,
    {
        let mut per_sender: HashMap<Address, u64> = HashMap::new();
        let offsets: Vec<u64> = block
            .transactions
            .iter()
            .map(|tx| {
                let seen = per_sender.entry(tx.from).or_insert(0);
                let offset = *seen;
                *seen += 1;
                offset
            })
            .collect();

        let failures: Vec<TxFailure> = block
            .transactions
            .par_iter()
            .zip(offsets.par_iter())
            .enumerate()
            .filter_map(|(index, (tx, offset))| {
                self.txs
                    .validate_with_nonce_offset(tx, state, *offset)
                    .err()
                    .map(|error| TxFailure {
                        index,
                        hash: tx.hash,
                        error,
                    })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BlockError::InvalidTransactions(failures))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::state::{AccountState, StateError};
    use crate::types::{ADDRESS_LEN, Checkpoint, Header, SignatureBytes, Transaction, U256};
    use crate::validation::error::{ErrorClass, HistoryError, TxError};
    use std::collections::BTreeMap;

    /// Committed state + block history for tests.
    #[derive(Default)]
    pub(crate) struct TestChain {
        pub accounts: BTreeMap<Address, AccountState>,
        pub blocks: Vec<Block>,
    }

    impl StateService for TestChain {
        fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
            Ok(self.accounts.get(address).map_or(0, |a| a.nonce))
        }

        fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
            Ok(self.accounts.get(address).map_or(U256::zero(), |a| a.balance))
        }

        fn get_block(&self, height: u64) -> Result<Option<Block>, StateError> {
            Ok(self.blocks.get(height as usize).cloned())
        }
    }

    pub(crate) fn proposer() -> Keypair {
        Keypair::from_seed(b"proposer").unwrap()
    }

    pub(crate) fn user(seed: &str) -> Keypair {
        Keypair::from_seed(seed.as_bytes()).unwrap()
    }

    pub(crate) fn transfer(from: &Keypair, nonce: u64, value: u64) -> Transaction {
        from.sign_transaction(Transaction {
            hash: Hash256::ZERO,
            from: Address::ZERO,
            to: Some(Address([0xEEu8; ADDRESS_LEN])),
            value: U256::from(value),
            nonce,
            gas_limit: 21_000,
            gas_price: U256::one(),
            data: None,
            signature: SignatureBytes::default(),
        })
        .unwrap()
    }

    /// Builds a correctly committed, signed block on top of `chain`.
    pub(crate) fn build_block(chain: &TestChain, txs: Vec<Transaction>) -> Block {
        let height = chain.blocks.len() as u64;
        let parent_hash = chain.blocks.last().map_or(Hash256::ZERO, Block::hash);

        let mut snapshot = StateSnapshot::new(chain);
        snapshot.apply_all(&txs).expect("test txs apply");
        let kp = proposer();

        let mut block = Block {
            header: Header {
                version: BLOCK_VERSION,
                height,
                parent_hash,
                tx_root: merkle_root(&txs.iter().map(|t| t.hash).collect::<Vec<_>>()),
                state_root: snapshot.root(),
                timestamp: 1_700_000_000 + height,
                proposer: kp.address(),
            },
            transactions: txs,
            history_proof: Vec::new(),
            proposer_signature: SignatureBytes::default(),
        };
        resign(&mut block);
        block
    }

    pub(crate) fn resign(block: &mut Block) {
        block.proposer_signature = proposer().sign_prehash(&block.hash()).unwrap();
    }

    pub(crate) fn funded_chain(users: &[&Keypair], balance: u64) -> TestChain {
        let mut chain = TestChain::default();
        for kp in users {
            chain.accounts.insert(
                kp.address(),
                AccountState {
                    balance: U256::from(balance),
                    nonce: 0,
                },
            );
        }
        chain
    }

    fn validator() -> BlockValidator {
        BlockValidator::new(ValidationConfig::default())
    }

    #[test]
    fn valid_genesis_block_passes_and_is_deterministic() {
        let alice = user("alice");
        let chain = funded_chain(&[&alice], 1_000_000);
        let block = build_block(&chain, vec![transfer(&alice, 0, 10)]);

        let a = validator().validate(&block, &chain).expect("valid");
        let b = validator().validate(&block, &chain).expect("valid");
        assert_eq!(a.state_root, b.state_root);
        assert_eq!(a.tx_root, b.tx_root);
        assert_eq!(a.block_hash, block.hash());
        assert_eq!(a.post_state.len(), 2);
    }

    #[test]
    fn genesis_with_nonzero_parent_is_rejected_regardless_of_content() {
        let alice = user("alice");
        let chain = funded_chain(&[&alice], 1_000_000);

        for txs in [vec![], vec![transfer(&alice, 0, 10)]] {
            let mut block = build_block(&chain, txs);
            block.header.parent_hash = Hash256([1u8; 32]);
            resign(&mut block);
            let err = validator().validate(&block, &chain).unwrap_err();
            assert!(matches!(err, BlockError::GenesisParentNotZero(_)), "{err}");
        }
    }

    #[test]
    fn child_block_must_link_to_stored_parent() {
        let alice = user("alice");
        let mut chain = funded_chain(&[&alice], 1_000_000);
        let genesis = build_block(&chain, vec![]);
        chain.blocks.push(genesis);

        let child = build_block(&chain, vec![]);
        assert!(validator().validate(&child, &chain).is_ok());

        let mut forged = child.clone();
        forged.header.parent_hash = Hash256([3u8; 32]);
        resign(&mut forged);
        assert!(matches!(
            validator().validate(&forged, &chain),
            Err(BlockError::ParentMismatch { .. })
        ));

        let mut orphan = child;
        orphan.header.height = 5;
        resign(&mut orphan);
        assert_eq!(
            validator().validate(&orphan, &chain).unwrap_err(),
            BlockError::UnknownParent(4)
        );
    }

    #[test]
    fn all_transaction_failures_are_collected() {
        let alice = user("alice");
        let bob = user("bob");
        let chain = funded_chain(&[&alice, &bob], 1_000_000);

        let good = transfer(&alice, 0, 1);
        let bad_nonce = transfer(&bob, 7, 1);
        let mut bad_hash = transfer(&bob, 0, 1);
        bad_hash.hash = Hash256([9u8; 32]);

        let block = build_block(&chain, vec![good.clone()]);
        let mut block = Block {
            transactions: vec![good, bad_nonce, bad_hash],
            ..block
        };
        resign(&mut block);

        match validator().validate(&block, &chain).unwrap_err() {
            BlockError::InvalidTransactions(failures) => {
                let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
                assert_eq!(indices, vec![1, 2]);
                assert!(matches!(failures[0].error, TxError::BadNonce { .. }));
                assert!(matches!(failures[1].error, TxError::HashMismatch { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn same_sender_sequence_within_block_is_accepted() {
        let alice = user("alice");
        let chain = funded_chain(&[&alice], 1_000_000);
        let txs = vec![
            transfer(&alice, 0, 1),
            transfer(&alice, 1, 1),
            transfer(&alice, 2, 1),
        ];
        let block = build_block(&chain, txs);
        let validated = validator().validate(&block, &chain).expect("valid sequence");
        assert_eq!(validated.post_state[&alice.address()].nonce, 3);
    }

    #[test]
    fn cumulative_overspend_fails_on_application() {
        let alice = user("alice");
        // Each tx costs 21_000 + 10_000; the pair needs 62_000.
        let chain = funded_chain(&[&alice], 40_000);
        let txs = vec![transfer(&alice, 0, 10_000), transfer(&alice, 1, 10_000)];

        let tx_root = merkle_root(&txs.iter().map(|t| t.hash).collect::<Vec<_>>());
        let mut block = build_block(&chain, vec![]);
        block.transactions = txs;
        block.header.tx_root = tx_root;
        resign(&mut block);

        let err = validator().validate(&block, &chain).unwrap_err();
        assert!(matches!(err, BlockError::Application { index: 1, .. }), "{err}");
        assert_eq!(err.reason_code(), "state.insufficient_balance_on_apply");
    }

    #[test]
    fn state_and_tx_root_mismatches_are_distinct() {
        let alice = user("alice");
        let chain = funded_chain(&[&alice], 1_000_000);
        let block = build_block(&chain, vec![transfer(&alice, 0, 10)]);

        let mut bad_state = block.clone();
        bad_state.header.state_root = Hash256([1u8; 32]);
        resign(&mut bad_state);
        assert!(matches!(
            validator().validate(&bad_state, &chain),
            Err(BlockError::StateRootMismatch { .. })
        ));

        let mut bad_txs = block;
        bad_txs.header.tx_root = Hash256([1u8; 32]);
        resign(&mut bad_txs);
        let err = validator().validate(&bad_txs, &chain).unwrap_err();
        assert!(matches!(err, BlockError::TxRootMismatch { .. }));
        assert_eq!(err.class(), ErrorClass::StateMismatch);
    }

    #[test]
    fn reordering_changes_tx_root() {
        let alice = user("alice");
        let bob = user("bob");
        let chain = funded_chain(&[&alice, &bob], 1_000_000);
        let block = build_block(&chain, vec![transfer(&alice, 0, 1), transfer(&bob, 0, 2)]);

        let mut swapped = block.clone();
        swapped.transactions.swap(0, 1);
        resign(&mut swapped);
        assert!(matches!(
            validator().validate(&swapped, &chain),
            Err(BlockError::TxRootMismatch { .. })
        ));
    }

    #[test]
    fn proposer_signature_is_checked() {
        let chain = TestChain::default();
        let mut block = build_block(&chain, vec![]);
        block.proposer_signature = user("mallory").sign_prehash(&block.hash()).unwrap();
        assert!(matches!(
            validator().validate(&block, &chain),
            Err(BlockError::ProposerSignature(_))
        ));

        let relaxed = BlockValidator::new(ValidationConfig {
            require_proposer_signature: false,
            ..ValidationConfig::default()
        });
        assert!(relaxed.validate(&block, &chain).is_ok());
    }

    #[test]
    fn broken_history_proof_fails_whole_block() {
        let chain = TestChain::default();
        let mut block = build_block(&chain, vec![]);
        let first = Checkpoint {
            sequence: 0,
            timestamp: 10,
            content_hash: Hash256::compute(b"a"),
            prev_hash: Hash256::ZERO,
        };
        let mut second = first.next(11, Hash256::compute(b"b")).unwrap();
        second.prev_hash = Hash256::ZERO;
        block.history_proof = vec![first, second];

        assert_eq!(
            validator().validate(&block, &chain).unwrap_err(),
            BlockError::HistoryProof(HistoryError::BrokenLink { index: 1 })
        );
    }

    #[test]
    fn limits_are_checked_first() {
        let alice = user("alice");
        let chain = funded_chain(&[&alice], 1_000_000);
        let block = build_block(&chain, vec![transfer(&alice, 0, 1), transfer(&alice, 1, 1)]);

        let tight = BlockValidator::new(ValidationConfig {
            max_block_txs: 1,
            ..ValidationConfig::default()
        });
        assert!(matches!(
            tight.validate(&block, &chain),
            Err(BlockError::TooManyTransactions { count: 2, max: 1 })
        ));

        let tiny = BlockValidator::new(ValidationConfig {
            max_block_size_bytes: 1,
            ..ValidationConfig::default()
        });
        assert!(matches!(
            tiny.validate(&block, &chain),
            Err(BlockError::TooLarge { .. })
        ));
    }
}

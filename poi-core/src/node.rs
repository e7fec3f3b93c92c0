//! Validator node: validation, consensus and commit for incoming blocks.
//!
//! At most one consensus round is in flight. Importing a new block cancels
//! the round it supersedes through its [`CancellationToken`]; the
//! superseded import returns [`ConsensusError::Cancelled`] and leaves no
//! trace in the store, the pool or the consensus log.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consensus::{ConsensusError, ConsensusResult, ProofOfIntelligence, Proposer, ProposerError};
use crate::crypto::{Secp256k1Recovery, SignatureRecovery};
use crate::pipeline::{BlockValidationGate, PendingPool};
use crate::storage::{ChainStore, StorageError};
use crate::types::Block;
use crate::validation::{BlockError, HistoryEngine, PermissiveHistoryEngine};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("block rejected: {0}")]
    Validation(#[from] BlockError),

    #[error("consensus: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("proposal: {0}")]
    Proposal(#[from] ProposerError),
}

#[derive(Default)]
struct RoundSlot {
    next_id: u64,
    current: Option<(u64, CancellationToken)>,
}

pub struct ValidatorNode<C: ?Sized, R = Secp256k1Recovery, H = PermissiveHistoryEngine> {
    store: Arc<C>,
    gate: BlockValidationGate<R, H>,
    consensus: ProofOfIntelligence,
    pending: PendingPool,
    log: Mutex<Vec<ConsensusResult>>,
    round: Mutex<RoundSlot>,
    shutdown: CancellationToken,
}

impl<C, R, H> ValidatorNode<C, R, H>
where
    C: ChainStore + ?Sized + 'static,
    R: SignatureRecovery + 'static,
    H: HistoryEngine + 'static,
{
    pub fn new(
        store: Arc<C>,
        gate: BlockValidationGate<R, H>,
        consensus: ProofOfIntelligence,
        pending: PendingPool,
    ) -> Self {
        Self {
            store,
            gate,
            consensus,
            pending,
            log: Mutex::new(Vec::new()),
            round: Mutex::new(RoundSlot::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }

    pub fn pending(&self) -> &PendingPool {
        &self.pending
    }

    /// Finalized rounds in import order, accepted or not.
    pub fn consensus_log(&self) -> Vec<ConsensusResult> {
        lock(&self.log).clone()
    }

    /// Cancels the in-flight round, if any, and refuses new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Builds a block on the current tip from the pending pool.
    pub fn propose(&self, proposer: &Proposer, timestamp: u64) -> Result<Option<Block>, NodeError> {
        let tip = self.store.tip()?;
        let mut pool = self.pending.clone();
        Ok(proposer.build_block(self.store.as_ref(), tip.as_ref(), &mut pool, timestamp)?)
    }

    /// Validates `block`, runs a consensus round on it and commits it if
    /// the committee accepts.
    ///
    /// A block the committee rejects is not an error: the round result is
    /// returned with `accepted == false` and the block is not committed.
    pub async fn import_block(&self, block: Block) -> Result<ConsensusResult, NodeError> {
        let block = Arc::new(block);
        let (round_id, cancel) = self.begin_round();
        let outcome = self.run_round(block, &cancel).await;
        self.end_round(round_id);
        outcome
    }

    async fn run_round(
        &self,
        block: Arc<Block>,
        cancel: &CancellationToken,
    ) -> Result<ConsensusResult, NodeError> {
        let validated = self.gate.validate(block.clone(), self.store.clone()).await?;
        debug!(height = block.height(), block_hash = %validated.block_hash, "block validated");

        let result = self.consensus.finalize(block.clone(), cancel).await?;

        if result.accepted {
            self.store.commit_block(&block, &validated.post_state)?;
            let pruned = self.pending.remove_committed(&block);
            info!(
                height = result.height,
                block_hash = %result.block_hash,
                txs = block.transactions.len(),
                pruned,
                "block committed"
            );
        } else {
            warn!(
                height = result.height,
                block_hash = %result.block_hash,
                approvals = result.approvals,
                required = result.required_approvals,
                "block rejected by committee"
            );
        }

        lock(&self.log).push(result.clone());
        Ok(result)
    }

    fn begin_round(&self) -> (u64, CancellationToken) {
        let mut slot = lock(&self.round);
        if let Some((id, superseded)) = slot.current.take() {
            debug!(round = id, "cancelling superseded round");
            superseded.cancel();
        }
        let id = slot.next_id;
        slot.next_id += 1;
        let token = self.shutdown.child_token();
        slot.current = Some((id, token.clone()));
        (id, token)
    }

    fn end_round(&self, id: u64) {
        let mut slot = lock(&self.round);
        if slot.current.as_ref().is_some_and(|(current, _)| *current == id) {
            slot.current = None;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::collector::tests::registry_with;
    use crate::consensus::{
        DeterministicChallengeGenerator, PoiConfig, ProposerConfig, SimulatedBehavior,
    };
    use crate::evaluator::ReferenceEvaluator;
    use crate::state::StateService;
    use crate::storage::InMemoryChainStore;
    use crate::types::U256;
    use crate::validation::block::tests::{build_block, funded_chain, proposer, transfer, user};
    use crate::validation::{BlockValidator, ValidationConfig};
    use std::time::Duration;

    async fn node(
        behaviors: &[(SimulatedBehavior, u64)],
        store: InMemoryChainStore,
    ) -> ValidatorNode<InMemoryChainStore> {
        let (registry, _) = registry_with(behaviors).await;
        let consensus = ProofOfIntelligence::new(
            PoiConfig::default(),
            registry,
            Arc::new(DeterministicChallengeGenerator),
            Arc::new(ReferenceEvaluator),
        );
        let gate = BlockValidationGate::new(
            Arc::new(BlockValidator::new(ValidationConfig::default())),
            2,
            None,
        );
        ValidatorNode::new(Arc::new(store), gate, consensus, PendingPool::new())
    }

    fn block_proposer() -> Proposer {
        Proposer::new(proposer(), ProposerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_blocks_are_committed_and_pruned() {
        let alice = user("alice");
        let store = InMemoryChainStore::with_genesis([(alice.address(), U256::from(1_000_000u64))]);
        let node = node(&[(SimulatedBehavior::Honest, 10); 4], store).await;

        node.pending().insert(transfer(&alice, 0, 5));
        node.pending().insert(transfer(&alice, 1, 5));
        let block = node.propose(&block_proposer(), 1_700_000_000).unwrap().unwrap();
        assert_eq!(block.transactions.len(), 2);

        let result = node.import_block(block.clone()).await.unwrap();
        assert!(result.accepted);
        assert_eq!(node.store().tip().unwrap(), Some(block));
        assert_eq!(node.store().get_nonce(&alice.address()).unwrap(), 2);
        assert!(node.pending().is_empty());
        assert_eq!(node.consensus_log(), vec![result]);

        let next = node.propose(&block_proposer(), 1_700_000_005).unwrap().unwrap();
        assert_eq!(next.header.height, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn imported_blocks_evict_pending_transactions_with_used_nonces() {
        let alice = user("alice");
        let store = InMemoryChainStore::with_genesis([(alice.address(), U256::from(1_000_000u64))]);
        let node = node(&[(SimulatedBehavior::Honest, 10); 4], store).await;
        let local = transfer(&alice, 0, 5);
        node.pending().insert(local.clone());

        let foreign = build_block(
            &funded_chain(&[&alice], 1_000_000),
            vec![transfer(&alice, 0, 7)],
        );
        assert!(node.import_block(foreign).await.unwrap().accepted);
        assert!(!node.pending().contains(&local.hash));
        assert_eq!(node.pending().next_nonce(&alice.address(), 1), 1);

        node.pending().insert(transfer(&alice, 1, 5));
        let next = node.propose(&block_proposer(), 1_700_000_005).unwrap().unwrap();
        assert_eq!(next.transactions.len(), 1);
        assert_eq!(next.transactions[0].nonce, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_blocks_never_reach_consensus() {
        let node = node(&[(SimulatedBehavior::Honest, 10); 4], InMemoryChainStore::new()).await;
        let mut block = node.propose(&block_proposer(), 1).unwrap().unwrap();
        block.header.state_root = crate::types::Hash256::compute(b"forged");

        let err = node.import_block(block).await.unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
        assert!(node.consensus_log().is_empty());
        assert_eq!(node.store().tip_height().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_blocks_are_logged_not_committed() {
        let mut behaviors = vec![(SimulatedBehavior::Dissenting, 10); 3];
        behaviors.push((SimulatedBehavior::Honest, 10));
        let node = node(&behaviors, InMemoryChainStore::new()).await;
        let block = node.propose(&block_proposer(), 1).unwrap().unwrap();

        let result = node.import_block(block).await.unwrap();
        assert!(!result.accepted);
        assert_eq!(node.consensus_log().len(), 1);
        assert_eq!(node.store().tip_height().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_import_cancels_the_superseded_round() {
        let node = Arc::new(
            node(&[(SimulatedBehavior::Unresponsive, 10); 3], InMemoryChainStore::new()).await,
        );
        let block = node.propose(&block_proposer(), 1).unwrap().unwrap();

        let first = tokio::spawn({
            let node = node.clone();
            let block = block.clone();
            async move { node.import_block(block).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = node.import_block(block).await.unwrap();
        assert!(second.accepted);

        let first = first.await.unwrap();
        assert!(matches!(
            first,
            Err(NodeError::Consensus(ConsensusError::Cancelled))
        ));
        assert_eq!(node.consensus_log().len(), 1);
    }
}

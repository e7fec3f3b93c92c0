//! Admission and block validation scheduling.
//!
//! - [`AdmissionPool`]: N workers drain a bounded `mpsc` queue of inbound
//!   transactions. [`AdmissionPool::submit`] suspends while the queue is
//!   full, so producers are slowed down instead of transactions being
//!   dropped. Accepted transactions land in a [`PendingPool`].
//! - [`PendingPool`]: de-duplicating FIFO of admitted transactions holding
//!   at most one transaction per sender and nonce; the proposer draws from
//!   it through [`TxPool`].
//! - [`BlockValidationGate`]: caps the number of in-flight block
//!   validations with a semaphore and runs each on the blocking pool, where
//!   the block validator fans transactions out over rayon.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::consensus::TxPool;
use crate::crypto::SignatureRecovery;
use crate::metrics::MetricsRegistry;
use crate::state::StateService;
use crate::types::{Address, Block, Hash256, Transaction};
use crate::storage::ChainStore;
use crate::validation::{
    BlockError, BlockValidator, HistoryEngine, TransactionValidator, TxError, ValidatedBlock,
};

/// Worker-pool and back-pressure settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Admission workers; defaults to the number of available cores.
    pub workers: usize,
    /// Capacity of the inbound transaction queue.
    pub queue_capacity: usize,
    /// Maximum number of blocks validated concurrently.
    pub max_concurrent_blocks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            queue_capacity: 4_096,
            max_concurrent_blocks: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission queue is closed")]
    Closed,
    #[error("admission queue is full")]
    Full,
}

/// Counters kept by the admission workers.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    pub admitted: AtomicU64,
    pub rejected: AtomicU64,
    pub duplicates: AtomicU64,
}

/// Bounded, multi-worker transaction admission.
pub struct AdmissionPool {
    sender: mpsc::Sender<Transaction>,
    workers: JoinSet<()>,
    stats: Arc<AdmissionStats>,
}

impl AdmissionPool {
    /// Spawns `cfg.workers` admission workers onto the current runtime.
    ///
    /// Each worker validates against committed state, expecting the nonce
    /// that extends the sender's gap-free run of pending transactions. The
    /// pool re-checks that nonce when inserting, so two workers never admit
    /// the same sender and nonce. Same-sender sequences should be submitted
    /// in nonce order.
    pub fn spawn<S, R>(
        cfg: &PipelineConfig,
        validator: Arc<TransactionValidator<R>>,
        state: Arc<S>,
        pending: PendingPool,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self
    where
        S: StateService + ?Sized + 'static,
        R: SignatureRecovery + 'static,
    {
        let (sender, receiver) = mpsc::channel(cfg.queue_capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let stats = Arc::new(AdmissionStats::default());

        let mut workers = JoinSet::new();
        for worker in 0..cfg.workers.max(1) {
            let receiver = receiver.clone();
            let validator = validator.clone();
            let state = state.clone();
            let pending = pending.clone();
            let metrics = metrics.clone();
            let stats = stats.clone();

            workers.spawn(async move {
                loop {
                    // Hold the lock only while waiting for the next item.
                    let next = receiver.lock().await.recv().await;
                    let Some(tx) = next else {
                        break;
                    };
                    admit(
                        worker,
                        tx,
                        validator.as_ref(),
                        state.as_ref(),
                        &pending,
                        metrics.as_deref(),
                        &stats,
                    );
                }
                trace!(worker, "admission worker stopped");
            });
        }

        Self {
            sender,
            workers,
            stats,
        }
    }

    /// Enqueues `tx`, waiting for capacity if the queue is full.
    pub async fn submit(&self, tx: Transaction) -> Result<(), AdmissionError> {
        self.sender
            .send(tx)
            .await
            .map_err(|_| AdmissionError::Closed)
    }

    /// Enqueues `tx` without waiting.
    pub fn try_submit(&self, tx: Transaction) -> Result<(), AdmissionError> {
        self.sender.try_send(tx).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AdmissionError::Full,
            mpsc::error::TrySendError::Closed(_) => AdmissionError::Closed,
        })
    }

    pub fn stats(&self) -> &AdmissionStats {
        &self.stats
    }

    /// Closes the queue, lets the workers drain what is already queued and
    /// waits for them to exit.
    pub async fn shutdown(self) -> Arc<AdmissionStats> {
        let Self {
            sender,
            mut workers,
            stats,
        } = self;
        drop(sender);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "admission worker failed");
            }
        }
        stats
    }
}

fn admit<S, R>(
    worker: usize,
    tx: Transaction,
    validator: &TransactionValidator<R>,
    state: &S,
    pending: &PendingPool,
    metrics: Option<&MetricsRegistry>,
    stats: &AdmissionStats,
) where
    S: StateService + ?Sized,
    R: SignatureRecovery,
{
    if pending.contains(&tx.hash) {
        stats.duplicates.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let admitted = pending
        .nonce_offset(&tx.from, state)
        .and_then(|offset| validator.validate_with_nonce_offset(&tx, state, offset))
        .and_then(|()| pending.insert_next(tx.clone(), state));

    match admitted {
        Ok(true) => {
            stats.admitted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {
            stats.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            if let Some(m) = metrics {
                m.validation
                    .tx_rejected_total
                    .with_label_values(&[e.class().as_str()])
                    .inc();
            }
            debug!(
                worker,
                tx = %tx.hash,
                reason = e.reason_code(),
                error = %e,
                "transaction rejected"
            );
        }
    }
}

#[derive(Debug, Default)]
struct PendingInner {
    next_seq: u64,
    by_seq: BTreeMap<u64, Transaction>,
    seq_by_hash: HashMap<Hash256, u64>,
    // sender -> nonce -> seq
    by_sender: HashMap<Address, BTreeMap<u64, u64>>,
}

impl PendingInner {
    /// Length of the gap-free run of `sender`'s nonces starting at `from`.
    fn run_from(&self, sender: &Address, from: u64) -> u64 {
        let Some(nonces) = self.by_sender.get(sender) else {
            return 0;
        };
        let mut next = from;
        for nonce in nonces.range(from..).map(|(n, _)| *n) {
            if nonce != next {
                break;
            }
            match next.checked_add(1) {
                Some(n) => next = n,
                None => break,
            }
        }
        next - from
    }

    fn push(&mut self, tx: Transaction) -> bool {
        if self.seq_by_hash.contains_key(&tx.hash) {
            return false;
        }
        let nonces = self.by_sender.entry(tx.from).or_default();
        if nonces.contains_key(&tx.nonce) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        nonces.insert(tx.nonce, seq);
        self.seq_by_hash.insert(tx.hash, seq);
        self.by_seq.insert(seq, tx);
        true
    }

    fn remove_seq(&mut self, seq: u64) -> bool {
        let Some(tx) = self.by_seq.remove(&seq) else {
            return false;
        };
        self.seq_by_hash.remove(&tx.hash);
        if let Some(nonces) = self.by_sender.get_mut(&tx.from) {
            nonces.remove(&tx.nonce);
            if nonces.is_empty() {
                self.by_sender.remove(&tx.from);
            }
        }
        true
    }

    fn remove_hash(&mut self, hash: &Hash256) -> bool {
        match self.seq_by_hash.get(hash).copied() {
            Some(seq) => self.remove_seq(seq),
            None => false,
        }
    }

    /// Drops `sender`'s transactions with a nonce below `nonce`.
    fn remove_below(&mut self, sender: &Address, nonce: u64) -> usize {
        let stale: Vec<u64> = self
            .by_sender
            .get(sender)
            .map(|nonces| nonces.range(..nonce).map(|(_, seq)| *seq).collect())
            .unwrap_or_default();
        stale.into_iter().filter(|seq| self.remove_seq(*seq)).count()
    }
}

/// Admitted, not-yet-committed transactions in arrival order.
///
/// Holds at most one transaction per `(sender, nonce)`. Cheap to clone;
/// clones share the same pool.
#[derive(Clone, Debug, Default)]
pub struct PendingPool {
    inner: Arc<Mutex<PendingInner>>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `tx` unless its hash, or its sender and nonce, are already
    /// pending.
    pub fn insert(&self, tx: Transaction) -> bool {
        self.lock().push(tx)
    }

    /// Adds `tx` if its nonce extends the sender's pending run on top of
    /// committed state.
    ///
    /// The committed nonce is read while the pool is locked, so concurrent
    /// callers cannot both take the same slot. Returns `Ok(false)` for a
    /// transaction that is already pending.
    pub fn insert_next<S>(&self, tx: Transaction, state: &S) -> Result<bool, TxError>
    where
        S: StateService + ?Sized,
    {
        let mut inner = self.lock();
        if inner.seq_by_hash.contains_key(&tx.hash) {
            return Ok(false);
        }
        let committed = state.get_nonce(&tx.from)?;
        let expected = committed.saturating_add(inner.run_from(&tx.from, committed));
        if tx.nonce != expected {
            return Err(TxError::BadNonce {
                expected,
                actual: tx.nonce,
            });
        }
        Ok(inner.push(tx))
    }

    /// Number of `sender`'s pending transactions that directly follow its
    /// committed nonce.
    pub fn nonce_offset<S>(&self, sender: &Address, state: &S) -> Result<u64, TxError>
    where
        S: StateService + ?Sized,
    {
        let inner = self.lock();
        let committed = state.get_nonce(sender)?;
        Ok(inner.run_from(sender, committed))
    }

    /// Next nonce `sender` should use, given its committed nonce.
    pub fn next_nonce(&self, sender: &Address, committed: u64) -> u64 {
        committed.saturating_add(self.lock().run_from(sender, committed))
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.lock().seq_by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.lock().by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops transactions included in a committed block, then every pending
    /// transaction whose nonce the block used up, including different
    /// transactions that reused one of its nonces.
    pub fn remove_committed(&self, block: &Block) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        let mut next_nonce: HashMap<Address, u64> = HashMap::new();
        for tx in &block.transactions {
            if inner.remove_hash(&tx.hash) {
                removed += 1;
            }
            let next = tx.nonce.saturating_add(1);
            next_nonce
                .entry(tx.from)
                .and_modify(|n| *n = (*n).max(next))
                .or_insert(next);
        }
        for (sender, nonce) in next_nonce {
            let stale = inner.remove_below(&sender, nonce);
            if stale > 0 {
                debug!(%sender, stale, "evicted pending transactions with used nonces");
            }
            removed += stale;
        }
        removed
    }
}

impl TxPool for PendingPool {
    /// Oldest-first selection bounded by count and encoded size. Each
    /// sender's transactions come out in nonce order, in the positions its
    /// transactions arrived in. Selected transactions stay pending until
    /// [`PendingPool::remove_committed`].
    fn select_for_block(&mut self, max_txs: usize, max_bytes: usize) -> Vec<Transaction> {
        let inner = self.lock();
        let mut out = Vec::new();
        let mut bytes = 0usize;
        for tx in inner.by_seq.values() {
            if out.len() >= max_txs {
                break;
            }
            let size = tx.encoded_len();
            if bytes + size > max_bytes {
                break;
            }
            bytes += size;
            out.push(tx.clone());
        }
        drop(inner);

        let mut slots: HashMap<Address, Vec<usize>> = HashMap::new();
        for (i, tx) in out.iter().enumerate() {
            slots.entry(tx.from).or_default().push(i);
        }
        for positions in slots.values().filter(|p| p.len() > 1) {
            let mut txs: Vec<Transaction> = positions.iter().map(|&i| out[i].clone()).collect();
            txs.sort_by_key(|t| t.nonce);
            for (&i, tx) in positions.iter().zip(txs) {
                out[i] = tx;
            }
        }
        out
    }

    fn evict(&mut self, hashes: &[Hash256]) {
        let mut inner = self.lock();
        let removed = hashes.iter().filter(|h| inner.remove_hash(h)).count();
        trace!(removed, "evicted unincludable transactions");
    }
}

/// Bounds concurrent block validations.
pub struct BlockValidationGate<R, H> {
    permits: Arc<Semaphore>,
    validator: Arc<BlockValidator<R, H>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl<R, H> Clone for BlockValidationGate<R, H> {
    fn clone(&self) -> Self {
        Self {
            permits: self.permits.clone(),
            validator: self.validator.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<R, H> BlockValidationGate<R, H>
where
    R: SignatureRecovery + 'static,
    H: HistoryEngine + 'static,
{
    pub fn new(
        validator: Arc<BlockValidator<R, H>>,
        max_concurrent: usize,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            validator,
            metrics,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a permit, then validates `block` on the blocking pool
    /// against one consistent read of `store`.
    pub async fn validate<C>(
        &self,
        block: Arc<Block>,
        store: Arc<C>,
    ) -> Result<ValidatedBlock, BlockError>
    where
        C: ChainStore + ?Sized + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BlockError::Internal("validation gate closed".to_string()))?;

        let validator = self.validator.clone();
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            store.read_consistent(|view| validator.validate(&block, view))
        })
        .await
        .map_err(|e| BlockError::Internal(e.to_string()))?
        .unwrap_or_else(|e| Err(BlockError::State(e.into())));

        if let Some(m) = &self.metrics {
            m.consensus
                .block_validation_seconds
                .observe(started.elapsed().as_secs_f64());
            if let Err(e) = &result {
                m.validation
                    .blocks_rejected_total
                    .with_label_values(&[e.reason_code()])
                    .inc();
            }
        }
        result
    }
}

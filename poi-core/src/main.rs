// src/main.rs
//
// Demo validator node wiring up the library:
//
// - RocksDB-backed chain store seeded with a few funded accounts
// - admission workers feeding a pending pool from a synthetic load generator
// - block validation gate + Proof-of-Intelligence consensus over simulated
//   validators (reference or HTTP solution evaluator)
// - Prometheus metrics exporter on /metrics
// - a loop that proposes and imports a block every `block_time_secs`.
//
// Configuration is read from the JSON file named by `POI_CONFIG`, if set.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use poi_core::consensus::DeterministicChallengeGenerator;
use poi_core::{
    ADDRESS_LEN, Address, AdmissionPool, BlockValidationGate, BlockValidator, ChainConfig,
    Hash256, HttpSolutionEvaluator, InMemoryValidatorRegistry, Keypair, MetricsRegistry,
    PendingPool, PerformanceMetrics, ProofOfIntelligence, Proposer, ReferenceEvaluator,
    RocksDbChainStore, SignatureBytes, SimulatedBehavior, SimulatedEndpoint, SolutionEvaluator,
    StateService, Transaction, TransactionValidator, U256, Validator, ValidatorId, ValidatorNode,
    run_prometheus_http_server,
};

const DEMO_USERS: usize = 4;
const DEMO_VALIDATORS: usize = 24;
const GENESIS_BALANCE: u64 = 1_000_000_000;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("poi_node=info,poi_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run_node().await {
        error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

async fn run_node() -> Result<(), String> {
    let cfg = match std::env::var("POI_CONFIG") {
        Ok(path) => ChainConfig::from_json_file(&path).map_err(|e| e.to_string())?,
        Err(_) => {
            let cfg = ChainConfig::default();
            cfg.validate().map_err(|e| e.to_string())?;
            cfg
        }
    };

    // ---------------------------
    // Metrics registry + exporter
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new()
            .map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if cfg.metrics.enabled {
        let metrics = metrics.clone();
        let addr = cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics, addr).await {
                error!(error = %e, "metrics HTTP server error");
            }
        });
    }

    // ---------------------------
    // Storage backend (RocksDB)
    // ---------------------------

    let store = Arc::new(RocksDbChainStore::open(&cfg.storage).map_err(|e| {
        format!("failed to open RocksDB store at {}: {e}", cfg.storage.path)
    })?);

    let users = (0..DEMO_USERS)
        .map(|i| Keypair::from_seed(format!("demo-user-{i}").as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    let seeded = store
        .seed_genesis(
            users
                .iter()
                .map(|kp| (kp.address(), U256::from(GENESIS_BALANCE))),
        )
        .map_err(|e| e.to_string())?;
    info!(seeded, "genesis accounts ready");

    // ---------------------------
    // Simulated validator roster
    // ---------------------------

    let registry = Arc::new(InMemoryValidatorRegistry::default());
    for i in 0..DEMO_VALIDATORS {
        let behavior = match i % 12 {
            10 => SimulatedBehavior::Unresponsive,
            11 => SimulatedBehavior::WrongAnswer,
            _ => SimulatedBehavior::Honest,
        };
        let validator = Validator {
            id: ValidatorId::new(format!("sim-{i:02}")),
            address: Address([i as u8; ADDRESS_LEN]),
            stake: U256::from(1_000u64 * (i as u64 + 1)),
            metrics: PerformanceMetrics::default(),
        };
        let latency = Duration::from_millis(50 + 20 * i as u64);
        registry
            .register(validator, Arc::new(SimulatedEndpoint::new(behavior, latency)))
            .await;
    }

    // ---------------------------
    // Consensus
    // ---------------------------

    let evaluator: Arc<dyn SolutionEvaluator> = if cfg.evaluator.enabled {
        Arc::new(HttpSolutionEvaluator::from_config(&cfg.evaluator).map_err(|e| e.to_string())?)
    } else {
        Arc::new(ReferenceEvaluator)
    };
    let consensus = ProofOfIntelligence::new(
        cfg.consensus.clone(),
        registry,
        Arc::new(DeterministicChallengeGenerator),
        evaluator,
    )
    .with_metrics(metrics.clone());

    // ---------------------------
    // Validation pipeline + node
    // ---------------------------

    let pending = PendingPool::new();
    let admission = AdmissionPool::spawn(
        &cfg.pipeline,
        Arc::new(TransactionValidator::new(cfg.validation.clone())),
        store.clone(),
        pending.clone(),
        Some(metrics.clone()),
    );
    let gate = BlockValidationGate::new(
        Arc::new(BlockValidator::new(cfg.validation.clone())),
        cfg.pipeline.max_concurrent_blocks,
        Some(metrics.clone()),
    );
    let node = ValidatorNode::new(store.clone(), gate, consensus, pending.clone());

    let proposer = Proposer::new(
        Keypair::from_seed(b"demo-proposer").map_err(|e| e.to_string())?,
        cfg.proposer.clone(),
    );

    let stop_load = CancellationToken::new();
    let load = tokio::spawn(generate_load(
        admission,
        store.clone(),
        pending,
        users,
        stop_load.clone(),
    ));

    info!(
        block_time_secs = cfg.proposer.block_time_secs,
        validators = DEMO_VALIDATORS,
        "starting node"
    );

    // ---------------------------
    // Main proposal loop
    // ---------------------------

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.proposer.block_time_secs.max(1)));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {}
        }

        let block = match node.propose(&proposer, current_unix_timestamp()) {
            Ok(Some(block)) => block,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "failed to propose block");
                continue;
            }
        };

        tokio::select! {
            _ = &mut ctrl_c => break,
            imported = node.import_block(block) => match imported {
                Ok(result) => info!(
                    height = result.height,
                    accepted = result.accepted,
                    mode = ?result.mode,
                    committee = result.committee_size,
                    strength = result.strength,
                    "round complete"
                ),
                Err(e) => warn!(error = %e, "block import failed"),
            },
        }
    }

    info!("shutting down");
    node.shutdown();
    stop_load.cancel();
    if let Err(e) = load.await {
        warn!(error = %e, "load generator failed");
    }
    Ok(())
}

/// Submits one transfer per demo user every second until cancelled.
async fn generate_load(
    admission: AdmissionPool,
    store: Arc<RocksDbChainStore>,
    pending: PendingPool,
    users: Vec<Keypair>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    'outer: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for (i, user) in users.iter().enumerate() {
            let sender = user.address();
            let committed = match store.get_nonce(&sender) {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "cannot read nonce");
                    continue;
                }
            };
            let tx = Transaction {
                hash: Hash256::ZERO,
                from: sender,
                to: Some(users[(i + 1) % users.len()].address()),
                value: U256::from(1 + i as u64),
                nonce: pending.next_nonce(&sender, committed),
                gas_limit: 21_000,
                gas_price: U256::one(),
                data: None,
                signature: SignatureBytes::default(),
            };
            let tx = match user.sign_transaction(tx) {
                Ok(tx) => tx,
                Err(e) => {
                    warn!(error = %e, "cannot sign demo transaction");
                    continue;
                }
            };
            if admission.submit(tx).await.is_err() {
                break 'outer;
            }
        }
    }

    let stats = admission.shutdown().await;
    info!(
        admitted = stats.admitted.load(Ordering::Relaxed),
        rejected = stats.rejected.load(Ordering::Relaxed),
        duplicates = stats.duplicates.load(Ordering::Relaxed),
        "admission stopped"
    );
}

/// Returns the current wall-clock time as seconds since Unix epoch.
///
/// On error (system clock before epoch) this falls back to 0.
fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

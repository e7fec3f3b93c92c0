//! Validator-node core.
//!
//! This crate provides the critical path of a validator node:
//!
//! - strongly-typed domain types (`types`) and signatures (`crypto`),
//! - Merkle and state-root commitments (`merkle`, `state`),
//! - transaction, block and history-proof validation (`validation`),
//! - admission workers and the block validation gate (`pipeline`),
//! - Proof-of-Intelligence consensus (`consensus`, `evaluator`),
//! - storage backends (`storage`),
//! - Prometheus-based metrics (`metrics`),
//! - the node orchestration (`node`) and its configuration (`config`).

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod evaluator;
pub mod merkle;
pub mod metrics;
pub mod node;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod types;
pub mod validation;

// Re-export top-level configuration types.
pub use config::{ChainConfig, ConfigError, MetricsConfig};

// Re-export "core" consensus types and traits.
pub use consensus::{
    ConsensusError, ConsensusMode, ConsensusResult, InMemoryValidatorRegistry, PoiConfig,
    ProofOfIntelligence, Proposer, ProposerConfig, SimulatedBehavior, SimulatedEndpoint, TxPool,
    ValidatorRegistry,
};

pub use crypto::{Keypair, Secp256k1Recovery, SignatureRecovery};
pub use evaluator::{HttpSolutionEvaluator, ReferenceEvaluator, SolutionEvaluator};
pub use merkle::merkle_root;
pub use node::{NodeError, ValidatorNode};
pub use pipeline::{AdmissionPool, BlockValidationGate, PendingPool, PipelineConfig};
pub use state::{StateService, StateSnapshot};
pub use storage::{ChainStore, InMemoryChainStore, RocksDbChainStore, RocksDbConfig, StorageError};
pub use validation::{BlockError, BlockValidator, TransactionValidator, TxError, ValidationConfig};

// Re-export metrics registry and consensus metrics.
pub use metrics::{ConsensusMetrics, MetricsRegistry, run_prometheus_http_server};

// Re-export domain types at the crate root for convenience.
pub use types::*;

/// Block validator with secp256k1 signatures and no history rules beyond
/// local consistency.
pub type DefaultBlockValidator = BlockValidator<Secp256k1Recovery, validation::PermissiveHistoryEngine>;

/// Node over the RocksDB store with the default validator stack.
pub type DefaultValidatorNode = ValidatorNode<RocksDbChainStore>;

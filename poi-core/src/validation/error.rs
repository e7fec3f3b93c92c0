//! Validation error taxonomy.
//!
//! Every rejection carries a class and a stable dotted reason code so that
//! callers (peer scoring, RPC, metrics) can tell structural faults from state
//! disagreement without parsing messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoError;
use crate::state::{SnapshotError, StateError};
use crate::types::{Address, Hash256, U256};

/// Coarse class of a rejection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Malformed shape, zero addresses, bad signatures. Never retried.
    Structural,
    /// Disagreement with state: nonce, balance, gas bounds, roots.
    StateMismatch,
    /// A participant did not answer in time.
    Liveness,
    /// Unexpected failure inside the consensus pipeline.
    Protocol,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Structural => "structural",
            ErrorClass::StateMismatch => "state",
            ErrorClass::Liveness => "liveness",
            ErrorClass::Protocol => "protocol",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single transaction was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("transaction hash is zero")]
    ZeroHash,

    #[error("transaction hash {declared} does not match content hash {computed}")]
    HashMismatch { declared: Hash256, computed: Hash256 },

    #[error("sender and recipient are both the zero address")]
    ZeroAddresses,

    #[error("malformed signature: {0}")]
    MalformedSignature(CryptoError),

    #[error("bad signature: {0}")]
    BadSignature(CryptoError),

    #[error("signature recovers to {recovered}, expected sender {declared}")]
    SignerMismatch { declared: Address, recovered: Address },

    #[error("bad nonce: expected {expected}, got {actual}")]
    BadNonce { expected: u64, actual: u64 },

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("transaction cost overflows 256 bits")]
    CostOverflow,

    #[error("gas limit {gas_limit} outside [{min}, {max}]")]
    GasOutOfBounds { gas_limit: u64, min: u64, max: u64 },

    #[error("state unavailable: {0}")]
    State(StateError),
}

impl TxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TxError::ZeroHash
            | TxError::HashMismatch { .. }
            | TxError::ZeroAddresses
            | TxError::MalformedSignature(_)
            | TxError::BadSignature(_)
            | TxError::SignerMismatch { .. }
            | TxError::CostOverflow => ErrorClass::Structural,
            TxError::BadNonce { .. }
            | TxError::InsufficientBalance { .. }
            | TxError::GasOutOfBounds { .. } => ErrorClass::StateMismatch,
            TxError::State(_) => ErrorClass::Protocol,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            TxError::ZeroHash => "structural.zero_hash",
            TxError::HashMismatch { .. } => "structural.hash_mismatch",
            TxError::ZeroAddresses => "structural.zero_addresses",
            TxError::MalformedSignature(_) => "structural.malformed_signature",
            TxError::BadSignature(_) => "structural.bad_signature",
            TxError::SignerMismatch { .. } => "structural.signer_mismatch",
            TxError::CostOverflow => "structural.cost_overflow",
            TxError::BadNonce { .. } => "state.bad_nonce",
            TxError::InsufficientBalance { .. } => "state.insufficient_balance",
            TxError::GasOutOfBounds { .. } => "state.gas_out_of_bounds",
            TxError::State(_) => "protocol.state_unavailable",
        }
    }
}

impl From<StateError> for TxError {
    fn from(e: StateError) -> Self {
        TxError::State(e)
    }
}

/// Why a history proof was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("checkpoint {index}: sequence {actual} does not follow {previous}")]
    SequenceGap {
        index: usize,
        previous: u64,
        actual: u64,
    },

    #[error("checkpoint {index}: timestamp {actual} is not after {previous}")]
    NonMonotonicTimestamp {
        index: usize,
        previous: u64,
        actual: u64,
    },

    #[error("checkpoint {index}: previous-hash link is broken")]
    BrokenLink { index: usize },

    #[error("history engine rejected the proof: {0}")]
    Rejected(String),
}

impl HistoryError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            HistoryError::SequenceGap { .. } => "structural.history_sequence_gap",
            HistoryError::NonMonotonicTimestamp { .. } => "structural.history_timestamp",
            HistoryError::BrokenLink { .. } => "structural.history_broken_link",
            HistoryError::Rejected(_) => "structural.history_rejected",
        }
    }
}

/// One failed transaction inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFailure {
    pub index: usize,
    pub hash: Hash256,
    pub error: TxError,
}

impl fmt::Display for TxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx #{} ({}): {}", self.index, self.hash, self.error)
    }
}

/// Why a block was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("unsupported block version {0}")]
    UnsupportedVersion(u16),

    #[error("block has {count} txs, exceeds max_block_txs={max}")]
    TooManyTransactions { count: usize, max: usize },

    #[error("block size {size} bytes exceeds max_block_size_bytes={max}")]
    TooLarge { size: usize, max: usize },

    #[error("genesis block must have a zero parent hash, got {0}")]
    GenesisParentNotZero(Hash256),

    #[error("no stored predecessor at height {0}")]
    UnknownParent(u64),

    #[error("parent hash mismatch: expected {expected}, got {declared}")]
    ParentMismatch { expected: Hash256, declared: Hash256 },

    #[error("invalid proposer signature: {0}")]
    ProposerSignature(String),

    #[error("invalid history proof: {0}")]
    HistoryProof(#[from] HistoryError),

    #[error("{} invalid transaction(s): {}", .0.len(), join_failures(.0))]
    InvalidTransactions(Vec<TxFailure>),

    #[error("tx #{index} cannot be applied: {source}")]
    Application { index: usize, source: SnapshotError },

    #[error("state root mismatch: declared {declared}, computed {computed}")]
    StateRootMismatch { declared: Hash256, computed: Hash256 },

    #[error("transaction root mismatch: declared {declared}, computed {computed}")]
    TxRootMismatch { declared: Hash256, computed: Hash256 },

    #[error("state unavailable: {0}")]
    State(#[from] StateError),

    #[error("validation task failed: {0}")]
    Internal(String),
}

fn join_failures(failures: &[TxFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BlockError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BlockError::UnsupportedVersion(_)
            | BlockError::TooManyTransactions { .. }
            | BlockError::TooLarge { .. }
            | BlockError::GenesisParentNotZero(_)
            | BlockError::ProposerSignature(_)
            | BlockError::HistoryProof(_) => ErrorClass::Structural,
            BlockError::UnknownParent(_)
            | BlockError::ParentMismatch { .. }
            | BlockError::Application { .. }
            | BlockError::StateRootMismatch { .. }
            | BlockError::TxRootMismatch { .. } => ErrorClass::StateMismatch,
            BlockError::InvalidTransactions(failures) => {
                if failures
                    .iter()
                    .any(|f| f.error.class() == ErrorClass::Structural)
                {
                    ErrorClass::Structural
                } else {
                    ErrorClass::StateMismatch
                }
            }
            BlockError::State(_) | BlockError::Internal(_) => ErrorClass::Protocol,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            BlockError::UnsupportedVersion(_) => "structural.unsupported_version",
            BlockError::TooManyTransactions { .. } => "structural.too_many_transactions",
            BlockError::TooLarge { .. } => "structural.block_too_large",
            BlockError::GenesisParentNotZero(_) => "structural.genesis_parent",
            BlockError::ProposerSignature(_) => "structural.proposer_signature",
            BlockError::HistoryProof(e) => e.reason_code(),
            BlockError::InvalidTransactions(_) => "block.invalid_transactions",
            BlockError::UnknownParent(_) => "state.unknown_parent",
            BlockError::ParentMismatch { .. } => "state.parent_mismatch",
            BlockError::Application { .. } => "state.insufficient_balance_on_apply",
            BlockError::StateRootMismatch { .. } => "state.state_root_mismatch",
            BlockError::TxRootMismatch { .. } => "state.tx_root_mismatch",
            BlockError::State(_) => "protocol.state_unavailable",
            BlockError::Internal(_) => "protocol.internal",
        }
    }
}

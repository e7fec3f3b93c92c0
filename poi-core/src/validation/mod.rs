//! Validity predicates for transactions and blocks.
//!
//! - [`tx::TransactionValidator`]: structural, signature, nonce, balance and
//!   gas checks for a single transaction against committed state.
//! - [`history::HistoryProofChecker`]: local consistency of a block's
//!   checkpoint sequence, plus an external [`history::HistoryEngine`].
//! - [`block::BlockValidator`]: the full block predicate, producing the
//!   block's roots and post-state.
//!
//! All validators are read-only with respect to committed state and are
//! safe to call concurrently.

pub mod block;
pub mod config;
pub mod error;
pub mod history;
pub mod tx;

pub use block::{BlockValidator, ValidatedBlock};
pub use config::ValidationConfig;
pub use error::{BlockError, ErrorClass, HistoryError, TxError, TxFailure};
pub use history::{HistoryEngine, HistoryProofChecker, PermissiveHistoryEngine};
pub use tx::TransactionValidator;

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Protocol limits and switches used by transaction and block validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Smallest accepted gas limit per transaction.
    pub min_gas_limit: u64,
    /// Largest accepted gas limit per transaction.
    pub max_gas_limit: u64,
    /// Hard limit on the number of transactions per block.
    pub max_block_txs: usize,
    /// Hard limit on the canonical encoded size of a block, in bytes.
    pub max_block_size_bytes: usize,
    /// Protocol fee-sponsor account, if the network has one.
    pub sponsor_address: Option<Address>,
    /// Lets zero-price transactions from the sponsor skip signature
    /// recovery. The signature must still be well-formed.
    ///
    /// This lets one account's transactions through without proof of
    /// authorship. It only has an effect once `sponsor_address` is set, and
    /// every use is logged at `warn`.
    pub allow_sponsor_signature_bypass: bool,
    /// Require the proposer signature to recover to `header.proposer`.
    pub require_proposer_signature: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_gas_limit: 21_000,
            max_gas_limit: 30_000_000,
            max_block_txs: 10_000,
            max_block_size_bytes: 1_000_000,
            sponsor_address: None,
            allow_sponsor_signature_bypass: true,
            require_proposer_signature: true,
        }
    }
}

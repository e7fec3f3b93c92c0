// poi-core/src/types/block.rs

//! Block types and hashing.
//!
//! This module defines the block data structures used by the validator
//! core, together with a canonical hashing routine.
//!
//! Serialization is done with **bincode 2** using the `serde` integration
//! (`bincode::serde::encode_to_vec`) and an explicit `standard()` config.
//! The same canonical encoding is used everywhere we need block bytes.
//! The header carries a `version` so that the layout can evolve without
//! silently changing what existing roots commit to.

use serde::{Deserialize, Serialize};

use super::{Address, Checkpoint, Hash256, SignatureBytes, Transaction};

/// Current header layout version.
pub const BLOCK_VERSION: u16 = 1;

/// Block header: linking, commitments and proposer identity.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Encoding version, see [`BLOCK_VERSION`].
    pub version: u16,

    /// Height of this block; gapless, starting at 0 for genesis.
    pub height: u64,

    /// Hash of the block at `height - 1`, or [`Hash256::ZERO`] at genesis.
    pub parent_hash: Hash256,

    /// Declared Merkle root over the transaction hashes.
    pub tx_root: Hash256,

    /// Declared root of the post-execution state snapshot.
    pub state_root: Hash256,

    /// Wall-clock timestamp of the block, in seconds since Unix epoch.
    ///
    /// Informational only; it never takes part in validity decisions.
    pub timestamp: u64,

    /// Account that proposed this block.
    pub proposer: Address,
}

/// Block = header + transactions + optional history proof + proposer
/// signature.
///
/// A block is a proposal until consensus finalizes it; finalized blocks are
/// immutable.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    /// Ordered list of transactions included in this block.
    pub transactions: Vec<Transaction>,
    /// Hash-linked timestamped checkpoints; empty when no proof is supplied.
    pub history_proof: Vec<Checkpoint>,
    /// Proposer signature over [`Block::hash`].
    pub proposer_signature: SignatureBytes,
}

impl Header {
    /// Returns the canonical byte representation of this header.
    ///
    /// This uses **bincode 2** with the `standard()` configuration.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails. This is considered a programming
    /// error, because all fields are plain serializable values.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("Header should always be serializable with bincode 2 + serde")
    }
}

impl Block {
    /// Canonical bincode-2 encoding of the whole block.
    ///
    /// Used for size limits and persistence.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which would be a programming error.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("Block should always be serializable with bincode 2 + serde")
    }

    /// Decodes a block previously produced by [`Block::canonical_bytes`].
    pub fn from_canonical_bytes(bytes: &[u8]) -> Option<Self> {
        let cfg = bincode::config::standard();
        let (block, _): (Block, usize) = bincode::serde::decode_from_slice(bytes, cfg).ok()?;
        Some(block)
    }

    /// Computes the block hash over the canonical header bytes.
    ///
    /// The header commits to the transactions through `tx_root`, so the hash
    /// covers the body without re-encoding it. The proposer signature and
    /// the history proof are outside the hash: the signature
    /// signs it, and checkpoints are ordering evidence, not content.
    pub fn hash(&self) -> Hash256 {
        Hash256::compute(&self.header.canonical_bytes())
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Complexity score used to scale the consensus challenge and committee:
    /// `log10(Σ (payload_len + 10 · [value > 0]) + 1)`.
    pub fn complexity_score(&self) -> f64 {
        let weight: u64 = self
            .transactions
            .iter()
            .map(|tx| {
                let value_bonus = if tx.value.is_zero() { 0 } else { 10 };
                tx.payload_len() as u64 + value_bonus
            })
            .sum();
        ((weight as f64) + 1.0).log10()
    }

    pub fn tx_hashes(&self) -> Vec<Hash256> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }
}

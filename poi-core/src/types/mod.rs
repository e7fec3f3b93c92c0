//! Core domain types used by the validator core.
//!
//! This module defines strongly-typed hashes, addresses, amounts, and
//! signature bytes that are shared across validation and consensus. The goal
//! is to avoid "naked" byte buffers in public APIs and instead use
//! domain-specific newtypes with deterministic byte encodings, because every
//! commitment in the chain (transaction ids, block hashes, Merkle nodes,
//! state roots) is computed over those encodings.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod block;
pub mod history;
pub mod tx;
pub mod validator;

pub use block::{BLOCK_VERSION, Block, Header};
pub use history::{Checkpoint, SequenceOverflow};
pub use tx::Transaction;
pub use validator::{PerformanceMetrics, Validator, ValidatorId};

/// 256-bit unsigned integer used for balances, values, gas prices and stake.
pub use primitive_types::U256;

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Length in bytes of an account address.
pub const ADDRESS_LEN: usize = 20;

/// Strongly-typed 256-bit hash wrapper (BLAKE3-256).
///
/// This is the single hash function of the core: block hashes, Merkle
/// nodes, transaction identities, checkpoint links and state-root leaves all
/// go through [`Hash256::compute`], so root comparisons between nodes are
/// meaningful.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// The canonical zero hash (genesis parent, empty Merkle root).
    pub const ZERO: Self = Hash256([0u8; HASH_LEN]);

    /// Computes a new [`Hash256`] as the BLAKE3-256 hash of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let h = blake3::hash(data);
        Hash256(*h.as_bytes())
    }

    /// Hashes the concatenation of `parts` without allocating a joined buffer.
    pub fn compute_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Hash256(*hasher.finalize().as_bytes())
    }

    /// Returns the underlying 32-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// 20-byte account address.
///
/// Addresses are derived from secp256k1 public keys as the last 20 bytes of
/// the [`Hash256`] of the uncompressed point (see
/// [`crate::crypto::address_from_verifying_key`]).
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Self = Address([0u8; ADDRESS_LEN]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Parses a hex address with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Address(out))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Recoverable ECDSA signature bytes, wrapped to avoid naked `Vec<u8>`.
///
/// The expected layout is `r (32) || s (32) || v (1)`; structural checks on
/// that layout live in [`crate::crypto`]. The type itself does not
/// interpret the bytes so that malformed signatures can still be carried to
/// the validator and rejected with a precise reason.
#[derive(Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignatureBytes(pub Vec<u8>);

impl SignatureBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes(0x{})", hex::encode(&self.0))
    }
}

/// Big-endian 32-byte encoding of a [`U256`], used in every commitment.
pub fn u256_to_be_bytes(value: &U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

/// Lossy conversion of a [`U256`] to `f64`, used only for score arithmetic.
pub fn u256_to_f64(value: &U256) -> f64 {
    value
        .0
        .iter()
        .enumerate()
        .map(|(i, limb)| (*limb as f64) * 2f64.powi(64 * i as i32))
        .sum()
}

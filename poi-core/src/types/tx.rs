// poi-core/src/types/tx.rs

//! Transaction type and its canonical encodings.
//!
//! A [`Transaction`] is immutable once hashed: its `hash` is a pure function
//! of every other field (see [`Transaction::compute_hash`]). Two encodings
//! matter for consensus:
//!
//! - the **signing message**, a fixed-order concatenation of sender,
//!   recipient, value, nonce, gas limit, gas price and payload, which the
//!   sender signs, and
//! - the **content hash**, the BLAKE3 digest of the signing message followed
//!   by the signature bytes.
//!
//! Both are bit-exact commitments; changing them is a protocol version bump.

use serde::{Deserialize, Serialize};

use super::{ADDRESS_LEN, Address, Hash256, SignatureBytes, U256, u256_to_be_bytes};

/// A value transfer / call submitted by an account.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content-derived identity, see [`Transaction::compute_hash`].
    pub hash: Hash256,

    /// Account that signs and pays for the transaction.
    pub from: Address,

    /// Receiving account; `None` for payload-only transactions.
    pub to: Option<Address>,

    /// Amount moved from `from` to `to`.
    pub value: U256,

    /// Sender-scoped monotonic counter; must equal the sender's next
    /// expected nonce.
    pub nonce: u64,

    /// Maximum gas the sender is willing to pay for.
    pub gas_limit: u64,

    /// Price per unit of gas. A zero price marks a fee-sponsored transaction.
    pub gas_price: U256,

    /// Optional opaque payload.
    pub data: Option<Vec<u8>>,

    /// Recoverable signature over [`Transaction::signing_message`].
    pub signature: SignatureBytes,
}

impl Transaction {
    /// Canonical message signed by the sender.
    ///
    /// Layout: `from (20) || to_tag (1) || to (20, zero if absent) ||
    /// value (32, BE) || nonce (8, BE) || gas_limit (8, BE) ||
    /// gas_price (32, BE) || data_tag (1) || data`.
    ///
    /// A tag is 1 when the optional field is present, so `to: None` and
    /// `Some(Address::ZERO)` sign differently, as do `data: None` and an
    /// empty payload.
    pub fn signing_message(&self) -> Vec<u8> {
        let data = self.data.as_deref().unwrap_or_default();
        let mut msg = Vec::with_capacity(2 * ADDRESS_LEN + 2 + 32 + 8 + 8 + 32 + data.len());
        msg.extend_from_slice(self.from.as_bytes());
        msg.push(u8::from(self.to.is_some()));
        msg.extend_from_slice(self.to.unwrap_or(Address::ZERO).as_bytes());
        msg.extend_from_slice(&u256_to_be_bytes(&self.value));
        msg.extend_from_slice(&self.nonce.to_be_bytes());
        msg.extend_from_slice(&self.gas_limit.to_be_bytes());
        msg.extend_from_slice(&u256_to_be_bytes(&self.gas_price));
        msg.push(u8::from(self.data.is_some()));
        msg.extend_from_slice(data);
        msg
    }

    /// Digest of the signing message; this is what the sender signs.
    pub fn signing_hash(&self) -> Hash256 {
        Hash256::compute(&self.signing_message())
    }

    /// Content hash over the signing message and the signature bytes.
    pub fn compute_hash(&self) -> Hash256 {
        Hash256::compute_parts(&[&self.signing_message(), self.signature.as_bytes()])
    }

    /// Recomputes and stores [`Transaction::hash`]. Call once, after signing.
    pub fn seal(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    /// Length of the optional payload in bytes.
    pub fn payload_len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Size of the canonical bincode encoding, used for block size budgets.
    pub fn encoded_len(&self) -> usize {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_or(0, |b| b.len())
    }

    /// Maximum fee the sender can be charged: `gas_limit * gas_price`.
    pub fn max_fee(&self) -> Option<U256> {
        U256::from(self.gas_limit).checked_mul(self.gas_price)
    }

    /// Total debit from the sender: `value + gas_limit * gas_price`.
    ///
    /// Returns `None` on 256-bit overflow.
    pub fn total_cost(&self) -> Option<U256> {
        self.max_fee()?.checked_add(self.value)
    }
}

//! Signature primitives.
//!
//! The validator core consumes signatures through the [`SignatureRecovery`]
//! trait: "recover the signing address from a prehashed message". The default
//! implementation, [`Secp256k1Recovery`], uses recoverable ECDSA over
//! secp256k1 (`k256`). Signatures are 65 bytes, `r || s || v`, where `v` is
//! the recovery parameter (`0`/`1`, or the legacy `27`/`28`).
//!
//! Addresses are the last 20 bytes of [`Hash256::compute`] over the
//! uncompressed public key without its SEC1 tag byte, so the whole core uses
//! one hash function.

use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::types::{ADDRESS_LEN, Address, Hash256, SignatureBytes, Transaction};

/// Length of a recoverable signature: `r (32) || s (32) || v (1)`.
pub const SIGNATURE_LEN: usize = 65;

/// Errors raised while checking, recovering or producing signatures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("signature must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("signature component {0} is zero")]
    ZeroComponent(&'static str),

    #[error("recovery parameter {0} is out of range")]
    InvalidRecoveryId(u8),

    #[error("signature is not a valid secp256k1 signature: {0}")]
    Malformed(String),

    #[error("public key recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Pluggable "recover address from signature" primitive.
pub trait SignatureRecovery: Send + Sync {
    /// Checks the structural shape of `signature` without recovering.
    fn check_shape(&self, signature: &SignatureBytes) -> Result<(), CryptoError>;

    /// Recovers the address that produced `signature` over `prehash`.
    fn recover(&self, prehash: &Hash256, signature: &SignatureBytes)
    -> Result<Address, CryptoError>;
}

/// Recoverable secp256k1 ECDSA.
#[derive(Clone, Copy, Debug, Default)]
pub struct Secp256k1Recovery;

impl SignatureRecovery for Secp256k1Recovery {
    fn check_shape(&self, signature: &SignatureBytes) -> Result<(), CryptoError> {
        parse_signature(signature).map(|_| ())
    }

    fn recover(
        &self,
        prehash: &Hash256,
        signature: &SignatureBytes,
    ) -> Result<Address, CryptoError> {
        let (sig, recid) = parse_signature(signature)?;
        let key = VerifyingKey::recover_from_prehash(prehash.as_bytes(), &sig, recid)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
        Ok(address_from_verifying_key(&key))
    }
}

/// Splits and range-checks a 65-byte recoverable signature.
fn parse_signature(signature: &SignatureBytes) -> Result<(K256Signature, RecoveryId), CryptoError> {
    let bytes = signature.as_bytes();
    if bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidLength {
            expected: SIGNATURE_LEN,
            actual: bytes.len(),
        });
    }

    if bytes[..32].iter().all(|b| *b == 0) {
        return Err(CryptoError::ZeroComponent("r"));
    }
    if bytes[32..64].iter().all(|b| *b == 0) {
        return Err(CryptoError::ZeroComponent("s"));
    }

    let v = bytes[64];
    let normalized = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(CryptoError::InvalidRecoveryId(other)),
    };
    let recid = RecoveryId::from_byte(normalized).ok_or(CryptoError::InvalidRecoveryId(v))?;

    let sig =
        K256Signature::from_slice(&bytes[..64]).map_err(|e| CryptoError::Malformed(e.to_string()))?;

    Ok((sig, recid))
}

/// Derives an [`Address`] from a secp256k1 verifying key.
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = k256::PublicKey::from(key).to_encoded_point(false);
    // Drop the 0x04 SEC1 tag; hash the 64-byte x || y.
    let digest = Hash256::compute(&point.as_bytes()[1..]);
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&digest.0[32 - ADDRESS_LEN..]);
    Address(out)
}

/// secp256k1 signing key with its derived address.
///
/// Used by the proposer to sign headers and by tooling to sign transactions.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
    address: Address,
}

impl Keypair {
    /// Builds a keypair from a 32-byte secret scalar.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, CryptoError> {
        let signing =
            SigningKey::from_slice(secret).map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        let address = address_from_verifying_key(signing.verifying_key());
        Ok(Self { signing, address })
    }

    /// Deterministically derives a keypair from an arbitrary seed.
    ///
    /// Intended for devnets and tests only.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        Self::from_secret_bytes(Hash256::compute(seed).as_bytes())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte prehash, returning `r || s || v` with `v ∈ {0, 1}`.
    pub fn sign_prehash(&self, prehash: &Hash256) -> Result<SignatureBytes, CryptoError> {
        let (sig, recid) = self
            .signing
            .sign_prehash_recoverable(prehash.as_bytes())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.extend_from_slice(&sig.to_bytes());
        out.push(recid.to_byte());
        Ok(SignatureBytes(out))
    }

    /// Sets `from`, signs the transaction and seals its content hash.
    pub fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction, CryptoError> {
        tx.from = self.address;
        tx.signature = self.sign_prehash(&tx.signing_hash())?;
        Ok(tx.seal())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

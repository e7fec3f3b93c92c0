//! Transaction admission predicate.
//!
//! [`TransactionValidator::validate`] checks one transaction against
//! committed state and protocol limits, in a fixed order, stopping at the
//! first failure:
//!
//! 1. content hash is non-zero and matches the fields; sender/recipient are
//!    not both the zero address,
//! 2. the signature is well-formed and recovers to the sender (unless the
//!    fee-sponsor bypass applies),
//! 3. the nonce equals the sender's next expected nonce,
//! 4. the sender can afford `value + gas_limit * gas_price`,
//! 5. the gas limit is within the configured bounds.
//!
//! The validator has no side effects; it only reads state.

use tracing::warn;

use crate::crypto::{Secp256k1Recovery, SignatureRecovery};
use crate::state::StateService;
use crate::types::Transaction;

use super::config::ValidationConfig;
use super::error::TxError;

/// Stateless transaction validator, generic over the signature primitive.
#[derive(Clone, Debug)]
pub struct TransactionValidator<R = Secp256k1Recovery> {
    cfg: ValidationConfig,
    recovery: R,
}

impl TransactionValidator<Secp256k1Recovery> {
    pub fn new(cfg: ValidationConfig) -> Self {
        Self::with_recovery(cfg, Secp256k1Recovery)
    }
}

impl<R: SignatureRecovery> TransactionValidator<R> {
    pub fn with_recovery(cfg: ValidationConfig, recovery: R) -> Self {
        Self { cfg, recovery }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.cfg
    }

    pub fn recovery(&self) -> &R {
        &self.recovery
    }

    /// Validates `tx` against committed state.
    pub fn validate<S>(&self, tx: &Transaction, state: &S) -> Result<(), TxError>
    where
        S: StateService + ?Sized,
    {
        self.validate_with_nonce_offset(tx, state, 0)
    }

    /// Like [`validate`](Self::validate), but expects the nonce to be
    /// `committed_nonce + nonce_offset`.
    ///
    /// Block validation uses the offset for the k-th transaction of the same
    /// sender within one block.
    pub fn validate_with_nonce_offset<S>(
        &self,
        tx: &Transaction,
        state: &S,
        nonce_offset: u64,
    ) -> Result<(), TxError>
    where
        S: StateService + ?Sized,
    {
        self.check_structure(tx)?;
        self.check_signature(tx)?;

        let expected = state.get_nonce(&tx.from)?.saturating_add(nonce_offset);
        if tx.nonce != expected {
            return Err(TxError::BadNonce {
                expected,
                actual: tx.nonce,
            });
        }

        let required = tx.total_cost().ok_or(TxError::CostOverflow)?;
        let available = state.get_balance(&tx.from)?;
        if available < required {
            return Err(TxError::InsufficientBalance {
                required,
                available,
            });
        }

        if tx.gas_limit < self.cfg.min_gas_limit || tx.gas_limit > self.cfg.max_gas_limit {
            return Err(TxError::GasOutOfBounds {
                gas_limit: tx.gas_limit,
                min: self.cfg.min_gas_limit,
                max: self.cfg.max_gas_limit,
            });
        }

        Ok(())
    }

    fn check_structure(&self, tx: &Transaction) -> Result<(), TxError> {
        if tx.hash.is_zero() {
            return Err(TxError::ZeroHash);
        }
        let computed = tx.compute_hash();
        if computed != tx.hash {
            return Err(TxError::HashMismatch {
                declared: tx.hash,
                computed,
            });
        }
        if tx.from.is_zero() && tx.to.is_none_or(|to| to.is_zero()) {
            return Err(TxError::ZeroAddresses);
        }
        Ok(())
    }

    fn check_signature(&self, tx: &Transaction) -> Result<(), TxError> {
        self.recovery
            .check_shape(&tx.signature)
            .map_err(TxError::MalformedSignature)?;

        if self.is_sponsored(tx) {
            warn!(
                tx = %tx.hash,
                sponsor = %tx.from,
                "zero-fee sponsor transaction accepted without signature recovery"
            );
            return Ok(());
        }

        let recovered = self
            .recovery
            .recover(&tx.signing_hash(), &tx.signature)
            .map_err(TxError::BadSignature)?;
        if recovered != tx.from {
            return Err(TxError::SignerMismatch {
                declared: tx.from,
                recovered,
            });
        }
        Ok(())
    }

    /// Zero-price transaction from the configured sponsor account.
    pub fn is_sponsored(&self, tx: &Transaction) -> bool {
        self.cfg.allow_sponsor_signature_bypass
            && tx.gas_price.is_zero()
            && self.cfg.sponsor_address == Some(tx.from)
    }
}

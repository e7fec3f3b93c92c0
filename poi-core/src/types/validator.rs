//! Validator roster entries and their rolling performance metrics.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Address, U256};

/// Stable validator identity.
///
/// Ordering on the identity is what breaks score ties during committee
/// selection, so it must be total and identical on every node.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ValidatorId(pub String);

impl ValidatorId {
    pub fn new(id: impl Into<String>) -> Self {
        ValidatorId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rolling performance fractions maintained by the validator registry.
///
/// All three values are fractions in `[0, 1]`. The core only reads them;
/// decay is the registry's business.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub uptime: f64,
    pub consensus_participation: f64,
    pub proposal_success: f64,
}

impl Default for PerformanceMetrics {
    /// New validators start neutral rather than perfect or penalised.
    fn default() -> Self {
        Self {
            uptime: 0.5,
            consensus_participation: 0.5,
            proposal_success: 0.5,
        }
    }
}

/// A staked participant in consensus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub id: ValidatorId,
    pub address: Address,
    pub stake: U256,
    pub metrics: PerformanceMetrics,
}

//! Validator roster collaborator.
//!
//! The consensus round reads the roster and performance metrics, solicits
//! solutions and votes, and reports per-validator outcomes through
//! [`ValidatorRegistry::update_performance`] once the round is over. The
//! round never mutates validators directly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::trace;

use crate::types::{Block, PerformanceMetrics, U256, Validator, ValidatorId};

use super::challenge::{Challenge, Solution};
use super::error::RegistryError;

/// Outcome of one round for one solicited validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceUpdate {
    pub validator: ValidatorId,
    /// Cast a vote in the committee.
    pub participated: bool,
    /// Answered the challenge with a usable solution.
    pub solution_submitted: bool,
    /// The block was accepted.
    pub round_succeeded: bool,
    /// Missed the solution deadline.
    pub timed_out: bool,
}

#[async_trait]
pub trait ValidatorRegistry: Send + Sync {
    async fn eligible_validators(&self) -> Result<Vec<Validator>, RegistryError>;

    async fn metrics(&self, id: &ValidatorId) -> Result<PerformanceMetrics, RegistryError>;

    async fn update_performance(&self, update: PerformanceUpdate) -> Result<(), RegistryError>;

    /// Asks `id` to solve `challenge`. `timeout` is a hint; the caller
    /// enforces the deadline itself.
    async fn request_solution(
        &self,
        id: &ValidatorId,
        challenge: &Challenge,
        timeout: Duration,
    ) -> Result<Option<Solution>, RegistryError>;

    async fn request_vote(&self, id: &ValidatorId, block: &Block) -> Result<bool, RegistryError>;
}

/// Transport to one validator.
#[async_trait]
pub trait ValidatorEndpoint: Send + Sync {
    async fn solve(&self, challenge: &Challenge) -> Result<Option<Solution>, String>;

    async fn vote(&self, block: &Block) -> Result<bool, String>;
}

struct Entry {
    validator: Validator,
    endpoint: Arc<dyn ValidatorEndpoint>,
}

/// Roster kept in memory, with exponentially decayed metrics.
///
/// Each update moves a metric towards the new sample:
/// `m ← decay·m + (1 − decay)·sample`.
pub struct InMemoryValidatorRegistry {
    entries: RwLock<BTreeMap<ValidatorId, Entry>>,
    decay: f64,
    min_stake: U256,
}

impl InMemoryValidatorRegistry {
    pub fn new(decay: f64, min_stake: U256) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            decay: decay.clamp(0.0, 1.0),
            min_stake,
        }
    }

    pub async fn register(&self, validator: Validator, endpoint: Arc<dyn ValidatorEndpoint>) {
        self.entries.write().await.insert(
            validator.id.clone(),
            Entry {
                validator,
                endpoint,
            },
        );
    }

    pub async fn remove(&self, id: &ValidatorId) -> Option<Validator> {
        self.entries.write().await.remove(id).map(|e| e.validator)
    }

    pub async fn validator(&self, id: &ValidatorId) -> Option<Validator> {
        self.entries.read().await.get(id).map(|e| e.validator.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn endpoint(&self, id: &ValidatorId) -> Result<Arc<dyn ValidatorEndpoint>, RegistryError> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.endpoint.clone())
            .ok_or_else(|| RegistryError::UnknownValidator(id.clone()))
    }

    fn blend(&self, current: f64, sample: bool) -> f64 {
        let sample = if sample { 1.0 } else { 0.0 };
        (self.decay * current + (1.0 - self.decay) * sample).clamp(0.0, 1.0)
    }
}

impl Default for InMemoryValidatorRegistry {
    fn default() -> Self {
        Self::new(0.9, U256::one())
    }
}

#[async_trait]
impl ValidatorRegistry for InMemoryValidatorRegistry {
    async fn eligible_validators(&self) -> Result<Vec<Validator>, RegistryError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.validator.stake >= self.min_stake)
            .map(|e| e.validator.clone())
            .collect())
    }

    async fn metrics(&self, id: &ValidatorId) -> Result<PerformanceMetrics, RegistryError> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.validator.metrics)
            .ok_or_else(|| RegistryError::UnknownValidator(id.clone()))
    }

    async fn update_performance(&self, update: PerformanceUpdate) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&update.validator)
            .ok_or_else(|| RegistryError::UnknownValidator(update.validator.clone()))?;

        let m = entry.validator.metrics;
        let updated = PerformanceMetrics {
            uptime: self.blend(m.uptime, !update.timed_out),
            consensus_participation: self.blend(m.consensus_participation, update.participated),
            proposal_success: self.blend(
                m.proposal_success,
                update.solution_submitted && update.round_succeeded,
            ),
        };
        entry.validator.metrics = updated;
        trace!(validator = %update.validator, ?updated, "performance updated");
        Ok(())
    }

    async fn request_solution(
        &self,
        id: &ValidatorId,
        challenge: &Challenge,
        _timeout: Duration,
    ) -> Result<Option<Solution>, RegistryError> {
        // Clone the endpoint out so the roster lock is not held while waiting.
        let endpoint = self.endpoint(id).await?;
        endpoint
            .solve(challenge)
            .await
            .map_err(|reason| RegistryError::Endpoint {
                validator: id.clone(),
                reason,
            })
    }

    async fn request_vote(&self, id: &ValidatorId, block: &Block) -> Result<bool, RegistryError> {
        let endpoint = self.endpoint(id).await?;
        endpoint
            .vote(block)
            .await
            .map_err(|reason| RegistryError::Endpoint {
                validator: id.clone(),
                reason,
            })
    }
}

/// Behaviour of a [`SimulatedEndpoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulatedBehavior {
    /// Answers correctly and approves.
    Honest,
    /// Answers with garbage and approves.
    WrongAnswer,
    /// Declines to answer and approves.
    NoAnswer,
    /// Never answers the challenge (always times out) and approves.
    Unresponsive,
    /// Answers correctly and rejects the block.
    Dissenting,
    /// Fails every request.
    Faulty,
}

/// In-process validator used by the demo node and tests.
#[derive(Clone, Debug)]
pub struct SimulatedEndpoint {
    behavior: SimulatedBehavior,
    latency: Duration,
}

impl SimulatedEndpoint {
    pub fn new(behavior: SimulatedBehavior, latency: Duration) -> Self {
        Self { behavior, latency }
    }

    pub fn honest(latency: Duration) -> Self {
        Self::new(SimulatedBehavior::Honest, latency)
    }
}

#[async_trait]
impl ValidatorEndpoint for SimulatedEndpoint {
    async fn solve(&self, challenge: &Challenge) -> Result<Option<Solution>, String> {
        match self.behavior {
            SimulatedBehavior::Unresponsive => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            SimulatedBehavior::Faulty => Err("endpoint unavailable".to_string()),
            behavior => {
                tokio::time::sleep(self.latency).await;
                Ok(match behavior {
                    SimulatedBehavior::WrongAnswer => Some(Solution {
                        answer: vec![0xFF; 7],
                    }),
                    SimulatedBehavior::NoAnswer => None,
                    _ => Some(challenge.solve_reference()),
                })
            }
        }
    }

    async fn vote(&self, _block: &Block) -> Result<bool, String> {
        match self.behavior {
            SimulatedBehavior::Faulty => Err("endpoint unavailable".to_string()),
            SimulatedBehavior::Dissenting => Ok(false),
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    fn validator(id: &str, stake: u64) -> Validator {
        Validator {
            id: ValidatorId::new(id),
            address: Address::ZERO,
            stake: U256::from(stake),
            metrics: PerformanceMetrics::default(),
        }
    }

    #[tokio::test]
    async fn eligibility_requires_minimum_stake() {
        let registry = InMemoryValidatorRegistry::new(0.9, U256::from(10u64));
        let endpoint: Arc<dyn ValidatorEndpoint> =
            Arc::new(SimulatedEndpoint::honest(Duration::ZERO));
        registry.register(validator("a", 10), endpoint.clone()).await;
        registry.register(validator("b", 9), endpoint).await;

        let eligible = registry.eligible_validators().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id.as_str(), "a");
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn updates_decay_towards_samples() {
        let registry = InMemoryValidatorRegistry::new(0.5, U256::one());
        registry
            .register(
                validator("a", 1),
                Arc::new(SimulatedEndpoint::honest(Duration::ZERO)),
            )
            .await;

        let id = ValidatorId::new("a");
        registry
            .update_performance(PerformanceUpdate {
                validator: id.clone(),
                participated: true,
                solution_submitted: true,
                round_succeeded: true,
                timed_out: true,
            })
            .await
            .unwrap();

        let m = registry.metrics(&id).await.unwrap();
        assert!((m.uptime - 0.25).abs() < 1e-12);
        assert!((m.consensus_participation - 0.75).abs() < 1e-12);
        assert!((m.proposal_success - 0.75).abs() < 1e-12);

        let unknown = registry
            .update_performance(PerformanceUpdate {
                validator: ValidatorId::new("nobody"),
                participated: false,
                solution_submitted: false,
                round_succeeded: false,
                timed_out: false,
            })
            .await;
        assert!(matches!(unknown, Err(RegistryError::UnknownValidator(_))));
    }

    #[tokio::test]
    async fn endpoint_errors_are_tagged_with_the_validator() {
        let registry = InMemoryValidatorRegistry::default();
        registry
            .register(
                validator("f", 5),
                Arc::new(SimulatedEndpoint::new(
                    SimulatedBehavior::Faulty,
                    Duration::ZERO,
                )),
            )
            .await;

        let block = Block {
            header: crate::types::Header {
                version: crate::types::BLOCK_VERSION,
                height: 0,
                parent_hash: crate::types::Hash256::ZERO,
                tx_root: crate::types::Hash256::ZERO,
                state_root: crate::types::Hash256::ZERO,
                timestamp: 0,
                proposer: Address::ZERO,
            },
            transactions: Vec::new(),
            history_proof: Vec::new(),
            proposer_signature: Default::default(),
        };
        let err = registry
            .request_vote(&ValidatorId::new("f"), &block)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Endpoint {
                validator: ValidatorId::new("f"),
                reason: "endpoint unavailable".to_string()
            }
        );
    }
}

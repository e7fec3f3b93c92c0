//! Concurrent solicitation of solutions and votes.
//!
//! Every validator gets its own task with its own deadline, so the round
//! waits at most for the slowest responder that has not timed out. A
//! timeout or failure becomes a [`ResponseFailure`] on that validator's
//! record; it never fails the round. Cancelling the round token aborts all
//! outstanding requests and discards whatever was collected.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::types::{Block, Validator, ValidatorId};

use super::challenge::{Challenge, Solution};
use super::error::{ConsensusError, RegistryError};
use super::registry::ValidatorRegistry;

/// Why a validator produced no usable answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseFailure {
    Timeout,
    NoSolution,
    Error(String),
    Cancelled,
}

impl ResponseFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFailure::Timeout => "timeout",
            ResponseFailure::NoSolution => "no_solution",
            ResponseFailure::Error(_) => "error",
            ResponseFailure::Cancelled => "cancelled",
        }
    }
}

/// One validator's answer to the round's challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatorResponse {
    pub validator: ValidatorId,
    pub solution: Option<Solution>,
    /// Wall-clock submission time, milliseconds since the Unix epoch.
    pub submitted_at_ms: u64,
    pub latency: Duration,
    /// Deadline the validator was given.
    pub deadline: Duration,
    pub failure: Option<ResponseFailure>,
}

impl ValidatorResponse {
    pub fn is_valid(&self) -> bool {
        self.failure.is_none() && self.solution.is_some()
    }

    pub fn timed_out(&self) -> bool {
        self.failure == Some(ResponseFailure::Timeout)
    }
}

/// One committee member's vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub validator: ValidatorId,
    pub approve: bool,
    pub failure: Option<ResponseFailure>,
}

struct Outcome<T> {
    result: Result<T, ResponseFailure>,
    latency: Duration,
    finished_at_ms: u64,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Runs `call` for every id concurrently, each under `timeout`.
///
/// Returns one outcome per id, or `Cancelled` if `cancel` fires first.
async fn fan_out<T, F, Fut>(
    ids: &[ValidatorId],
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<BTreeMap<ValidatorId, Outcome<T>>, ConsensusError>
where
    T: Send + 'static,
    F: Fn(ValidatorId) -> Fut,
    Fut: Future<Output = Result<Option<T>, RegistryError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for id in ids {
        let request = call(id.clone());
        let token = cancel.child_token();
        let id = id.clone();
        tasks.spawn(async move {
            let started = Instant::now();
            let result = tokio::select! {
                _ = token.cancelled() => Err(ResponseFailure::Cancelled),
                answered = tokio::time::timeout(timeout, request) => match answered {
                    Err(_) => Err(ResponseFailure::Timeout),
                    Ok(Err(e)) => Err(ResponseFailure::Error(e.to_string())),
                    Ok(Ok(None)) => Err(ResponseFailure::NoSolution),
                    Ok(Ok(Some(value))) => Ok(value),
                },
            };
            let outcome = Outcome {
                result,
                latency: started.elapsed(),
                finished_at_ms: unix_millis(),
            };
            (id, outcome)
        });
    }

    let mut outcomes = BTreeMap::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(ConsensusError::Cancelled);
            }
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok((id, outcome))) => {
                    trace!(validator = %id, ok = outcome.result.is_ok(), "solicitation finished");
                    outcomes.insert(id, outcome);
                }
                Some(Err(e)) => warn!(error = %e, "solicitation task failed"),
            },
        }
    }

    // A panicked task leaves no record; fill it in so every id has one.
    for id in ids {
        outcomes.entry(id.clone()).or_insert_with(|| Outcome {
            result: Err(ResponseFailure::Error("solicitation task failed".to_string())),
            latency: timeout,
            finished_at_ms: unix_millis(),
        });
    }
    Ok(outcomes)
}

/// Solicits challenge solutions and committee votes through a registry.
#[derive(Clone)]
pub struct SolutionCollector {
    registry: Arc<dyn ValidatorRegistry>,
}

impl SolutionCollector {
    pub fn new(registry: Arc<dyn ValidatorRegistry>) -> Self {
        Self { registry }
    }

    /// One response per validator, in validator-id order.
    pub async fn collect(
        &self,
        validators: &[Validator],
        challenge: Arc<Challenge>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ValidatorResponse>, ConsensusError> {
        let ids: Vec<ValidatorId> = validators.iter().map(|v| v.id.clone()).collect();
        let outcomes = fan_out(&ids, timeout, cancel, |id| {
            let registry = self.registry.clone();
            let challenge = challenge.clone();
            async move { registry.request_solution(&id, &challenge, timeout).await }
        })
        .await?;

        Ok(outcomes
            .into_iter()
            .map(|(validator, outcome)| {
                let (solution, failure) = match outcome.result {
                    Ok(solution) => (Some(solution), None),
                    Err(failure) => (None, Some(failure)),
                };
                ValidatorResponse {
                    validator,
                    solution,
                    submitted_at_ms: outcome.finished_at_ms,
                    latency: outcome.latency,
                    deadline: timeout,
                    failure,
                }
            })
            .collect())
    }

    /// One vote per committee member, in validator-id order. Timeouts and
    /// failures count as non-approval.
    pub async fn collect_votes(
        &self,
        committee: &[ValidatorId],
        block: Arc<Block>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vote>, ConsensusError> {
        let outcomes = fan_out(committee, timeout, cancel, |id| {
            let registry = self.registry.clone();
            let block = block.clone();
            async move { registry.request_vote(&id, &block).await.map(Some) }
        })
        .await?;

        Ok(outcomes
            .into_iter()
            .map(|(validator, outcome)| match outcome.result {
                Ok(approve) => Vote {
                    validator,
                    approve,
                    failure: None,
                },
                Err(failure) => Vote {
                    validator,
                    approve: false,
                    failure: Some(failure),
                },
            })
            .collect())
    }
}

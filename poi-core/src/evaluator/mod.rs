//! Solution evaluation.
//!
//! A [`SolutionEvaluator`] rates one validator's challenge response on four
//! axes in `[0, 1]` (quality, innovation, efficiency, accuracy) and folds
//! them into an intelligence score. The consensus round only consumes the
//! scores; how they are produced is up to the implementation:
//!
//! - [`ReferenceEvaluator`] checks the answer against the challenge's
//!   commitment and rates latency locally.
//! - [`http::HttpSolutionEvaluator`] delegates to an external service.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::consensus::{Challenge, ValidatorResponse};
use crate::types::{PerformanceMetrics, ValidatorId};

pub use http::{EvaluatorClientConfig, HttpSolutionEvaluator};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("response from {0} carries no solution")]
    MissingSolution(ValidatorId),

    #[error("score `{0}` is outside [0, 1]")]
    InvalidScore(&'static str),

    #[error("evaluator transport error: {0}")]
    Transport(String),

    #[error("evaluator service error: {0}")]
    Service(String),

    #[error("evaluator protocol error: {0}")]
    Protocol(String),
}

/// Per-response scores, each in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub quality: f64,
    pub innovation: f64,
    pub efficiency: f64,
    pub accuracy: f64,
    pub intelligence: f64,
}

impl EvaluationScores {
    /// `intelligence = 0.3·quality + 0.2·innovation + 0.2·efficiency + 0.3·accuracy`.
    pub fn from_components(quality: f64, innovation: f64, efficiency: f64, accuracy: f64) -> Self {
        let intelligence = 0.3 * quality + 0.2 * innovation + 0.2 * efficiency + 0.3 * accuracy;
        Self {
            quality,
            innovation,
            efficiency,
            accuracy,
            intelligence,
        }
    }

    /// Rejects non-finite or out-of-range components.
    pub fn checked(self) -> Result<Self, EvaluationError> {
        for (name, value) in [
            ("quality", self.quality),
            ("innovation", self.innovation),
            ("efficiency", self.efficiency),
            ("accuracy", self.accuracy),
            ("intelligence", self.intelligence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EvaluationError::InvalidScore(name));
            }
        }
        Ok(self)
    }
}

#[async_trait]
pub trait SolutionEvaluator: Send + Sync {
    /// Scores a valid response. `history` is the validator's performance
    /// record before this round.
    async fn evaluate(
        &self,
        challenge: &Challenge,
        response: &ValidatorResponse,
        history: &PerformanceMetrics,
    ) -> Result<EvaluationScores, EvaluationError>;
}

/// Local evaluator backed by the challenge's answer commitment.
///
/// - accuracy: 1 if the answer matches the commitment, else 0,
/// - quality: 1 for a correct answer, 0.2 for a non-empty wrong one,
/// - efficiency: fraction of the deadline left when the answer arrived,
/// - innovation: accuracy scaled by the validator's past proposal success.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceEvaluator;

#[async_trait]
impl SolutionEvaluator for ReferenceEvaluator {
    async fn evaluate(
        &self,
        challenge: &Challenge,
        response: &ValidatorResponse,
        history: &PerformanceMetrics,
    ) -> Result<EvaluationScores, EvaluationError> {
        let solution = response
            .solution
            .as_ref()
            .ok_or_else(|| EvaluationError::MissingSolution(response.validator.clone()))?;

        let accuracy = if challenge.verify(solution) { 1.0 } else { 0.0 };
        let quality = if accuracy > 0.0 {
            1.0
        } else if solution.answer.is_empty() {
            0.0
        } else {
            0.2
        };

        let deadline = response.deadline.as_secs_f64();
        let efficiency = if deadline > 0.0 {
            (1.0 - response.latency.as_secs_f64() / deadline).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let track_record = history.proposal_success.clamp(0.0, 1.0);
        let innovation = accuracy * (0.5 + 0.5 * track_record);

        EvaluationScores::from_components(quality, innovation, efficiency, accuracy).checked()
    }
}

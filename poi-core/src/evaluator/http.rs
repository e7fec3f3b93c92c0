//! HTTP-based solution evaluator client.
//!
//! Talks to an external scoring service exposing:
//!
//! ```json
//! POST /evaluate
//! {
//!   "challenge_id": "hex",
//!   "category": "pattern-recognition",
//!   "difficulty": 2,
//!   "answer_commitment": "hex",
//!   "validator": "validator-07",
//!   "answer": "hex",
//!   "latency_ms": 420,
//!   "deadline_ms": 20000,
//!   "history": { "uptime": 0.9, "consensus_participation": 0.8, "proposal_success": 0.7 }
//! }
//!
//! Response:
//! { "quality": 0.9, "innovation": 0.4, "efficiency": 0.97, "accuracy": 1.0 }
//! ```
//!
//! The intelligence score is always recomputed locally from the four
//! components so that every node weighs them identically.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::consensus::{Challenge, ValidatorResponse};
use crate::types::{Hash256, PerformanceMetrics};

use super::{EvaluationError, EvaluationScores, SolutionEvaluator};

/// Settings for [`HttpSolutionEvaluator`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorClientConfig {
    /// Use the HTTP evaluator instead of the local reference evaluator.
    pub enabled: bool,
    /// Root of the service, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for EvaluatorClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 2_000,
        }
    }
}

/// HTTP evaluator. Cheap to share; the inner client pools connections.
pub struct HttpSolutionEvaluator {
    base_url: String,
    client: Client,
}

impl HttpSolutionEvaluator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EvaluationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvaluationError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn from_config(cfg: &EvaluatorClientConfig) -> Result<Self, EvaluationError> {
        Self::new(cfg.base_url.clone(), Duration::from_millis(cfg.timeout_ms))
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    challenge_id: String,
    category: &'static str,
    difficulty: u8,
    answer_commitment: String,
    validator: &'a str,
    answer: String,
    latency_ms: u64,
    deadline_ms: u64,
    history: &'a PerformanceMetrics,
}

#[derive(Debug, Deserialize)]
struct EvaluateResponse {
    quality: f64,
    innovation: f64,
    efficiency: f64,
    accuracy: f64,
}

fn hash_to_hex(h: &Hash256) -> String {
    hex::encode(h.as_bytes())
}

#[async_trait]
impl SolutionEvaluator for HttpSolutionEvaluator {
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

        let url = self.endpoint("/evaluate");
        let body = EvaluateRequest {
            challenge_id: hash_to_hex(&challenge.id),
            category: challenge.category.as_str(),
            difficulty: challenge.difficulty,
            answer_commitment: hash_to_hex(&challenge.answer_commitment),
            validator: response.validator.as_str(),
            answer: hex::encode(&solution.answer),
            latency_ms: response.latency.as_millis() as u64,
            deadline_ms: response.deadline.as_millis() as u64,
            history,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EvaluationError::Transport(format!("HTTP POST {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EvaluationError::Service(format!(
                "evaluator returned HTTP status {status}"
            )));
        }

        let scores = resp
            .json::<EvaluateResponse>()
            .await
            .map_err(|e| EvaluationError::Protocol(format!("failed to parse JSON response: {e}")))?;

        EvaluationScores::from_components(
            scores.quality,
            scores.innovation,
            scores.efficiency,
            scores.accuracy,
        )
        .checked()
    }
}

//! Proof-of-Intelligence round driver.
//!
//! A round moves through
//! `ChallengeIssued → SolutionsCollected → Scored → ValidatorsSelected →
//! Voted → Finalized`. When no validator produced a usable answer it takes
//! the `FallbackStake` branch after `SolutionsCollected` and picks the
//! committee by stake alone. Any protocol error along the intelligence path
//! (generator, evaluator, registry) is caught once and the round is retried
//! through the stake-only path; only if that fails too is the round
//! reported as failed.
//!
//! Performance feedback is written back to the registry once per finalized
//! round, sequentially, for every solicited validator. Cancelled rounds
//! write nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::evaluator::SolutionEvaluator;
use crate::metrics::MetricsRegistry;
use crate::types::{Block, Hash256, Validator, ValidatorId};

use super::challenge::{ChallengeCategory, ChallengeContext, ChallengeGenerator, difficulty_for};
use super::collector::{ResponseFailure, SolutionCollector, ValidatorResponse, Vote};
use super::config::PoiConfig;
use super::error::ConsensusError;
use super::registry::{PerformanceUpdate, ValidatorRegistry};
use super::scoring::SelectedValidator;
use super::selection::{quorum_threshold, required_validators, select_by_stake, select_top};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    ChallengeIssued,
    SolutionsCollected,
    Scored,
    ValidatorsSelected,
    Voted,
    Finalized,
    FallbackStake,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMode {
    Intelligence,
    StakeFallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    /// Every challenge response was missing or invalid.
    NoValidResponses,
    /// The intelligence path hit a protocol error.
    ProtocolError,
}

/// Aggregate challenge statistics of a round.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceMetrics {
    pub challenge_id: Option<Hash256>,
    pub category: Option<ChallengeCategory>,
    pub difficulty: u8,
    pub complexity: f64,
    pub solicited: usize,
    pub valid_responses: usize,
    pub timeouts: usize,
    pub mean_intelligence: f64,
    pub max_intelligence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub validator: ValidatorId,
    pub valid: bool,
    pub failure: Option<ResponseFailure>,
    pub latency_ms: u64,
    pub intelligence: Option<f64>,
}

/// Outcome of a finalized round; the record appended to the consensus log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub block_hash: Hash256,
    pub height: u64,
    pub accepted: bool,
    pub mode: ConsensusMode,
    pub fallback_reason: Option<FallbackReason>,
    /// The selected committee with its scores, best first.
    pub participants: Vec<SelectedValidator>,
    pub votes: Vec<Vote>,
    pub approvals: usize,
    pub required_approvals: usize,
    pub committee_size: usize,
    /// Committee size the block called for; larger than `committee_size`
    /// when too few validators qualified.
    pub required_validators: usize,
    /// `approvals / committee_size`.
    pub strength: f64,
    pub intelligence: IntelligenceMetrics,
    pub responses: Vec<ResponseSummary>,
    pub phases: Vec<RoundPhase>,
}

impl ConsensusResult {
    pub fn participant_ids(&self) -> Vec<ValidatorId> {
        self.participants.iter().map(|p| p.id().clone()).collect()
    }
}

struct Round {
    block: Arc<Block>,
    block_hash: Hash256,
    complexity: f64,
    required: usize,
    phases: Vec<RoundPhase>,
}

impl Round {
    fn new(block: Arc<Block>, cfg: &PoiConfig) -> Self {
        let complexity = block.complexity_score();
        Self {
            block_hash: block.hash(),
            required: required_validators(
                complexity,
                cfg.base_committee,
                cfg.max_committee_multiplier,
                cfg.complexity_divisor,
            ),
            block,
            complexity,
            phases: Vec::new(),
        }
    }

    fn enter(&mut self, phase: RoundPhase) {
        debug!(height = self.block.height(), block_hash = %self.block_hash, ?phase, "round phase");
        self.phases.push(phase);
    }
}

/// Everything [`ProofOfIntelligence::finish`] needs besides the committee.
struct Collected {
    responses: Vec<ValidatorResponse>,
    intelligence: IntelligenceMetrics,
    scores: BTreeMap<ValidatorId, f64>,
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ConsensusError> {
    if cancel.is_cancelled() {
        Err(ConsensusError::Cancelled)
    } else {
        Ok(())
    }
}

/// Consensus finalizer.
pub struct ProofOfIntelligence {
    cfg: PoiConfig,
    registry: Arc<dyn ValidatorRegistry>,
    generator: Arc<dyn ChallengeGenerator>,
    evaluator: Arc<dyn SolutionEvaluator>,
    collector: SolutionCollector,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ProofOfIntelligence {
    pub fn new(
        cfg: PoiConfig,
        registry: Arc<dyn ValidatorRegistry>,
        generator: Arc<dyn ChallengeGenerator>,
        evaluator: Arc<dyn SolutionEvaluator>,
    ) -> Self {
        Self {
            cfg,
            collector: SolutionCollector::new(registry.clone()),
            registry,
            generator,
            evaluator,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PoiConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &Arc<dyn ValidatorRegistry> {
        &self.registry
    }

    /// Runs one consensus round for an already validated block.
    pub async fn finalize(
        &self,
        block: Arc<Block>,
        cancel: &CancellationToken,
    ) -> Result<ConsensusResult, ConsensusError> {
        let started = Instant::now();
        let mut round = Round::new(block, &self.cfg);

        let result = match self.run_intelligence(&mut round, cancel).await {
            Err(ConsensusError::Cancelled) => Err(ConsensusError::Cancelled),
            Err(primary) if self.cfg.fallback_on_error => {
                warn!(
                    height = round.block.height(),
                    reason = primary.reason_code(),
                    error = %primary,
                    "intelligence path failed, retrying with stake-only selection"
                );
                round.enter(RoundPhase::FallbackStake);
                match self.run_stake_after_error(&mut round, cancel).await {
                    Ok(result) => Ok(result),
                    Err(ConsensusError::Cancelled) => Err(ConsensusError::Cancelled),
                    Err(fallback) => Err(ConsensusError::Failed {
                        primary: Box::new(primary),
                        fallback: Box::new(fallback),
                    }),
                }
            }
            other => other,
        };

        match &result {
            Err(ConsensusError::Cancelled) => {
                info!(height = round.block.height(), "consensus round cancelled");
            }
            Err(e) => error!(
                height = round.block.height(),
                reason = e.reason_code(),
                error = %e,
                "consensus round failed"
            ),
            Ok(_) => {}
        }
        self.record_metrics(&result, started.elapsed());
        result
    }

    async fn roster(&self) -> Result<Vec<Validator>, ConsensusError> {
        let roster = self.registry.eligible_validators().await?;
        if roster.is_empty() {
            return Err(ConsensusError::NoEligibleValidators);
        }
        Ok(roster)
    }

    async fn run_intelligence(
        &self,
        round: &mut Round,
        cancel: &CancellationToken,
    ) -> Result<ConsensusResult, ConsensusError> {
        ensure_live(cancel)?;

        let context = ChallengeContext::from_block(&round.block);
        let category = ChallengeCategory::for_complexity(round.complexity);
        let difficulty = difficulty_for(round.complexity, self.cfg.max_difficulty);
        let challenge = Arc::new(
            self.generator
                .generate(category, difficulty, &context)
                .await?,
        );
        round.enter(RoundPhase::ChallengeIssued);

        let roster = self.roster().await?;
        let timeout = self.cfg.solution_timeout(difficulty);
        let responses = self
            .collector
            .collect(&roster, challenge.clone(), timeout, cancel)
            .await?;
        round.enter(RoundPhase::SolutionsCollected);

        let mut intelligence = IntelligenceMetrics {
            challenge_id: Some(challenge.id),
            category: Some(category),
            difficulty,
            complexity: round.complexity,
            solicited: responses.len(),
            valid_responses: responses.iter().filter(|r| r.is_valid()).count(),
            timeouts: responses.iter().filter(|r| r.timed_out()).count(),
            ..IntelligenceMetrics::default()
        };
        if let Some(m) = &self.metrics {
            m.consensus
                .validator_timeouts_total
                .inc_by(intelligence.timeouts as u64);
        }

        if intelligence.valid_responses == 0 {
            info!(
                height = round.block.height(),
                solicited = intelligence.solicited,
                "no usable challenge responses, selecting by stake"
            );
            round.enter(RoundPhase::FallbackStake);
            let collected = Collected {
                responses,
                intelligence,
                scores: BTreeMap::new(),
            };
            return self
                .run_stake(round, &roster, collected, FallbackReason::NoValidResponses, cancel)
                .await;
        }

        let by_id: BTreeMap<&ValidatorId, &Validator> =
            roster.iter().map(|v| (&v.id, v)).collect();
        let mut candidates = Vec::with_capacity(intelligence.valid_responses);
        let mut scores = BTreeMap::new();
        for response in responses.iter().filter(|r| r.is_valid()) {
            let Some(validator) = by_id.get(&response.validator) else {
                continue;
            };
            let history = self.registry.metrics(&response.validator).await?;
            let evaluation = self
                .evaluator
                .evaluate(&challenge, response, &history)
                .await?;
            ensure_live(cancel)?;

            scores.insert(response.validator.clone(), evaluation.intelligence);
            candidates.push(SelectedValidator::score(
                (*validator).clone(),
                evaluation.intelligence,
                &history,
                &self.cfg.weights,
                self.cfg.stake_normaliser,
            ));
        }
        round.enter(RoundPhase::Scored);

        if !scores.is_empty() {
            let sum: f64 = scores.values().sum();
            intelligence.mean_intelligence = sum / scores.len() as f64;
            intelligence.max_intelligence = scores.values().copied().fold(0.0, f64::max);
        }

        let committee = select_top(candidates, round.required);
        round.enter(RoundPhase::ValidatorsSelected);

        let collected = Collected {
            responses,
            intelligence,
            scores,
        };
        self.finish(round, ConsensusMode::Intelligence, None, committee, collected, cancel)
            .await
    }

    /// Stake-only retry after a protocol error. Starts from a fresh roster
    /// and never reuses responses from the failed attempt.
    async fn run_stake_after_error(
        &self,
        round: &mut Round,
        cancel: &CancellationToken,
    ) -> Result<ConsensusResult, ConsensusError> {
        ensure_live(cancel)?;
        let roster = self.roster().await?;
        let collected = Collected {
            responses: Vec::new(),
            intelligence: IntelligenceMetrics {
                complexity: round.complexity,
                ..IntelligenceMetrics::default()
            },
            scores: BTreeMap::new(),
        };
        self.run_stake(round, &roster, collected, FallbackReason::ProtocolError, cancel)
            .await
    }

    async fn run_stake(
        &self,
        round: &mut Round,
        roster: &[Validator],
        collected: Collected,
        reason: FallbackReason,
        cancel: &CancellationToken,
    ) -> Result<ConsensusResult, ConsensusError> {
        let committee: Vec<SelectedValidator> = select_by_stake(roster, round.required)
            .into_iter()
            .map(|v| {
                let metrics = v.metrics;
                SelectedValidator::score(
                    v,
                    0.0,
                    &metrics,
                    &self.cfg.weights,
                    self.cfg.stake_normaliser,
                )
            })
            .collect();
        round.enter(RoundPhase::ValidatorsSelected);

        self.finish(
            round,
            ConsensusMode::StakeFallback,
            Some(reason),
            committee,
            collected,
            cancel,
        )
        .await
    }

    /// Voting, quorum decision and performance feedback.
    async fn finish(
        &self,
        round: &mut Round,
        mode: ConsensusMode,
        fallback_reason: Option<FallbackReason>,
        committee: Vec<SelectedValidator>,
        collected: Collected,
        cancel: &CancellationToken,
    ) -> Result<ConsensusResult, ConsensusError> {
        let ids: Vec<ValidatorId> = committee.iter().map(|s| s.id().clone()).collect();
        let votes = self
            .collector
            .collect_votes(&ids, round.block.clone(), self.cfg.vote_timeout(), cancel)
            .await?;
        round.enter(RoundPhase::Voted);

        let committee_size = committee.len();
        let approvals = votes.iter().filter(|v| v.approve).count();
        let required_approvals = quorum_threshold(committee_size);
        let accepted = approvals >= required_approvals;
        let strength = if committee_size == 0 {
            0.0
        } else {
            approvals as f64 / committee_size as f64
        };

        ensure_live(cancel)?;
        round.enter(RoundPhase::Finalized);

        let responses = collected
            .responses
            .iter()
            .map(|r| ResponseSummary {
                validator: r.validator.clone(),
                valid: r.is_valid(),
                failure: r.failure.clone(),
                latency_ms: r.latency.as_millis() as u64,
                intelligence: collected.scores.get(&r.validator).copied(),
            })
            .collect();

        let result = ConsensusResult {
            block_hash: round.block_hash,
            height: round.block.height(),
            accepted,
            mode,
            fallback_reason,
            participants: committee,
            votes,
            approvals,
            required_approvals,
            committee_size,
            required_validators: round.required,
            strength,
            intelligence: collected.intelligence,
            responses,
            phases: round.phases.clone(),
        };

        self.apply_feedback(&result, &collected.responses).await;

        info!(
            height = result.height,
            block_hash = %result.block_hash,
            accepted,
            ?mode,
            approvals,
            required_approvals,
            committee_size,
            strength,
            "consensus round finalized"
        );
        Ok(result)
    }

    async fn apply_feedback(&self, result: &ConsensusResult, responses: &[ValidatorResponse]) {
        let by_response: BTreeMap<&ValidatorId, &ValidatorResponse> =
            responses.iter().map(|r| (&r.validator, r)).collect();
        let by_vote: BTreeMap<&ValidatorId, &Vote> =
            result.votes.iter().map(|v| (&v.validator, v)).collect();
        let solicited: BTreeSet<&ValidatorId> =
            by_response.keys().chain(by_vote.keys()).copied().collect();

        for id in solicited {
            let response = by_response.get(id);
            let update = PerformanceUpdate {
                validator: id.clone(),
                participated: by_vote.get(id).is_some_and(|v| v.failure.is_none()),
                solution_submitted: response.is_some_and(|r| r.is_valid()),
                round_succeeded: result.accepted,
                timed_out: response.is_some_and(|r| r.timed_out()),
            };
            if let Err(e) = self.registry.update_performance(update).await {
                warn!(validator = %id, error = %e, "performance update failed");
            }
        }
    }

    fn record_metrics(&self, result: &Result<ConsensusResult, ConsensusError>, elapsed: Duration) {
        let Some(m) = &self.metrics else {
            return;
        };
        m.consensus.round_seconds.observe(elapsed.as_secs_f64());
        let outcome = match result {
            Ok(r) if r.accepted => "accepted",
            Ok(_) => "rejected",
            Err(ConsensusError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        m.consensus.rounds_total.with_label_values(&[outcome]).inc();
        if matches!(result, Ok(r) if r.mode == ConsensusMode::StakeFallback) {
            m.consensus.fallback_rounds_total.inc();
        }
    }
}

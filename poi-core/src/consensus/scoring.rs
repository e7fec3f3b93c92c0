//! Composite validator scoring.
//!
//! `composite = w_i·intelligence + w_s·stake_norm + w_p·performance` with
//! default weights 0.40 / 0.35 / 0.25, where
//!
//! - `stake_norm = log10(stake + 1) / log10(normaliser + 1)`, clamped to
//!   `[0, 1]`, so stake influence grows logarithmically,
//! - `performance = 0.4·uptime + 0.3·participation + 0.3·proposal_success`.

use serde::{Deserialize, Serialize};

use crate::types::{PerformanceMetrics, U256, Validator, ValidatorId, u256_to_f64};

use super::config::ScoreWeights;

/// Logarithmic stake score in `[0, 1]`.
pub fn stake_norm(stake: &U256, normaliser: f64) -> f64 {
    let denominator = (normaliser.max(1.0) + 1.0).log10();
    let value = (u256_to_f64(stake) + 1.0).log10() / denominator;
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

pub fn performance_score(m: &PerformanceMetrics) -> f64 {
    0.4 * m.uptime.clamp(0.0, 1.0)
        + 0.3 * m.consensus_participation.clamp(0.0, 1.0)
        + 0.3 * m.proposal_success.clamp(0.0, 1.0)
}

pub fn composite_score(
    weights: &ScoreWeights,
    intelligence: f64,
    stake_score: f64,
    performance: f64,
) -> f64 {
    let raw = weights.intelligence * intelligence.clamp(0.0, 1.0)
        + weights.stake * stake_score.clamp(0.0, 1.0)
        + weights.performance * performance.clamp(0.0, 1.0);
    raw.clamp(0.0, 1.0)
}

/// A validator with its scores for one round. Never cached across rounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedValidator {
    pub validator: Validator,
    pub intelligence: f64,
    pub stake_score: f64,
    pub performance: f64,
    pub composite: f64,
}

impl SelectedValidator {
    pub fn score(
        validator: Validator,
        intelligence: f64,
        metrics: &PerformanceMetrics,
        weights: &ScoreWeights,
        normaliser: f64,
    ) -> Self {
        let stake_score = stake_norm(&validator.stake, normaliser);
        let performance = performance_score(metrics);
        let composite = composite_score(weights, intelligence, stake_score, performance);
        Self {
            validator,
            intelligence,
            stake_score,
            performance,
            composite,
        }
    }

    pub fn id(&self) -> &ValidatorId {
        &self.validator.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    fn validator(stake: u64, metrics: PerformanceMetrics) -> Validator {
        Validator {
            id: ValidatorId::new("v"),
            address: Address::ZERO,
            stake: U256::from(stake),
            metrics,
        }
    }

    #[test]
    fn stake_norm_is_logarithmic_and_bounded() {
        assert_eq!(stake_norm(&U256::zero(), 1_000_000.0), 0.0);
        assert!((stake_norm(&U256::from(1_000_000u64), 1_000_000.0) - 1.0).abs() < 1e-12);
        assert_eq!(stake_norm(&U256::MAX, 1_000_000.0), 1.0);

        // Ten times the stake is far from ten times the score.
        let small = stake_norm(&U256::from(1_000u64), 1_000_000.0);
        let large = stake_norm(&U256::from(10_000u64), 1_000_000.0);
        assert!(large > small && large < small * 1.5);
    }

    #[test]
    fn performance_blend() {
        let m = PerformanceMetrics {
            uptime: 1.0,
            consensus_participation: 0.0,
            proposal_success: 0.0,
        };
        assert!((performance_score(&m) - 0.4).abs() < 1e-12);
        assert!((performance_score(&PerformanceMetrics::default()) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn composite_stays_in_unit_interval() {
        let weights = ScoreWeights::default();
        let grid = [0.0, 0.25, 0.5, 1.0];
        let stakes = [0u64, 1, 999, 1_000_000, u64::MAX];
        for &i in &grid {
            for &p in &grid {
                for &stake in &stakes {
                    let metrics = PerformanceMetrics {
                        uptime: p,
                        consensus_participation: p,
                        proposal_success: p,
                    };
                    let s = SelectedValidator::score(
                        validator(stake, metrics),
                        i,
                        &metrics,
                        &weights,
                        1_000_000.0,
                    );
                    assert!((0.0..=1.0).contains(&s.composite), "{s:?}");
                }
            }
        }
    }

    #[test]
    fn all_maxed_inputs_give_one() {
        let metrics = PerformanceMetrics {
            uptime: 1.0,
            consensus_participation: 1.0,
            proposal_success: 1.0,
        };
        let s = SelectedValidator::score(
            validator(1_000_000, metrics),
            1.0,
            &metrics,
            &ScoreWeights::default(),
            1_000_000.0,
        );
        assert!((s.composite - 1.0).abs() < 1e-9);
    }
}

//! Committee sizing, ranking and quorum arithmetic.

use std::cmp::Ordering;

use crate::types::Validator;

use super::scoring::SelectedValidator;

/// Committee size for a block:
/// `ceil(base · (1 + min(max_multiplier, complexity / divisor)))`.
pub fn required_validators(
    complexity: f64,
    base: usize,
    max_multiplier: f64,
    divisor: f64,
) -> usize {
    let extra = if complexity.is_finite() && complexity > 0.0 && divisor > 0.0 {
        (complexity / divisor).min(max_multiplier.max(0.0))
    } else {
        0.0
    };
    (base as f64 * (1.0 + extra)).ceil() as usize
}

/// Approvals needed from a committee of `n`: `floor(2n/3) + 1`.
pub fn quorum_threshold(n: usize) -> usize {
    n * 2 / 3 + 1
}

pub fn has_quorum(approvals: usize, committee: usize) -> bool {
    approvals >= quorum_threshold(committee)
}

/// Highest composite first; equal scores by ascending validator id.
fn by_composite(a: &SelectedValidator, b: &SelectedValidator) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then_with(|| a.id().cmp(b.id()))
}

/// Top `n` candidates by composite score.
pub fn select_top(mut candidates: Vec<SelectedValidator>, n: usize) -> Vec<SelectedValidator> {
    candidates.sort_by(by_composite);
    candidates.truncate(n);
    candidates
}

/// Top `n` validators by stake alone, ties by ascending id.
pub fn select_by_stake(validators: &[Validator], n: usize) -> Vec<Validator> {
    let mut ranked = validators.to_vec();
    ranked.sort_by(|a, b| b.stake.cmp(&a.stake).then_with(|| a.id.cmp(&b.id)));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, PerformanceMetrics, U256, ValidatorId};

    fn validator(id: &str, stake: u64) -> Validator {
        Validator {
            id: ValidatorId::new(id),
            address: Address::ZERO,
            stake: U256::from(stake),
            metrics: PerformanceMetrics::default(),
        }
    }

    fn scored(id: &str, composite: f64) -> SelectedValidator {
        SelectedValidator {
            validator: validator(id, 0),
            intelligence: 0.0,
            stake_score: 0.0,
            performance: 0.0,
            composite,
        }
    }

    #[test]
    fn committee_size_scales_with_complexity() {
        assert_eq!(required_validators(0.0, 21, 2.0, 5.0), 21);
        assert_eq!(required_validators(1.0, 21, 2.0, 5.0), 26); // 25.2
        assert_eq!(required_validators(5.0, 21, 2.0, 5.0), 42);
        assert_eq!(required_validators(10.0, 21, 2.0, 5.0), 63);
        assert_eq!(required_validators(100.0, 21, 2.0, 5.0), 63);
    }

    #[test]
    fn quorum_boundaries() {
        for (n, threshold) in [(21usize, 15usize), (22, 15), (30, 21)] {
            assert_eq!(quorum_threshold(n), threshold, "n={n}");
            assert!(has_quorum(threshold, n));
            assert!(!has_quorum(threshold - 1, n));
            assert!(has_quorum(threshold + 1, n));
        }
        assert!(!has_quorum(0, 0));
    }

    #[test]
    fn top_selection_breaks_ties_by_id() {
        let picked = select_top(
            vec![
                scored("c", 0.5),
                scored("b", 0.9),
                scored("a", 0.5),
                scored("d", 0.1),
            ],
            3,
        );
        let ids: Vec<&str> = picked.iter().map(|s| s.id().as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn stake_selection_is_deterministic() {
        let picked = select_by_stake(
            &[
                validator("z", 10),
                validator("y", 50),
                validator("x", 10),
                validator("w", 1),
            ],
            3,
        );
        let ids: Vec<&str> = picked.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "x", "z"]);
        assert_eq!(select_by_stake(&[validator("a", 1)], 5).len(), 1);
    }
}

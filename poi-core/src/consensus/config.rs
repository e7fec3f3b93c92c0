use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Weights of the composite validator score. They should sum to 1 so that
/// the composite stays in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub intelligence: f64,
    pub stake: f64,
    pub performance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            intelligence: 0.40,
            stake: 0.35,
            performance: 0.25,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.intelligence + self.stake + self.performance
    }
}

/// Proof-of-Intelligence round parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoiConfig {
    /// Minimum committee size.
    pub base_committee: usize,
    /// Upper bound on the extra committee fraction driven by complexity.
    pub max_committee_multiplier: f64,
    /// Complexity units per full extra committee.
    pub complexity_divisor: f64,
    /// Solution deadline per difficulty level, in milliseconds.
    pub solution_timeout_ms_per_difficulty: u64,
    /// Highest challenge difficulty.
    pub max_difficulty: u8,
    /// Deadline for a single vote, in milliseconds.
    pub vote_timeout_ms: u64,
    pub weights: ScoreWeights,
    /// Stake at which the logarithmic stake score reaches 1.
    pub stake_normaliser: f64,
    /// Run the stake-only round once when the intelligence path fails.
    pub fallback_on_error: bool,
}

impl Default for PoiConfig {
    fn default() -> Self {
        Self {
            base_committee: 21,
            max_committee_multiplier: 2.0,
            complexity_divisor: 5.0,
            solution_timeout_ms_per_difficulty: 10_000,
            max_difficulty: 5,
            vote_timeout_ms: 10_000,
            weights: ScoreWeights::default(),
            stake_normaliser: 1_000_000.0,
            fallback_on_error: true,
        }
    }
}

impl PoiConfig {
    /// Per-validator solution deadline for a challenge of `difficulty`.
    pub fn solution_timeout(&self, difficulty: u8) -> Duration {
        Duration::from_millis(
            self.solution_timeout_ms_per_difficulty
                .saturating_mul(u64::from(difficulty.max(1))),
        )
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }
}

/// Block assembly limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposerConfig {
    /// Soft limit on the number of transactions per proposed block.
    pub max_block_txs: usize,
    /// Soft limit on the encoded size of the proposed transactions, in bytes.
    pub max_block_size_bytes: usize,
    /// Whether to propose blocks when the pool is empty.
    pub allow_empty_blocks: bool,
    /// Target block time in seconds for the demo node.
    pub block_time_secs: u64,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            max_block_txs: 10_000,
            max_block_size_bytes: 900_000,
            allow_empty_blocks: true,
            block_time_secs: 5,
        }
    }
}

//! Consensus challenges.
//!
//! A challenge is issued once per round. Its category is picked from the
//! block's complexity score, its difficulty scales the solution deadline,
//! and its payload is built by a [`ChallengeGenerator`]. Every challenge
//! carries a commitment `H(id || answer)` to its reference answer so an
//! evaluator can check accuracy without re-deriving the answer.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Block, Hash256};

use super::error::ChallengeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeCategory {
    Optimization,
    SecurityAnalysis,
    PatternRecognition,
    Predictive,
}

impl ChallengeCategory {
    /// `> 5` optimization, `> 3` security analysis, `> 1` pattern
    /// recognition, otherwise predictive.
    pub fn for_complexity(score: f64) -> Self {
        if score > 5.0 {
            ChallengeCategory::Optimization
        } else if score > 3.0 {
            ChallengeCategory::SecurityAnalysis
        } else if score > 1.0 {
            ChallengeCategory::PatternRecognition
        } else {
            ChallengeCategory::Predictive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeCategory::Optimization => "optimization",
            ChallengeCategory::SecurityAnalysis => "security-analysis",
            ChallengeCategory::PatternRecognition => "pattern-recognition",
            ChallengeCategory::Predictive => "predictive",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ChallengeCategory::Optimization => 1,
            ChallengeCategory::SecurityAnalysis => 2,
            ChallengeCategory::PatternRecognition => 3,
            ChallengeCategory::Predictive => 4,
        }
    }
}

impl fmt::Display for ChallengeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Difficulty level `1 + floor(complexity)`, clamped to `[1, max]`.
pub fn difficulty_for(complexity: f64, max: u8) -> u8 {
    let max = max.max(1);
    if !complexity.is_finite() || complexity <= 0.0 {
        return 1;
    }
    let level = 1.0 + complexity.floor();
    if level >= f64::from(max) {
        max
    } else {
        level as u8
    }
}

/// Block-derived metadata a challenge is generated from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChallengeContext {
    pub block_hash: Hash256,
    pub height: u64,
    pub complexity: f64,
    pub tx_hashes: Vec<Hash256>,
}

impl ChallengeContext {
    pub fn from_block(block: &Block) -> Self {
        Self {
            block_hash: block.hash(),
            height: block.height(),
            complexity: block.complexity_score(),
            tx_hashes: block.tx_hashes(),
        }
    }
}

/// Category-specific problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengePayload {
    /// Order `values` ascending.
    Optimization { values: Vec<u64> },
    /// Report the indices of hashes whose leading byte is below `threshold`.
    SecurityAnalysis {
        tx_hashes: Vec<Hash256>,
        threshold: u8,
    },
    /// Continue an arithmetic sequence by one term.
    PatternRecognition { sequence: Vec<u64> },
    /// Extrapolate a quadratic series `horizon` steps past its last term.
    Predictive { series: Vec<u64>, horizon: u32 },
}

impl ChallengePayload {
    pub fn category(&self) -> ChallengeCategory {
        match self {
            ChallengePayload::Optimization { .. } => ChallengeCategory::Optimization,
            ChallengePayload::SecurityAnalysis { .. } => ChallengeCategory::SecurityAnalysis,
            ChallengePayload::PatternRecognition { .. } => ChallengeCategory::PatternRecognition,
            ChallengePayload::Predictive { .. } => ChallengeCategory::Predictive,
        }
    }

    /// Canonical encoding of the correct answer (big-endian integers).
    pub fn reference_answer(&self) -> Vec<u8> {
        match self {
            ChallengePayload::Optimization { values } => {
                let mut sorted = values.clone();
                sorted.sort_unstable();
                sorted.iter().flat_map(|v| v.to_be_bytes()).collect()
            }
            ChallengePayload::SecurityAnalysis {
                tx_hashes,
                threshold,
            } => tx_hashes
                .iter()
                .enumerate()
                .filter(|(_, h)| h.0[0] < *threshold)
                .flat_map(|(i, _)| (i as u32).to_be_bytes())
                .collect(),
            ChallengePayload::PatternRecognition { sequence } => {
                let next = match sequence.as_slice() {
                    [] => 0,
                    [only] => *only,
                    [.., prev, last] => last.wrapping_add(last.wrapping_sub(*prev)),
                };
                next.to_be_bytes().to_vec()
            }
            ChallengePayload::Predictive { series, horizon } => {
                extrapolate_quadratic(series, *horizon).to_be_bytes().to_vec()
            }
        }
    }
}

/// Finite-difference extrapolation; exact for quadratic series.
fn extrapolate_quadratic(series: &[u64], horizon: u32) -> u64 {
    let n = series.len();
    if n < 3 {
        return series.last().copied().unwrap_or(0);
    }
    let s: Vec<i128> = series[n - 3..].iter().map(|v| i128::from(*v)).collect();
    let mut value = s[2];
    let mut delta = s[2] - s[1];
    let second = delta - (s[1] - s[0]);
    for _ in 0..horizon {
        delta += second;
        value += delta;
    }
    value as u64
}

/// Answer submitted by a validator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub answer: Vec<u8>,
}

/// One round's challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Hash256,
    pub category: ChallengeCategory,
    pub difficulty: u8,
    pub payload: ChallengePayload,
    pub context: ChallengeContext,
    pub answer_commitment: Hash256,
}

impl Challenge {
    pub fn new(difficulty: u8, payload: ChallengePayload, context: ChallengeContext) -> Self {
        let category = payload.category();
        let id = Hash256::compute_parts(&[
            b"poi-challenge",
            context.block_hash.as_bytes(),
            &[category.tag(), difficulty],
        ]);
        let answer_commitment = Self::commit(&id, &payload.reference_answer());
        Self {
            id,
            category,
            difficulty,
            payload,
            context,
            answer_commitment,
        }
    }

    pub fn commit(id: &Hash256, answer: &[u8]) -> Hash256 {
        Hash256::compute_parts(&[id.as_bytes(), answer])
    }

    /// Whether `solution` matches the committed reference answer.
    pub fn verify(&self, solution: &Solution) -> bool {
        Self::commit(&self.id, &solution.answer) == self.answer_commitment
    }

    pub fn solve_reference(&self) -> Solution {
        Solution {
            answer: self.payload.reference_answer(),
        }
    }
}

/// Builds a challenge payload for a category.
#[async_trait]
pub trait ChallengeGenerator: Send + Sync {
    async fn generate(
        &self,
        category: ChallengeCategory,
        difficulty: u8,
        context: &ChallengeContext,
    ) -> Result<Challenge, ChallengeError>;
}

/// Deterministic generator seeded from the block hash, category and
/// difficulty; identical inputs give identical challenges on every node.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicChallengeGenerator;

struct SeedStream(blake3::OutputReader);

impl SeedStream {
    fn new(context: &ChallengeContext, category: ChallengeCategory, difficulty: u8) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"poi-challenge-seed");
        hasher.update(context.block_hash.as_bytes());
        hasher.update(&[category.tag(), difficulty]);
        Self(hasher.finalize_xof())
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.0.fill(&mut buf);
        u64::from_be_bytes(buf)
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }

    fn next_hash(&mut self) -> Hash256 {
        let mut buf = [0u8; 32];
        self.0.fill(&mut buf);
        Hash256(buf)
    }
}

impl DeterministicChallengeGenerator {
    fn build_payload(
        category: ChallengeCategory,
        difficulty: u8,
        context: &ChallengeContext,
    ) -> ChallengePayload {
        let mut seed = SeedStream::new(context, category, difficulty);
        let len = 4 + 4 * usize::from(difficulty);

        match category {
            ChallengeCategory::Optimization => ChallengePayload::Optimization {
                values: (0..len).map(|_| seed.below(1_000_000)).collect(),
            },
            ChallengeCategory::SecurityAnalysis => {
                let tx_hashes = if context.tx_hashes.is_empty() {
                    (0..len).map(|_| seed.next_hash()).collect()
                } else {
                    context.tx_hashes.clone()
                };
                ChallengePayload::SecurityAnalysis {
                    tx_hashes,
                    threshold: 64 + seed.below(128) as u8,
                }
            }
            ChallengeCategory::PatternRecognition => {
                let start = seed.below(1_000);
                let step = 1 + seed.below(97);
                ChallengePayload::PatternRecognition {
                    sequence: (0..len as u64).map(|i| start + step * i).collect(),
                }
            }
            ChallengeCategory::Predictive => {
                let a = seed.below(1_000);
                let b = seed.below(100);
                let c = 1 + seed.below(10);
                ChallengePayload::Predictive {
                    series: (0..len as u64).map(|i| a + b * i + c * i * i).collect(),
                    horizon: u32::from(difficulty),
                }
            }
        }
    }
}

#[async_trait]
impl ChallengeGenerator for DeterministicChallengeGenerator {
    async fn generate(
        &self,
        category: ChallengeCategory,
        difficulty: u8,
        context: &ChallengeContext,
    ) -> Result<Challenge, ChallengeError> {
        if difficulty == 0 {
            return Err(ChallengeError::Difficulty(difficulty));
        }
        let payload = Self::build_payload(category, difficulty, context);
        Ok(Challenge::new(difficulty, payload, context.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(seed: &[u8]) -> ChallengeContext {
        ChallengeContext {
            block_hash: Hash256::compute(seed),
            height: 7,
            complexity: 2.5,
            tx_hashes: Vec::new(),
        }
    }

    #[test]
    fn category_thresholds_are_strict() {
        use ChallengeCategory::*;
        assert_eq!(ChallengeCategory::for_complexity(5.01), Optimization);
        assert_eq!(ChallengeCategory::for_complexity(5.0), SecurityAnalysis);
        assert_eq!(ChallengeCategory::for_complexity(3.0), PatternRecognition);
        assert_eq!(ChallengeCategory::for_complexity(1.0), Predictive);
        assert_eq!(ChallengeCategory::for_complexity(0.0), Predictive);
    }

    #[test]
    fn difficulty_is_clamped() {
        assert_eq!(difficulty_for(0.0, 5), 1);
        assert_eq!(difficulty_for(0.9, 5), 1);
        assert_eq!(difficulty_for(2.3, 5), 3);
        assert_eq!(difficulty_for(12.0, 5), 5);
        assert_eq!(difficulty_for(f64::NAN, 5), 1);
    }

    #[test]
    fn reference_answers() {
        let be = |vals: &[u64]| -> Vec<u8> { vals.iter().flat_map(|v| v.to_be_bytes()).collect() };

        let opt = ChallengePayload::Optimization {
            values: vec![5, 1, 3],
        };
        assert_eq!(opt.reference_answer(), be(&[1, 3, 5]));

        let pattern = ChallengePayload::PatternRecognition {
            sequence: vec![3, 5, 7],
        };
        assert_eq!(pattern.reference_answer(), be(&[9]));

        // 1 + i^2: 1, 2, 5 | 10, 17
        let predictive = ChallengePayload::Predictive {
            series: vec![1, 2, 5],
            horizon: 2,
        };
        assert_eq!(predictive.reference_answer(), be(&[17]));

        let mut low = [0xFFu8; 32];
        low[0] = 0x01;
        let security = ChallengePayload::SecurityAnalysis {
            tx_hashes: vec![Hash256([0xFF; 32]), Hash256(low)],
            threshold: 0x10,
        };
        assert_eq!(security.reference_answer(), 1u32.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn generator_is_deterministic_per_block() {
        let generator = DeterministicChallengeGenerator;
        let category = ChallengeCategory::Predictive;

        let a = generator.generate(category, 2, &context(b"a")).await.unwrap();
        let again = generator.generate(category, 2, &context(b"a")).await.unwrap();
        let b = generator.generate(category, 2, &context(b"b")).await.unwrap();

        assert_eq!(a, again);
        assert_ne!(a.id, b.id);
        assert_eq!(a.difficulty, 2);
        assert_eq!(a.category, category);
    }

    #[tokio::test]
    async fn reference_solution_verifies_for_every_category() {
        let generator = DeterministicChallengeGenerator;
        for category in [
            ChallengeCategory::Optimization,
            ChallengeCategory::SecurityAnalysis,
            ChallengeCategory::PatternRecognition,
            ChallengeCategory::Predictive,
        ] {
            let challenge = generator.generate(category, 3, &context(b"x")).await.unwrap();
            assert!(challenge.verify(&challenge.solve_reference()), "{category}");
            assert!(!challenge.verify(&Solution {
                answer: vec![0xAB; 3]
            }));
        }
    }

    #[tokio::test]
    async fn zero_difficulty_is_rejected() {
        let err = DeterministicChallengeGenerator
            .generate(ChallengeCategory::Optimization, 0, &context(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err, ChallengeError::Difficulty(0));
    }
}

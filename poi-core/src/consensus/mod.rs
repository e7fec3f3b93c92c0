//! Proof-of-Intelligence consensus.
//!
//! This module provides a modular, testable consensus layer consisting of:
//!
//! - configuration parameters ([`config::PoiConfig`], [`config::ProposerConfig`]),
//! - seeded challenge generation ([`challenge`]),
//! - concurrent solution and vote collection ([`collector`]),
//! - composite scoring and committee selection ([`scoring`], [`selection`]),
//! - the validator roster seam ([`registry::ValidatorRegistry`]),
//! - the round driver ([`engine::ProofOfIntelligence`]),
//! - and block assembly ([`proposer::Proposer`]).

pub mod challenge;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod proposer;
pub mod registry;
pub mod scoring;
pub mod selection;

pub use challenge::{
    Challenge, ChallengeCategory, ChallengeContext, ChallengeGenerator, ChallengePayload,
    DeterministicChallengeGenerator, Solution,
};
pub use collector::{ResponseFailure, SolutionCollector, ValidatorResponse, Vote};
pub use config::{PoiConfig, ProposerConfig, ScoreWeights};
pub use engine::{
    ConsensusMode, ConsensusResult, FallbackReason, IntelligenceMetrics, ProofOfIntelligence,
    ResponseSummary, RoundPhase,
};
pub use error::{ChallengeError, ConsensusError, RegistryError};
pub use proposer::{Proposer, ProposerError, TxPool};
pub use registry::{
    InMemoryValidatorRegistry, PerformanceUpdate, SimulatedBehavior, SimulatedEndpoint,
    ValidatorEndpoint, ValidatorRegistry,
};
pub use scoring::SelectedValidator;

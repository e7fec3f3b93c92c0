use crate::evaluator::EvaluationError;
use crate::types::ValidatorId;
use crate::validation::ErrorClass;

use super::challenge::ChallengeCategory;

/// Failures reported by a [`super::ValidatorRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown validator {0}")]
    UnknownValidator(ValidatorId),

    #[error("validator {validator} failed: {reason}")]
    Endpoint {
        validator: ValidatorId,
        reason: String,
    },

    #[error("validator registry unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a [`super::ChallengeGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    #[error("cannot generate a {category} challenge: {reason}")]
    Generation {
        category: ChallengeCategory,
        reason: String,
    },

    #[error("difficulty {0} is out of range")]
    Difficulty(u8),
}

/// Errors that end a consensus round.
///
/// Per-validator timeouts and failures are not errors of the round; they
/// are recorded on the individual responses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("challenge: {0}")]
    Challenge(#[from] ChallengeError),

    #[error("evaluation: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("no eligible validators")]
    NoEligibleValidators,

    #[error("round cancelled")]
    Cancelled,

    #[error("round failed: {primary}; stake-only fallback failed: {fallback}")]
    Failed {
        primary: Box<ConsensusError>,
        fallback: Box<ConsensusError>,
    },
}

impl ConsensusError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConsensusError::Cancelled => ErrorClass::Liveness,
            _ => ErrorClass::Protocol,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            ConsensusError::Registry(_) => "protocol.registry",
            ConsensusError::Challenge(_) => "protocol.challenge",
            ConsensusError::Evaluation(_) => "protocol.evaluation",
            ConsensusError::NoEligibleValidators => "protocol.no_eligible_validators",
            ConsensusError::Cancelled => "liveness.cancelled",
            ConsensusError::Failed { .. } => "protocol.round_failed",
        }
    }
}

//! History-proof checkpoints.

use serde::{Deserialize, Serialize};

use super::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("checkpoint sequence {0} has no successor")]
pub struct SequenceOverflow(pub u64);

/// One timestamped, hash-linked item of a history proof.
///
/// A sequence of checkpoints proves event ordering independently of who
/// proposed the block: sequence numbers step by one, timestamps strictly
/// increase and each item links to the hash of its predecessor.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    /// Milliseconds since Unix epoch.
    pub timestamp: u64,
    pub content_hash: Hash256,
    pub prev_hash: Hash256,
}

impl Checkpoint {
    /// Hash of this checkpoint:
    /// `H(sequence (8, BE) || timestamp (8, BE) || content_hash || prev_hash)`.
    pub fn hash(&self) -> Hash256 {
        Hash256::compute_parts(&[
            &self.sequence.to_be_bytes(),
            &self.timestamp.to_be_bytes(),
            self.content_hash.as_bytes(),
            self.prev_hash.as_bytes(),
        ])
    }

    /// Builds the checkpoint that follows `self`.
    pub fn next(&self, timestamp: u64, content_hash: Hash256) -> Result<Checkpoint, SequenceOverflow> {
        let sequence = self
            .sequence
            .checked_add(1)
            .ok_or(SequenceOverflow(self.sequence))?;
        Ok(Checkpoint {
            sequence,
            timestamp,
            content_hash,
            prev_hash: self.hash(),
        })
    }
}

//! History-proof checking.
//!
//! A history proof is optional ordering evidence attached to a block. Local
//! consistency is checked here; protocol-specific acceptance rules beyond
//! that are delegated to a [`HistoryEngine`].

use crate::types::Checkpoint;

use super::error::HistoryError;

/// External collaborator applying protocol-specific acceptance rules to a
/// locally consistent checkpoint sequence.
pub trait HistoryEngine: Send + Sync {
    fn accept(&self, checkpoints: &[Checkpoint]) -> Result<(), String>;
}

/// Accepts every locally consistent sequence.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissiveHistoryEngine;

impl HistoryEngine for PermissiveHistoryEngine {
    fn accept(&self, _checkpoints: &[Checkpoint]) -> Result<(), String> {
        Ok(())
    }
}

/// Validates checkpoint sequences.
#[derive(Clone, Debug, Default)]
pub struct HistoryProofChecker<H = PermissiveHistoryEngine> {
    engine: H,
}

impl<H: HistoryEngine> HistoryProofChecker<H> {
    pub fn new(engine: H) -> Self {
        Self { engine }
    }

    /// Checks sequence, timestamp and hash-link continuity, then asks the
    /// engine. An empty sequence is valid and is not sent to the engine.
    pub fn check(&self, checkpoints: &[Checkpoint]) -> Result<(), HistoryError> {
        if checkpoints.is_empty() {
            return Ok(());
        }

        for (offset, pair) in checkpoints.windows(2).enumerate() {
            let (prev, cur) = (&pair[0], &pair[1]);
            let index = offset + 1;

            if prev.sequence.checked_add(1) != Some(cur.sequence) {
                return Err(HistoryError::SequenceGap {
                    index,
                    previous: prev.sequence,
                    actual: cur.sequence,
                });
            }
            if cur.timestamp <= prev.timestamp {
                return Err(HistoryError::NonMonotonicTimestamp {
                    index,
                    previous: prev.timestamp,
                    actual: cur.timestamp,
                });
            }
            if cur.prev_hash != prev.hash() {
                return Err(HistoryError::BrokenLink { index });
            }
        }

        self.engine
            .accept(checkpoints)
            .map_err(HistoryError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn chain(len: usize) -> Vec<Checkpoint> {
        let mut out = vec![Checkpoint {
            sequence: 10,
            timestamp: 1_000,
            content_hash: Hash256::compute(b"c0"),
            prev_hash: Hash256::ZERO,
        }];
        for i in 1..len {
            let prev = &out[i - 1];
            let next = prev
                .next(prev.timestamp + 5, Hash256::compute(&[i as u8]))
                .unwrap();
            out.push(next);
        }
        out
    }

    struct RejectAll;

    impl HistoryEngine for RejectAll {
        fn accept(&self, _checkpoints: &[Checkpoint]) -> Result<(), String> {
            Err("unknown anchor".to_string())
        }
    }

    #[test]
    fn empty_and_linked_sequences_pass() {
        let checker = HistoryProofChecker::<PermissiveHistoryEngine>::default();
        assert_eq!(checker.check(&[]), Ok(()));
        assert_eq!(checker.check(&chain(1)), Ok(()));
        assert_eq!(checker.check(&chain(6)), Ok(()));
    }

    #[test]
    fn sequence_gap_fails() {
        let mut cps = chain(4);
        cps[2].sequence += 1;
        assert!(matches!(
            HistoryProofChecker::<PermissiveHistoryEngine>::default().check(&cps),
            Err(HistoryError::SequenceGap { index: 2, .. })
        ));
    }

    #[test]
    fn equal_timestamps_fail() {
        let mut cps = chain(3);
        cps[2].timestamp = cps[1].timestamp;
        assert!(matches!(
            HistoryProofChecker::<PermissiveHistoryEngine>::default().check(&cps),
            Err(HistoryError::NonMonotonicTimestamp { index: 2, .. })
        ));
    }

    #[test]
    fn broken_link_anywhere_fails() {
        let mut cps = chain(5);
        // Changing an early checkpoint breaks the link of its successor.
        cps[1].content_hash = Hash256::compute(b"forged");
        assert_eq!(
            HistoryProofChecker::<PermissiveHistoryEngine>::default().check(&cps),
            Err(HistoryError::BrokenLink { index: 2 })
        );
    }

    #[test]
    fn engine_has_the_final_word() {
        let checker = HistoryProofChecker::new(RejectAll);
        assert_eq!(checker.check(&[]), Ok(()));
        assert_eq!(
            checker.check(&chain(2)),
            Err(HistoryError::Rejected("unknown anchor".to_string()))
        );
    }
}

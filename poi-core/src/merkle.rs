//! Binary Merkle root over ordered leaf hashes.
//!
//! Rules, which define the committed transaction root bit-for-bit:
//!
//! - empty input → [`Hash256::ZERO`],
//! - one leaf → that leaf, unchanged,
//! - otherwise pair adjacent nodes, duplicating the last node of any level
//!   with an odd count, hash each 64-byte concatenation, and repeat until a
//!   single node remains.

use crate::types::Hash256;

/// Hash of an interior node: `H(left || right)`.
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    Hash256::compute_parts(&[left.as_bytes(), right.as_bytes()])
}

/// Computes the Merkle root of `leaves`.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    match leaves {
        [] => Hash256::ZERO,
        [single] => *single,
        _ => {
            let mut level: Vec<Hash256> = leaves.to_vec();
            while level.len() > 1 {
                if level.len() % 2 == 1 {
                    let last = level[level.len() - 1];
                    level.push(last);
                }
                level = level
                    .chunks_exact(2)
                    .map(|pair| hash_pair(&pair[0], &pair[1]))
                    .collect();
            }
            level[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Hash256 {
        Hash256::compute(&[byte])
    }

    #[test]
    fn empty_and_single_leaf() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
        assert_eq!(merkle_root(&[leaf(1)]), leaf(1));
    }

    #[test]
    fn two_leaves_hash_once() {
        let (a, b) = (leaf(1), leaf(2));
        assert_eq!(merkle_root(&[a, b]), hash_pair(&a, &b));
    }

    #[test]
    fn odd_count_duplicates_last_leaf() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));

        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn odd_levels_above_the_leaves_also_duplicate() {
        // 5 leaves -> 3 nodes -> 2 nodes -> root
        let leaves: Vec<Hash256> = (0..5).map(leaf).collect();
        let l1 = [
            hash_pair(&leaves[0], &leaves[1]),
            hash_pair(&leaves[2], &leaves[3]),
            hash_pair(&leaves[4], &leaves[4]),
        ];
        let l2 = [hash_pair(&l1[0], &l1[1]), hash_pair(&l1[2], &l1[2])];
        assert_eq!(merkle_root(&leaves), hash_pair(&l2[0], &l2[1]));
    }

    #[test]
    fn rebuilding_is_stable_and_order_sensitive() {
        let leaves: Vec<Hash256> = (0..7).map(leaf).collect();
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves.clone()));

        let mut swapped = leaves.clone();
        swapped.swap(2, 5);
        assert_ne!(merkle_root(&leaves), merkle_root(&swapped));

        let mut adjacent = leaves.clone();
        adjacent.swap(0, 1);
        assert_ne!(merkle_root(&leaves), merkle_root(&adjacent));
    }
}

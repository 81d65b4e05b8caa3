use crate::crypto::hash::{sha3_256_pair, Hash256};

/// Compute a Merkle root over pre-hashed leaves.
///
/// Pairwise SHA3-256; an odd node at any level is paired with itself
/// (duplicate-last rule). The empty set maps to the zero digest.
pub fn create_root(items: &[Hash256]) -> Hash256 {
    if items.is_empty() {
        return Hash256::ZERO;
    }

    let mut level: Vec<Hash256> = items.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            let right = if chunk.len() > 1 { &chunk[1] } else { &chunk[0] };
            next.push(sha3_256_pair(&chunk[0], right));
        }
        level = next;
    }
    level[0]
}

/// Recompute and compare — membership proofs are out of scope, the whole
/// leaf set is always at hand in consensus paths.
pub fn verify(root: &Hash256, items: &[Hash256]) -> bool {
    create_root(items) == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha3_256;

    fn leaves(n: usize) -> Vec<Hash256> {
        (0..n)
            .map(|i| sha3_256(format!("leaf-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(create_root(&[]), Hash256::ZERO);
    }

    #[test]
    fn test_single_leaf_is_identity() {
        let l = leaves(1);
        assert_eq!(create_root(&l), l[0]);
    }

    #[test]
    fn test_round_trip() {
        for n in 1..=9 {
            let l = leaves(n);
            let root = create_root(&l);
            assert!(verify(&root, &l), "round trip failed for {n} leaves");
        }
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        // With 3 leaves, the last is paired with itself: verify the tree
        // built by hand matches.
        let l = leaves(3);
        let left = crate::crypto::hash::sha3_256_pair(&l[0], &l[1]);
        let right = crate::crypto::hash::sha3_256_pair(&l[2], &l[2]);
        let expected = crate::crypto::hash::sha3_256_pair(&left, &right);
        assert_eq!(create_root(&l), expected);
    }

    #[test]
    fn test_different_sets_different_roots() {
        let a = leaves(4);
        let mut b = a.clone();
        b[2] = sha3_256(b"tampered");
        assert_ne!(create_root(&a), create_root(&b));
    }

    #[test]
    fn test_order_matters() {
        let a = leaves(4);
        let mut b = a.clone();
        b.swap(0, 3);
        assert_ne!(create_root(&a), create_root(&b));
    }
}

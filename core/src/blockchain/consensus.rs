/// Novara difficulty & target arithmetic.
///
/// Difficulty is an integer; the target is the full 256-bit quotient
/// `MAX_TARGET / difficulty`, compared big-endian against the canonical
/// header hash. Retargeting runs every `ADJUSTMENT_INTERVAL` blocks with a
/// conservative 0.75 damping factor on the observed ratio and a hard
/// [0.25, 4.0] clamp per adjustment.
use num_bigint::BigUint;
use num_traits::One;
use once_cell::sync::Lazy;

use crate::crypto::hash::Hash256;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Target block time in seconds.
pub const TARGET_BLOCK_TIME: u64 = 60;

/// Retarget cadence, in blocks.
pub const ADJUSTMENT_INTERVAL: u64 = 10;

/// Difficulty floor.
pub const MIN_DIFFICULTY: u64 = 1;

/// Difficulty at genesis.
pub const INITIAL_DIFFICULTY: u64 = 1_000;

/// Difficulty ceiling.
pub const MAX_DIFFICULTY: u64 = u64::MAX / 1_000;

/// Conservative damping applied to the observed expected/actual ratio.
pub const RETARGET_DAMPING: f64 = 0.75;

/// Per-retarget ratio clamp.
pub const MIN_RETARGET_RATIO: f64 = 0.25;
pub const MAX_RETARGET_RATIO: f64 = 4.0;

/// Nonce search bound (kept within 2^53 for cross-ecosystem safety).
pub const MAX_NONCE: u64 = 1 << 53;

/// 2^256 − 1: the easiest possible target.
pub static MAX_TARGET: Lazy<BigUint> = Lazy::new(|| (BigUint::one() << 256u32) - BigUint::one());

// ---------------------------------------------------------------------------
// Target calculations
// ---------------------------------------------------------------------------

/// `floor(MAX_TARGET / difficulty)` as a big-endian 32-byte bound.
pub fn target_from_difficulty(difficulty: u64) -> Hash256 {
    let d = difficulty.max(MIN_DIFFICULTY);
    let quotient = &*MAX_TARGET / BigUint::from(d);
    let bytes = quotient.to_bytes_be();

    let mut out = [0u8; 32];
    let start = 32 - bytes.len();
    out[start..].copy_from_slice(&bytes);
    Hash256(out)
}

/// A hash satisfies proof-of-work iff it does not exceed the target.
pub fn meets_target(hash: &Hash256, target: &Hash256) -> bool {
    hash <= target
}

/// Expected hashes per block at `difficulty` (difficulty × 2³²).
pub fn work_per_block(difficulty: u64) -> u128 {
    (difficulty as u128) << 32
}

// ---------------------------------------------------------------------------
// Retargeting
// ---------------------------------------------------------------------------

/// Difficulty for the block at `next_height`.
///
/// Off the retarget boundary the difficulty carries over unchanged. On the
/// boundary, `interval_span_secs` is the wall-clock time the previous
/// `ADJUSTMENT_INTERVAL` blocks actually took:
///
/// ```text
/// ratio = expected / actual × 0.75        (damping)
/// ratio = clamp(ratio, 0.25, 4.0)
/// next  = current × ratio
/// next  = max(next, INITIAL_DIFFICULTY / 4)
/// next  = clamp(next, MIN_DIFFICULTY, MAX_DIFFICULTY)
/// ```
pub fn next_difficulty(
    next_height: u64,
    current_difficulty: u64,
    interval_span_secs: Option<u64>,
) -> u64 {
    if next_height == 0 {
        return INITIAL_DIFFICULTY;
    }
    if next_height % ADJUSTMENT_INTERVAL != 0 {
        return clamp_difficulty(current_difficulty);
    }

    let actual = match interval_span_secs {
        Some(s) if s > 0 => s,
        _ => return clamp_difficulty(current_difficulty),
    };

    let expected = ADJUSTMENT_INTERVAL * TARGET_BLOCK_TIME;
    let ratio = (expected as f64 / actual as f64) * RETARGET_DAMPING;
    let ratio = ratio.clamp(MIN_RETARGET_RATIO, MAX_RETARGET_RATIO);

    let next = (current_difficulty as f64 * ratio) as u64;
    let next = next.max(INITIAL_DIFFICULTY / 4);
    clamp_difficulty(next)
}

pub fn clamp_difficulty(difficulty: u64) -> u64 {
    difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

pub fn difficulty_in_range(difficulty: u64) -> bool {
    (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_difficulty_one_is_max() {
        assert_eq!(target_from_difficulty(1), Hash256::MAX);
    }

    #[test]
    fn test_target_monotonic_decreasing() {
        let mut prev = target_from_difficulty(1);
        for d in [2u64, 10, 1_000, 1_000_000, u64::MAX / 1_000] {
            let t = target_from_difficulty(d);
            assert!(t < prev, "target({d}) must be below target of smaller d");
            prev = t;
        }
    }

    #[test]
    fn test_target_division_exact() {
        // difficulty 2^8 shifts the bound down 8 bits
        let t = target_from_difficulty(256);
        assert_eq!(t.0[0], 0x00);
        assert_eq!(t.0[1], 0xff);
    }

    #[test]
    fn test_meets_target_boundary() {
        let target = target_from_difficulty(1_000);
        assert!(meets_target(&target, &target));
        assert!(meets_target(&Hash256::ZERO, &target));
        assert!(!meets_target(&Hash256::MAX, &target));
    }

    #[test]
    fn test_no_retarget_off_boundary() {
        assert_eq!(next_difficulty(11, 5_000, Some(1)), 5_000);
        assert_eq!(next_difficulty(19, 5_000, Some(1)), 5_000);
    }

    #[test]
    fn test_retarget_perfect_timing_damps_down() {
        // Exactly on schedule: ratio = 1 × 0.75 → difficulty eases off.
        let span = ADJUSTMENT_INTERVAL * TARGET_BLOCK_TIME;
        assert_eq!(next_difficulty(20, 10_000, Some(span)), 7_500);
    }

    #[test]
    fn test_retarget_fast_blocks_raise_difficulty() {
        // Blocks twice as fast: ratio = 2 × 0.75 = 1.5
        let span = ADJUSTMENT_INTERVAL * TARGET_BLOCK_TIME / 2;
        assert_eq!(next_difficulty(20, 10_000, Some(span)), 15_000);
    }

    #[test]
    fn test_retarget_ratio_clamped() {
        // 100× too fast still clamps at 4×.
        let span = (ADJUSTMENT_INTERVAL * TARGET_BLOCK_TIME) / 100;
        assert_eq!(next_difficulty(20, 10_000, Some(span)), 40_000);

        // 100× too slow clamps at 0.25×.
        let span = ADJUSTMENT_INTERVAL * TARGET_BLOCK_TIME * 100;
        assert_eq!(next_difficulty(20, 10_000, Some(span)), 2_500);
    }

    #[test]
    fn test_retarget_floor_quarter_initial() {
        // Collapsing difficulty bottoms out at INITIAL_DIFFICULTY / 4.
        let span = ADJUSTMENT_INTERVAL * TARGET_BLOCK_TIME * 100;
        assert_eq!(next_difficulty(20, 300, Some(span)), INITIAL_DIFFICULTY / 4);
    }

    #[test]
    fn test_work_per_block() {
        assert_eq!(work_per_block(1), 1u128 << 32);
        assert_eq!(work_per_block(1_000), 1_000u128 << 32);
    }

    #[test]
    fn test_max_nonce_bound() {
        assert_eq!(MAX_NONCE, 9_007_199_254_740_992);
    }
}

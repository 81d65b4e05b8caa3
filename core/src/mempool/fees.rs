/// Fee rates and fee buckets.
///
/// Rates are fixed-point integers scaled by 10⁵ (five decimal places of
/// atomic-units-per-byte); equality on the scaled integer defines bucket
/// identity, so no float tolerance games anywhere on this path.
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed-point scale for fee rates: 10⁵.
pub const FEE_RATE_SCALE: u128 = 100_000;

/// Minimum fee rate: 1 atomic unit per byte (unscaled).
pub const MIN_FEE_RATE: u128 = 1;

/// Replace-by-fee increment: replacement must beat the conflict set's
/// aggregate rate by more than 10% (numerator/denominator form).
pub const RBF_INCREMENT_NUM: u128 = 11;
pub const RBF_INCREMENT_DEN: u128 = 10;

/// Buckets thinner than this may be merged into a neighbour when
/// estimating.
pub const MIN_BUCKET_SIZE: usize = 3;

/// Dynamic minimum fee never exceeds 20 × base.
pub const MAX_DYNAMIC_FEE_MULTIPLIER: u128 = 20;

/// Scaled fee rate: `fee × 10⁵ / size`.
pub fn fee_rate(fee: u128, size: usize) -> u128 {
    if size == 0 {
        return 0;
    }
    fee * FEE_RATE_SCALE / size as u128
}

/// Base minimum rate in scaled units.
pub fn base_rate_scaled() -> u128 {
    MIN_FEE_RATE * FEE_RATE_SCALE
}

/// RBF acceptance test: `rate > Σ conflict rates × 1.1`, evaluated in
/// integers so the boundary case is exact.
pub fn rbf_acceptable(replacement_rate: u128, conflict_rate_sum: u128) -> bool {
    replacement_rate * RBF_INCREMENT_DEN > conflict_rate_sum * RBF_INCREMENT_NUM
}

// ---------------------------------------------------------------------------
// Dynamic minimum fee
// ---------------------------------------------------------------------------

/// Congestion-scaled minimum fee rate (scaled units).
///
/// With `c = len / max`:
///   c ≤ 0.50          → 1
///   0.50 < c ≤ 0.75   → 1 + 2(c − 0.5)
///   0.75 < c ≤ 0.90   → 2 + 8(c − 0.75)²
///   c > 0.90          → 4 + 16(c − 0.9)²
/// capped at 20 × base.
pub fn dynamic_min_fee(len: usize, max_size: usize, base_scaled: u128) -> u128 {
    if max_size == 0 {
        return base_scaled;
    }
    let c = len as f64 / max_size as f64;
    let multiplier = if c <= 0.5 {
        1.0
    } else if c <= 0.75 {
        1.0 + 2.0 * (c - 0.5)
    } else if c <= 0.9 {
        2.0 + 8.0 * (c - 0.75) * (c - 0.75)
    } else {
        4.0 + 16.0 * (c - 0.9) * (c - 0.9)
    };

    let scaled = (base_scaled as f64 * multiplier).floor() as u128;
    scaled.min(base_scaled * MAX_DYNAMIC_FEE_MULTIPLIER)
}

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStat {
    pub count: usize,
}

/// Transactions binned by scaled fee rate.
#[derive(Debug, Default)]
pub struct FeeBuckets {
    buckets: BTreeMap<u128, BucketStat>,
}

impl FeeBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rate: u128) {
        self.buckets.entry(rate).or_default().count += 1;
    }

    pub fn remove(&mut self, rate: u128) {
        if let Some(stat) = self.buckets.get_mut(&rate) {
            stat.count = stat.count.saturating_sub(1);
            if stat.count == 0 {
                self.buckets.remove(&rate);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total_entries(&self) -> usize {
        self.buckets.values().map(|s| s.count).sum()
    }

    /// Count-weighted average rate over the buckets, merging buckets below
    /// `MIN_BUCKET_SIZE` entries into their upper neighbour first.
    pub fn weighted_average(&self) -> Option<u128> {
        if self.buckets.is_empty() {
            return None;
        }

        // Merge pass: sparse buckets contribute their count at the
        // neighbour's rate so outliers don't skew the estimate.
        let mut merged: Vec<(u128, usize)> = Vec::with_capacity(self.buckets.len());
        let mut carry = 0usize;
        for (&rate, stat) in self.buckets.iter() {
            let count = stat.count + carry;
            if count < MIN_BUCKET_SIZE {
                carry = count;
            } else {
                merged.push((rate, count));
                carry = 0;
            }
        }
        if carry > 0 {
            // Leftover sparse tail folds into the top bucket (or stands
            // alone when it is the only data).
            if let Some(last) = merged.last_mut() {
                last.1 += carry;
            } else {
                let (&rate, _) = self.buckets.iter().next_back().expect("non-empty");
                merged.push((rate, carry));
            }
        }

        let total: usize = merged.iter().map(|(_, c)| c).sum();
        if total == 0 {
            return None;
        }
        let weighted: u128 = merged.iter().map(|(r, c)| r * *c as u128).sum();
        Some(weighted / total as u128)
    }

    /// Fee estimate for confirmation within `target_blocks`: weighted
    /// average adjusted by `(1 + 1/target)`, floored at the base rate.
    pub fn estimate(&self, target_blocks: u32, base_scaled: u128) -> u128 {
        let target = target_blocks.max(1) as u128;
        match self.weighted_average() {
            Some(avg) => {
                let adjusted = avg + avg / target;
                adjusted.max(base_scaled)
            }
            None => base_scaled,
        }
    }

    pub fn min_rate(&self) -> Option<u128> {
        self.buckets.keys().next().copied()
    }

    pub fn max_rate(&self) -> Option<u128> {
        self.buckets.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_rate_fixed_point() {
        // 400 atomic over 200 bytes = 2.0 → 200000 scaled
        assert_eq!(fee_rate(400, 200), 200_000);
        assert_eq!(fee_rate(500, 200), 250_000);
        assert_eq!(fee_rate(440, 200), 220_000);
        assert_eq!(fee_rate(1, 3), 33_333);
        assert_eq!(fee_rate(100, 0), 0);
    }

    #[test]
    fn test_rbf_boundaries() {
        // 2.5 > 2.0 × 1.1 → accept
        assert!(rbf_acceptable(250_000, 200_000));
        // 2.2 ≯ 2.2 → reject (exact boundary)
        assert!(!rbf_acceptable(220_000, 200_000));
        assert!(rbf_acceptable(220_001, 200_000));
    }

    #[test]
    fn test_dynamic_fee_curve() {
        let base = base_rate_scaled();
        // Low congestion: base
        assert_eq!(dynamic_min_fee(10_000, 50_000, base), base);
        assert_eq!(dynamic_min_fee(25_000, 50_000, base), base);
        // c = 0.6 → m = 1.2
        assert_eq!(dynamic_min_fee(30_000, 50_000, base), 120_000);
        // c = 0.8 → m = 2 + 8(0.05)² = 2.02
        assert_eq!(dynamic_min_fee(40_000, 50_000, base), 202_000);
        // c = 0.92 → m = 4 + 16(0.02)² = 4.0064
        assert_eq!(dynamic_min_fee(46_000, 50_000, base), 400_640);
    }

    #[test]
    fn test_dynamic_fee_capped() {
        let base = base_rate_scaled();
        // c → 1.0 gives m = 4 + 16(0.1)² = 4.16, still below the 20× cap;
        // an absurd base multiplier cannot exceed it either.
        assert!(dynamic_min_fee(50_000, 50_000, base) <= base * MAX_DYNAMIC_FEE_MULTIPLIER);
    }

    #[test]
    fn test_congested_floor_rejects_rate_three() {
        let base = base_rate_scaled();
        let min = dynamic_min_fee(46_000, 50_000, base);
        let rate_three = 3 * FEE_RATE_SCALE;
        assert!(rate_three < min, "rate 3 must fall below dynamic min ≈ 4");
    }

    #[test]
    fn test_bucket_insert_remove() {
        let mut buckets = FeeBuckets::new();
        buckets.insert(200_000);
        buckets.insert(200_000);
        buckets.insert(300_000);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets.total_entries(), 3);

        buckets.remove(200_000);
        buckets.remove(200_000);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets.min_rate(), Some(300_000));
    }

    #[test]
    fn test_weighted_average() {
        let mut buckets = FeeBuckets::new();
        for _ in 0..3 {
            buckets.insert(100_000);
        }
        for _ in 0..3 {
            buckets.insert(300_000);
        }
        assert_eq!(buckets.weighted_average(), Some(200_000));
    }

    #[test]
    fn test_sparse_buckets_merge_upward() {
        let mut buckets = FeeBuckets::new();
        buckets.insert(100_000); // sparse: 1 entry
        for _ in 0..4 {
            buckets.insert(200_000);
        }
        // The sparse low bucket merges into 200000: avg = 200000 weighted
        // by 5 entries with 1 counted at the 200000 rate.
        assert_eq!(buckets.weighted_average(), Some(200_000));
    }

    #[test]
    fn test_estimate_adjusts_by_target() {
        let mut buckets = FeeBuckets::new();
        for _ in 0..4 {
            buckets.insert(200_000);
        }
        let base = base_rate_scaled();
        // target 1: avg × 2
        assert_eq!(buckets.estimate(1, base), 400_000);
        // target 2: avg × 1.5
        assert_eq!(buckets.estimate(2, base), 300_000);
        // target 4: avg × 1.25
        assert_eq!(buckets.estimate(4, base), 250_000);
    }

    #[test]
    fn test_estimate_floors_at_base() {
        let buckets = FeeBuckets::new();
        let base = base_rate_scaled();
        assert_eq!(buckets.estimate(6, base), base);
    }
}

// tcp-telemetry: Fixed-shape latency histogram
// Power-of-two buckets plus running sum and sum-of-squares, all atomics.
// Recording cost is identical for every sample value.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of log2 buckets; bucket i covers [2^(i-1), 2^i) ticks.
pub const BUCKETS: usize = 32;

/// One stage's sample accumulator.
pub struct StageHistogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
    sum_sq: AtomicU64,
}

impl StageHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            sum_sq: AtomicU64::new(0),
        }
    }

    /// Record one sample. Branch-free bucket index from the bit width.
    #[inline(always)]
    pub fn record(&self, ticks: u64) {
        let bucket = (64 - ticks.leading_zeros() as usize).min(BUCKETS - 1);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(ticks, Ordering::Relaxed);
        self.sum_sq
            .fetch_add(ticks.saturating_mul(ticks), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Coefficient of variation: stddev / mean. Zero until two samples
    /// exist or while the mean is zero.
    pub fn cv(&self) -> f64 {
        let count = self.count();
        if count < 2 {
            return 0.0;
        }
        let n = count as f64;
        let mean = self.sum.load(Ordering::Relaxed) as f64 / n;
        if mean <= 0.0 {
            return 0.0;
        }
        let mean_sq = self.sum_sq.load(Ordering::Relaxed) as f64 / n;
        let variance = (mean_sq - mean * mean).max(0.0);
        variance.sqrt() / mean
    }

    /// Bucket counts, for rendering distribution shape.
    pub fn buckets(&self) -> [u64; BUCKETS] {
        std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed))
    }
}

impl Default for StageHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_histogram() {
        let h = StageHistogram::new();
        assert_eq!(h.count(), 0);
        assert_eq!(h.mean(), 0.0);
        assert_eq!(h.cv(), 0.0);
    }

    #[test]
    fn test_mean_and_cv() {
        let h = StageHistogram::new();
        for ticks in [100u64, 100, 100, 100] {
            h.record(ticks);
        }
        assert_eq!(h.count(), 4);
        assert_eq!(h.mean(), 100.0);
        assert_eq!(h.cv(), 0.0);

        h.record(200);
        assert!(h.cv() > 0.0);
    }

    #[test]
    fn test_bucket_placement() {
        let h = StageHistogram::new();
        h.record(0); // bucket 0
        h.record(1); // bucket 1
        h.record(2); // bucket 2
        h.record(3); // bucket 2
        h.record(1024); // bucket 11
        let buckets = h.buckets();
        assert_eq!(buckets[0], 1);
        assert_eq!(buckets[1], 1);
        assert_eq!(buckets[2], 2);
        assert_eq!(buckets[11], 1);
    }

    #[test]
    fn test_huge_samples_clamp_to_last_bucket() {
        let h = StageHistogram::new();
        h.record(u64::MAX);
        assert_eq!(h.buckets()[BUCKETS - 1], 1);
    }
}

//! Power-of-two latency histogram.
//!
//! 32 buckets keyed by bit-length: bucket 0 holds exactly `0`us; bucket
//! `i` (`i >= 1`) holds durations in `[2^(i-1), 2^i)` microseconds. The
//! top bucket's lower bound, `2^30` us (~1,073s), comfortably covers the
//! spec's "roughly `[0, 2000s)`" requirement with headroom in the final
//! bucket for anything larger. Recording is a single atomic increment;
//! no lock is ever taken on the hot path.

use std::sync::atomic::{AtomicU64, Ordering};

const BUCKET_COUNT: usize = 32;

/// Lock-free latency histogram keyed by `log2(microseconds)`.
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKET_COUNT],
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl LatencyHistogram {
    /// Record a duration given in nanoseconds (converted to whole
    /// microseconds, rounding down).
    pub fn record_nanos(&self, duration_ns: u64) {
        self.record_micros(duration_ns / 1_000);
    }

    /// Record a duration given in microseconds.
    pub fn record_micros(&self, duration_us: u64) {
        let bucket = bucket_for(duration_us);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Estimate the `pct`th percentile (0.0–100.0) in microseconds, by
    /// locating the bucket containing that rank among all recorded
    /// samples and returning its lower bound.
    ///
    /// Returns `0` if no samples have been recorded.
    #[must_use]
    pub fn percentile(&self, pct: f64) -> u64 {
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0;
        }
        let target = ((pct.clamp(0.0, 100.0) / 100.0) * (total - 1) as f64).floor() as u64;
        let mut cumulative = 0u64;
        for (i, count) in counts.iter().enumerate() {
            cumulative += count;
            if target < cumulative {
                return if i == 0 { 0 } else { 1u64 << (i - 1) };
            }
        }
        1u64 << (BUCKET_COUNT - 2)
    }

    /// Total number of samples recorded.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }
}

fn bucket_for(duration_us: u64) -> usize {
    if duration_us == 0 {
        return 0;
    }
    let bucket = 64 - duration_us.leading_zeros() as usize;
    bucket.min(BUCKET_COUNT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_falls_in_bucket_zero() {
        assert_eq!(bucket_for(0), 0);
        assert_eq!(bucket_for(1), 1);
    }

    #[test]
    fn bucket_boundaries_are_powers_of_two() {
        assert_eq!(bucket_for(2), 2);
        assert_eq!(bucket_for(3), 2);
        assert_eq!(bucket_for(4), 3);
    }

    #[test]
    fn empty_histogram_percentile_is_zero() {
        let h = LatencyHistogram::default();
        assert_eq!(h.percentile(50.0), 0);
    }

    #[test]
    fn percentile_tracks_recorded_magnitude() {
        let h = LatencyHistogram::default();
        for _ in 0..100 {
            h.record_micros(10);
        }
        for _ in 0..5 {
            h.record_micros(10_000);
        }
        assert!(h.percentile(50.0) < 100);
        assert!(h.percentile(99.0) >= 1_000);
    }

    #[test]
    fn count_reflects_total_samples() {
        let h = LatencyHistogram::default();
        h.record_micros(1);
        h.record_micros(1_000_000);
        assert_eq!(h.count(), 2);
    }

    proptest::proptest! {
        #[test]
        fn bucket_for_is_monotonically_nondecreasing(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            proptest::prop_assert!(bucket_for(lo) <= bucket_for(hi));
        }

        #[test]
        fn bucket_for_is_always_in_range(duration_us in 0u64..u64::MAX) {
            proptest::prop_assert!(bucket_for(duration_us) < BUCKET_COUNT);
        }

        #[test]
        fn count_equals_number_of_recordings(
            durations in proptest::collection::vec(0u64..1_000_000u64, 0..64),
        ) {
            let h = LatencyHistogram::default();
            let n = durations.len() as u64;
            for d in durations {
                h.record_micros(d);
            }
            proptest::prop_assert_eq!(h.count(), n);
        }
    }
}

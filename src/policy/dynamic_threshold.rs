//! Dynamic-threshold policy.
//!
//! Requests are partitioned by size: tier `i` serves everything below
//! threshold `i`, the last tier takes the rest. Every `check_cnt`
//! operations the policy compares the observed byte ratio between adjacent
//! tiers with the configured target; when the gap exceeds the trigger and
//! is not already shrinking, the threshold moves by `degree` of its value,
//! clamped to its `[min, max]` band.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::counters::SizeCounters;
use crate::sync::atomics::AtomicF64;

/// Default relative ratio gap that triggers an adjustment (2%).
pub const THRESHOLD_TRIGGER: f64 = 0.02;

/// Default adjustment step as a fraction of the threshold value (15%).
pub const THRESHOLD_DEGREE: f64 = 0.15;

/// Default number of operations between ratio checks.
pub const THRESHOLD_CHECK_CNT: u32 = 20;

/// Default spacing of auto-derived thresholds, in bytes.
pub const THRESHOLD_STEP: usize = 1024;

/// One size cut point between two adjacent tiers.
#[derive(Debug)]
pub(crate) struct ThresholdLevel {
    /// Current cut point in bytes. Requests below it stay on the earlier
    /// tier.
    val: AtomicUsize,
    min: usize,
    max: usize,
    /// Target byte ratio between the later and the earlier tier.
    expected_ratio: f64,
    /// Gap observed at the previous check.
    last_gap: AtomicF64,
}

impl ThresholdLevel {
    pub fn new(val: usize, min: usize, max: usize, expected_ratio: f64) -> Self {
        Self {
            val: AtomicUsize::new(val),
            min,
            max,
            expected_ratio,
            last_gap: AtomicF64::new(0.0),
        }
    }

    /// Current cut point.
    pub fn value(&self) -> usize {
        self.val.load(Ordering::Relaxed)
    }
}

pub(crate) struct DynamicThresholdPolicy {
    /// One level per adjacent tier pair; `levels.len() == tiers - 1`.
    levels: Vec<ThresholdLevel>,
    counters: Arc<SizeCounters>,
    countdown: AtomicI64,
    check_cnt: u32,
    trigger: f64,
    degree: f64,
}

impl DynamicThresholdPolicy {
    pub fn new(
        levels: Vec<ThresholdLevel>,
        counters: Arc<SizeCounters>,
        check_cnt: u32,
        trigger: f64,
        degree: f64,
    ) -> Self {
        Self {
            levels,
            counters,
            countdown: AtomicI64::new(i64::from(check_cnt)),
            check_cnt,
            trigger,
            degree,
        }
    }

    /// First tier whose threshold exceeds the request size.
    pub fn tier_for(&self, size: usize) -> usize {
        for (tier, level) in self.levels.iter().enumerate() {
            if size < level.value() {
                return tier;
            }
        }
        self.levels.len()
    }

    /// Countdown-gated ratio check over every adjacent tier pair.
    pub fn update_cfg(&self) {
        if self.countdown.fetch_sub(1, Ordering::Relaxed) - 1 > 0 {
            return;
        }

        for (index, level) in self.levels.iter().enumerate() {
            let prev_bytes = self.counters.total(index);
            let next_bytes = self.counters.total(index + 1);

            let mut current_ratio = -1.0;
            if prev_bytes > 0 {
                current_ratio = next_bytes as f64 / prev_bytes as f64;
                let previous_gap = level.last_gap.get();
                let gap = (current_ratio - level.expected_ratio).abs();
                level.last_gap.set(gap);
                if gap < self.trigger || gap < previous_gap {
                    // within tolerance, or already converging on its own
                    continue;
                }
            }

            let value = level.value();
            let step = (value as f64 * self.degree).ceil() as usize;
            if prev_bytes == 0 || current_ratio > level.expected_ratio {
                let raised = value + step;
                if raised <= level.max {
                    level.val.store(raised, Ordering::Relaxed);
                }
            } else {
                let lowered = value.saturating_sub(step);
                if lowered >= level.min {
                    level.val.store(lowered, Ordering::Relaxed);
                }
            }
        }

        self.countdown
            .store(i64::from(self.check_cnt), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tier_policy(check_cnt: u32) -> (DynamicThresholdPolicy, Arc<SizeCounters>) {
        let counters = Arc::new(SizeCounters::new(2));
        let levels = vec![ThresholdLevel::new(1024, 512, 1535, 1.0)];
        let policy = DynamicThresholdPolicy::new(
            levels,
            counters.clone(),
            check_cnt,
            THRESHOLD_TRIGGER,
            THRESHOLD_DEGREE,
        );
        (policy, counters)
    }

    #[test]
    fn test_size_partition() {
        let (policy, _) = two_tier_policy(1);
        assert_eq!(policy.tier_for(0), 0);
        assert_eq!(policy.tier_for(1023), 0);
        assert_eq!(policy.tier_for(1024), 1);
        assert_eq!(policy.tier_for(1 << 20), 1);
    }

    #[test]
    fn test_countdown_gates_checks() {
        let (policy, counters) = two_tier_policy(3);
        counters.increment(0, 1000);
        counters.increment(1, 3000);
        policy.update_cfg();
        policy.update_cfg();
        // two calls, countdown not exhausted: threshold untouched
        assert_eq!(policy.levels[0].value(), 1024);
        policy.update_cfg();
        assert_ne!(policy.levels[0].value(), 1024);
    }

    #[test]
    fn test_threshold_raises_when_next_tier_overfull() {
        let (policy, counters) = two_tier_policy(1);
        counters.increment(0, 1000);
        counters.increment(1, 3000);
        policy.update_cfg();
        // ratio 3.0 vs target 1.0: push more traffic onto the earlier tier
        assert_eq!(policy.levels[0].value(), 1024 + 154);
    }

    #[test]
    fn test_threshold_lowers_when_next_tier_underfull() {
        let (policy, counters) = two_tier_policy(1);
        counters.increment(0, 3000);
        counters.increment(1, 1000);
        policy.update_cfg();
        assert_eq!(policy.levels[0].value(), 1024 - 154);
    }

    #[test]
    fn test_threshold_clamped_to_band() {
        let counters = Arc::new(SizeCounters::new(2));
        let levels = vec![ThresholdLevel::new(1500, 512, 1535, 1.0)];
        let policy = DynamicThresholdPolicy::new(levels, counters.clone(), 1, 0.02, 0.15);
        counters.increment(0, 1000);
        counters.increment(1, 3000);
        policy.update_cfg();
        // 1500 + 225 would exceed max; value must stay put
        assert_eq!(policy.levels[0].value(), 1500);
    }

    #[test]
    fn test_empty_prev_tier_raises() {
        let (policy, counters) = two_tier_policy(1);
        counters.increment(1, 3000);
        policy.update_cfg();
        assert_eq!(policy.levels[0].value(), 1024 + 154);
    }

    #[test]
    fn test_converging_gap_skips_adjustment() {
        let (policy, counters) = two_tier_policy(1);
        counters.increment(0, 1000);
        counters.increment(1, 3000);
        policy.update_cfg(); // gap 2.0 recorded, threshold raised
        let after_first = policy.levels[0].value();

        // gap shrinks to 0.5: below the previous gap, so no further move
        counters.reset(0);
        counters.reset(1);
        counters.increment(0, 2000);
        counters.increment(1, 3000);
        policy.update_cfg();
        assert_eq!(policy.levels[0].value(), after_first);
    }

    #[test]
    fn test_within_trigger_no_adjustment() {
        let (policy, counters) = two_tier_policy(1);
        counters.increment(0, 1000);
        counters.increment(1, 1010);
        policy.update_cfg();
        assert_eq!(policy.levels[0].value(), 1024);
    }
}

//! Static-ratio policy.
//!
//! Tiers are configured with capacity ratios; every request goes to the
//! last tier whose accumulated size still trails its target relative to
//! tier 0. No state beyond the shared size counters, nothing to update.

use std::sync::Arc;

use crate::core::counters::SizeCounters;

pub(crate) struct StaticRatioPolicy {
    /// `ratio[0] / ratio[i]` per tier; index 0 holds 1.0.
    normalized: Vec<f64>,
    counters: Arc<SizeCounters>,
}

impl StaticRatioPolicy {
    /// Build from the raw builder ratios, normalizing against tier 0.
    pub fn new(ratios: &[f64], counters: Arc<SizeCounters>) -> Self {
        let base = ratios.first().copied().unwrap_or(1.0);
        let normalized = ratios.iter().map(|&ratio| base / ratio).collect();
        Self {
            normalized,
            counters,
        }
    }

    /// Tier whose fill currently lags the target.
    pub fn tier_for(&self) -> usize {
        let size_0 = self.counters.total(0) as f64;
        let mut destination = 0;
        for (tier, &ratio) in self.normalized.iter().enumerate().skip(1) {
            let size_tier = self.counters.total(tier) as f64;
            if size_tier * ratio < size_0 {
                destination = tier;
            }
        }
        destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ratios: &[f64]) -> (StaticRatioPolicy, Arc<SizeCounters>) {
        let counters = Arc::new(SizeCounters::new(ratios.len()));
        (StaticRatioPolicy::new(ratios, counters.clone()), counters)
    }

    #[test]
    fn test_empty_tiers_prefer_secondary() {
        // tier 1 is empty while tier 0 holds bytes, so tier 1 lags
        let (policy, counters) = policy(&[1.0, 1.0]);
        counters.increment(0, 1000);
        assert_eq!(policy.tier_for(), 1);
    }

    #[test]
    fn test_balanced_tiers_pick_primary() {
        let (policy, counters) = policy(&[1.0, 1.0]);
        counters.increment(0, 1000);
        counters.increment(1, 1000);
        assert_eq!(policy.tier_for(), 0);
    }

    #[test]
    fn test_ratio_weighting() {
        // tier 1 wants 4x the bytes of tier 0
        let (policy, counters) = policy(&[1.0, 4.0]);
        counters.increment(0, 1000);
        counters.increment(1, 3000);
        // 3000 * (1/4) = 750 < 1000, still lagging
        assert_eq!(policy.tier_for(), 1);
        counters.increment(1, 1500);
        // 4500 * (1/4) = 1125 >= 1000, caught up
        assert_eq!(policy.tier_for(), 0);
    }

    #[test]
    fn test_last_lagging_tier_wins() {
        let (policy, counters) = policy(&[1.0, 1.0, 1.0]);
        counters.increment(0, 1000);
        counters.increment(1, 200);
        counters.increment(2, 100);
        assert_eq!(policy.tier_for(), 2);
    }
}

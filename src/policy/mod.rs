//! Tier-selection policies.
//!
//! A policy answers one question on every allocation: which tier serves
//! this request. The three variants differ in what they consult:
//!
//! - [`static_ratio`]: accumulated per-tier sizes against fixed ratios.
//! - [`dynamic_threshold`]: request size against self-adjusting cut points.
//! - [`data_hotness`]: the allocation site's observed access frequency
//!   against the published hot threshold.
//!
//! Dispatch is a plain enum; every arm is lock-free on the request path.

pub(crate) mod data_hotness;
pub(crate) mod dynamic_threshold;
pub(crate) mod static_ratio;

pub use data_hotness::HotnessClass;

use data_hotness::DataHotnessPolicy;
use dynamic_threshold::DynamicThresholdPolicy;
use static_ratio::StaticRatioPolicy;

/// Policy selector for [`crate::TierBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Keep per-tier allocated sizes close to fixed ratios.
    StaticRatio,
    /// Partition requests by size with self-adjusting thresholds.
    DynamicThreshold,
    /// Route hot allocation sites to the fast tier.
    DataHotness,
}

/// A constructed policy bound to one memory object.
pub(crate) enum TierPolicy {
    /// Degenerate static-ratio setup with a single tier.
    SingleTier,
    StaticRatio(StaticRatioPolicy),
    DynamicThreshold(DynamicThresholdPolicy),
    DataHotness(DataHotnessPolicy),
}

impl TierPolicy {
    /// Pick the tier for a request of `size` bytes. The second element is
    /// the allocation-site fingerprint (0 for policies that do not use one);
    /// it is threaded back into [`TierPolicy::post_alloc`].
    pub fn tier_for(&self, size: usize) -> (usize, u64) {
        match self {
            TierPolicy::SingleTier => (0, 0),
            TierPolicy::StaticRatio(policy) => (policy.tier_for(), 0),
            TierPolicy::DynamicThreshold(policy) => (policy.tier_for(size), 0),
            TierPolicy::DataHotness(policy) => policy.tier_for(size),
        }
    }

    /// Notify the policy of a successful allocation.
    pub fn post_alloc(&self, fingerprint: u64, address: usize, size: usize) {
        if let TierPolicy::DataHotness(policy) = self {
            policy.post_alloc(fingerprint, address, size);
        }
    }

    /// Give the policy a chance to adjust its configuration.
    pub fn update_cfg(&self) {
        if let TierPolicy::DynamicThreshold(policy) = self {
            policy.update_cfg();
        }
    }
}

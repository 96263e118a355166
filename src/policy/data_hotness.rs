//! Data-hotness policy.
//!
//! Each request is fingerprinted from its call stack and size, classified
//! against the published hot threshold, and routed to the fast or the slow
//! tier. Sites the engine has not seen yet classify as unknown and go to
//! the fast tier: first-touch allocations start fast and are demoted once
//! the estimator has evidence.
//!
//! The path reads two shared structures (the fingerprint→frequency cache
//! and the threshold cell) and performs no locking and no allocation of its
//! own; the only write is the fire-and-forget event push after the backend
//! call succeeded.

use std::sync::Arc;

use dashmap::DashMap;

use crate::api::stats::EngineCounters;
use crate::core::events::{Event, EventKind, EventProducer};
use crate::core::fingerprint;
use crate::sync::atomics::AtomicF64;

/// Classification of an allocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotnessClass {
    /// Frequency at or above the hot threshold.
    Hot,
    /// Frequency below the hot threshold.
    Cold,
    /// Site not (yet) known to the engine; treated as hot for warm-up.
    Unknown,
}

pub(crate) struct DataHotnessPolicy {
    hot_tier: usize,
    cold_tier: usize,
    threshold: Arc<AtomicF64>,
    hotness_cache: Arc<DashMap<u64, f64>>,
    producer: EventProducer,
    counters: Arc<EngineCounters>,
    stack_depth: usize,
}

impl DataHotnessPolicy {
    pub fn new(
        hot_tier: usize,
        cold_tier: usize,
        threshold: Arc<AtomicF64>,
        hotness_cache: Arc<DashMap<u64, f64>>,
        producer: EventProducer,
        counters: Arc<EngineCounters>,
        stack_depth: usize,
    ) -> Self {
        Self {
            hot_tier,
            cold_tier,
            threshold,
            hotness_cache,
            producer,
            counters,
            stack_depth,
        }
    }

    /// Classify a known fingerprint.
    pub fn classify(&self, fingerprint: u64) -> HotnessClass {
        match self.hotness_cache.get(&fingerprint) {
            None => HotnessClass::Unknown,
            Some(frequency) => {
                if *frequency >= self.threshold.get() {
                    HotnessClass::Hot
                } else {
                    HotnessClass::Cold
                }
            }
        }
    }

    /// Fingerprint the call site and pick a tier.
    pub fn tier_for(&self, size: usize) -> (usize, u64) {
        let fingerprint = fingerprint::fingerprint(size, self.stack_depth);
        let tier = match self.classify(fingerprint) {
            HotnessClass::Cold => self.cold_tier,
            HotnessClass::Hot | HotnessClass::Unknown => self.hot_tier,
        };
        (tier, fingerprint)
    }

    /// Enqueue the region for the ranking worker. Never waits; a full queue
    /// drops the event and bumps the drop counter.
    pub fn post_alloc(&self, fingerprint: u64, address: usize, size: usize) {
        let accepted = self.producer.push(Event::CreateAdd {
            fingerprint,
            address,
            size,
        });
        self.counters.record_push(EventKind::CreateAdd, accepted);
    }
}

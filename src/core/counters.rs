//! Sharded per-tier allocation-size counters.
//!
//! Every allocation and free adjusts the counter of its tier. To keep the
//! fast path off a single contended cell, each tier's counter is split into
//! 256 shards selected by a hashed per-thread tag; a shard whose magnitude
//! exceeds the flush threshold transfers its delta to the tier's global
//! cell. Reading a total drains all shards first, so totals are exact at
//! the moment of the read.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::util::hash::splitmix64;

/// Number of shards per tier. Must be a power of two.
pub const THREAD_BUCKETS: usize = 256;

/// Shard magnitude that triggers a transfer to the global cell.
pub const FLUSH_THRESHOLD: i64 = 51_200;

static NEXT_THREAD_SEED: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TAG: u64 = splitmix64(NEXT_THREAD_SEED.fetch_add(1, Ordering::Relaxed));
}

#[inline]
fn shard_index() -> usize {
    THREAD_TAG.with(|tag| (*tag as usize) & (THREAD_BUCKETS - 1))
}

/// One tier's sharded byte counter.
struct TierSizeCounter {
    shards: Box<[AtomicI64]>,
    global: AtomicI64,
}

impl TierSizeCounter {
    fn new() -> Self {
        let shards = (0..THREAD_BUCKETS)
            .map(|_| AtomicI64::new(0))
            .collect::<Vec<_>>();
        Self {
            shards: shards.into_boxed_slice(),
            global: AtomicI64::new(0),
        }
    }

    fn increment(&self, size: usize) {
        let shard = &self.shards[shard_index()];
        if shard.fetch_add(size as i64, Ordering::Relaxed) + size as i64 > FLUSH_THRESHOLD {
            let delta = shard.swap(0, Ordering::Relaxed);
            self.global.fetch_add(delta, Ordering::Relaxed);
        }
    }

    fn decrement(&self, size: usize) {
        let shard = &self.shards[shard_index()];
        if shard.fetch_sub(size as i64, Ordering::Relaxed) - (size as i64) < -FLUSH_THRESHOLD {
            let delta = shard.swap(0, Ordering::Relaxed);
            self.global.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Drain every shard into the global cell and return the total.
    fn total(&self) -> usize {
        let mut drained = 0i64;
        for shard in self.shards.iter() {
            drained += shard.swap(0, Ordering::Relaxed);
        }
        let total = self.global.fetch_add(drained, Ordering::Relaxed) + drained;
        total.max(0) as usize
    }

    fn reset(&self) {
        for shard in self.shards.iter() {
            shard.store(0, Ordering::Relaxed);
        }
        self.global.store(0, Ordering::Relaxed);
    }
}

/// Allocation-size accounting for all tiers of one memory object.
pub struct SizeCounters {
    tiers: Vec<TierSizeCounter>,
}

impl SizeCounters {
    /// Counters for `tiers` tiers, all zero.
    pub fn new(tiers: usize) -> Self {
        Self {
            tiers: (0..tiers).map(|_| TierSizeCounter::new()).collect(),
        }
    }

    /// Account `size` allocated bytes to `tier`.
    pub fn increment(&self, tier: usize, size: usize) {
        if let Some(counter) = self.tiers.get(tier) {
            counter.increment(size);
        }
    }

    /// Account `size` freed bytes to `tier`.
    pub fn decrement(&self, tier: usize, size: usize) {
        if let Some(counter) = self.tiers.get(tier) {
            counter.decrement(size);
        }
    }

    /// Exact allocated bytes on `tier` at the moment of the call.
    pub fn total(&self, tier: usize) -> usize {
        self.tiers.get(tier).map_or(0, TierSizeCounter::total)
    }

    /// Zero all counters of `tier`.
    pub fn reset(&self, tier: usize) {
        if let Some(counter) = self.tiers.get(tier) {
            counter.reset();
        }
    }

    /// Number of tiers tracked.
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }
}

//! The tiered memory object.
//!
//! [`TieredMemory`] is the client surface: malloc-shaped entry points that
//! consult the policy, call into the chosen backend, keep the per-tier size
//! counters current, and hand lifecycle notifications to the engine. All
//! entry points are callable from any thread; none of them waits for the
//! ranking worker.

use std::sync::Arc;

use dashmap::DashMap;

use crate::api::stats::{EngineCounters, MemoryStats, TierStats};
use crate::backend::{BackendRef, TierGrade};
use crate::core::counters::SizeCounters;
use crate::core::events::{Event, EventProducer, TouchCallback};
use crate::core::worker::WorkerHandle;
use crate::error::TierError;
use crate::policy::{HotnessClass, TierPolicy};
use crate::sync::atomics::AtomicF64;

/// One configured tier.
pub(crate) struct TierConfig {
    pub backend: BackendRef,
    /// Normalized capacity ratio (policy-specific normalization).
    pub ratio: f64,
}

/// Shared state of a running data-hotness engine.
pub(crate) struct HotnessEngine {
    pub producer: EventProducer,
    pub worker: WorkerHandle,
    pub threshold: Arc<AtomicF64>,
    pub hotness_cache: Arc<DashMap<u64, f64>>,
    pub address_index: Arc<DashMap<usize, u64>>,
    pub counters: Arc<EngineCounters>,
}

/// A policy-driven multi-tier memory object.
///
/// Dropping it shuts the engine down: the event queue is drained, the
/// ranking worker joined. Regions handed out by [`TieredMemory::alloc`] and
/// friends must be returned through [`TieredMemory::dealloc`] (or a
/// realloc-to-zero) before the backends go away.
pub struct TieredMemory {
    tiers: Vec<TierConfig>,
    policy: TierPolicy,
    size_counters: Arc<SizeCounters>,
    engine: Option<HotnessEngine>,
}

impl TieredMemory {
    pub(crate) fn from_parts(
        tiers: Vec<TierConfig>,
        policy: TierPolicy,
        size_counters: Arc<SizeCounters>,
        engine: Option<HotnessEngine>,
    ) -> Self {
        Self {
            tiers,
            policy,
            size_counters,
            engine,
        }
    }

    /// Allocate `size` bytes on the tier the policy picks. Null on backend
    /// failure.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        let (tier, fingerprint) = self.policy.tier_for(size);
        let backend = &self.tiers[tier].backend;
        let ptr = backend.alloc(size);
        if !ptr.is_null() {
            self.size_counters
                .increment(tier, backend.usable_size(ptr));
            self.policy.post_alloc(fingerprint, ptr as usize, size);
        }
        self.policy.update_cfg();
        ptr
    }

    /// Allocate `count * size` zeroed bytes. Null on failure or overflow.
    pub fn alloc_zeroed(&self, count: usize, size: usize) -> *mut u8 {
        let (tier, fingerprint) = self.policy.tier_for(count.saturating_mul(size));
        let backend = &self.tiers[tier].backend;
        let ptr = backend.alloc_zeroed(count, size);
        if !ptr.is_null() {
            self.size_counters
                .increment(tier, backend.usable_size(ptr));
            self.policy
                .post_alloc(fingerprint, ptr as usize, count.saturating_mul(size));
        }
        self.policy.update_cfg();
        ptr
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// `align` must be a power of two no smaller than a pointer. The
    /// returned pointer is null on backend failure, mirroring
    /// `posix_memalign`'s out-parameter convention.
    pub fn alloc_aligned(&self, align: usize, size: usize) -> Result<*mut u8, TierError> {
        if !align.is_power_of_two() || align < std::mem::size_of::<*const u8>() {
            return Err(TierError::InvalidAlignment(align));
        }
        let (tier, fingerprint) = self.policy.tier_for(size);
        let backend = &self.tiers[tier].backend;
        let ptr = backend.alloc_aligned(align, size);
        if !ptr.is_null() {
            self.size_counters
                .increment(tier, backend.usable_size(ptr));
            self.policy.post_alloc(fingerprint, ptr as usize, size);
        }
        self.policy.update_cfg();
        Ok(ptr)
    }

    /// Resize an allocation in place on its current tier.
    ///
    /// A null `ptr` allocates; `size == 0` frees and returns null. On
    /// backend failure the old allocation stays valid and null is returned.
    ///
    /// # Safety
    /// `ptr` must be null or a live allocation of this memory object.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc(size);
        }
        let Some(tier) = self.detect_tier(ptr) else {
            log::error!("realloc of pointer not owned by any tier");
            return std::ptr::null_mut();
        };
        let backend = &self.tiers[tier].backend;
        if size == 0 {
            self.push_event(Event::DestroyRemove {
                address: ptr as usize,
            });
            self.size_counters
                .decrement(tier, backend.usable_size(ptr));
            backend.dealloc(ptr);
            self.policy.update_cfg();
            return std::ptr::null_mut();
        }
        let old_usable = backend.usable_size(ptr);
        let new_ptr = backend.realloc(ptr, size);
        if new_ptr.is_null() {
            // old allocation still live, nothing changed
            self.policy.update_cfg();
            return std::ptr::null_mut();
        }
        self.push_event(Event::Realloc {
            old_address: ptr as usize,
            new_address: new_ptr as usize,
            size,
        });
        self.size_counters.decrement(tier, old_usable);
        self.size_counters
            .increment(tier, backend.usable_size(new_ptr));
        self.policy.update_cfg();
        new_ptr
    }

    /// Return an allocation to its backend.
    ///
    /// # Safety
    /// `ptr` must be null or a live allocation of this memory object.
    pub unsafe fn dealloc(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let Some(tier) = self.detect_tier(ptr) else {
            log::error!("free of pointer not owned by any tier");
            return;
        };
        let backend = &self.tiers[tier].backend;
        self.push_event(Event::DestroyRemove {
            address: ptr as usize,
        });
        self.size_counters
            .decrement(tier, backend.usable_size(ptr));
        backend.dealloc(ptr);
    }

    /// Usable size of an allocation; 0 for unknown pointers.
    pub fn usable_size(&self, ptr: *const u8) -> usize {
        self.detect_tier(ptr)
            .map_or(0, |tier| self.tiers[tier].backend.usable_size(ptr))
    }

    /// Index of the tier owning `ptr`.
    pub fn detect_tier(&self, ptr: *const u8) -> Option<usize> {
        if ptr.is_null() {
            return None;
        }
        self.tiers
            .iter()
            .position(|tier| tier.backend.owns(ptr))
    }

    /// Grade of the tier owning `ptr`.
    pub fn detect_grade(&self, ptr: *const u8) -> Option<TierGrade> {
        self.detect_tier(ptr)
            .map(|tier| self.tiers[tier].backend.grade())
    }

    /// Number of configured tiers.
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Grade of tier `index`.
    pub fn tier_grade(&self, index: usize) -> Option<TierGrade> {
        self.tiers.get(index).map(|tier| tier.backend.grade())
    }

    /// Bytes currently accounted to tier `index`.
    pub fn allocated_size(&self, index: usize) -> usize {
        self.size_counters.total(index)
    }

    /// Feed a sampled access to the engine. Entry point for the hardware
    /// sampler thread; `timestamp` is monotonic nanoseconds. A no-op for
    /// policies without an engine.
    pub fn record_access(&self, address: usize, timestamp: u64) {
        self.push_event(Event::Touch { address, timestamp });
    }

    /// Attach a diagnostic callback to the group owning `address`. The
    /// callback runs on the ranking worker for every observed touch.
    pub fn set_touch_callback(&self, address: usize, callback: TouchCallback) {
        self.push_event(Event::SetTouchCallback { address, callback });
    }

    /// Published hot threshold, if a hotness engine is running.
    pub fn hot_threshold(&self) -> Option<f64> {
        self.engine.as_ref().map(|engine| engine.threshold.get())
    }

    /// Latest smoothed frequency of an allocation site.
    pub fn fingerprint_hotness(&self, fingerprint: u64) -> Option<f64> {
        let engine = self.engine.as_ref()?;
        engine
            .hotness_cache
            .get(&fingerprint)
            .map(|frequency| *frequency)
    }

    /// Latest smoothed frequency of the group owning `address`, as far as
    /// the engine has caught up with the event stream.
    pub fn address_hotness(&self, address: usize) -> Option<f64> {
        let engine = self.engine.as_ref()?;
        let fingerprint = *engine.address_index.get(&address)?;
        engine
            .hotness_cache
            .get(&fingerprint)
            .map(|frequency| *frequency)
    }

    /// Classification of the group owning `address` under the current
    /// threshold. Unknown for policies without an engine and for addresses
    /// the engine has not (yet) registered.
    pub fn address_hotness_class(&self, address: usize) -> HotnessClass {
        let Some(engine) = &self.engine else {
            return HotnessClass::Unknown;
        };
        let Some(fingerprint) = engine.address_index.get(&address).map(|entry| *entry) else {
            return HotnessClass::Unknown;
        };
        match engine.hotness_cache.get(&fingerprint) {
            None => HotnessClass::Unknown,
            Some(frequency) => {
                if *frequency >= engine.threshold.get() {
                    HotnessClass::Hot
                } else {
                    HotnessClass::Cold
                }
            }
        }
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            tiers: self
                .tiers
                .iter()
                .enumerate()
                .map(|(index, tier)| TierStats {
                    name: tier.backend.name().to_string(),
                    grade: tier.backend.grade(),
                    ratio: tier.ratio,
                    allocated_bytes: self.size_counters.total(index),
                })
                .collect(),
            hot_threshold: self.hot_threshold(),
            events: self
                .engine
                .as_ref()
                .map(|engine| engine.counters.snapshot()),
        }
    }

    fn push_event(&self, event: Event) {
        if let Some(engine) = &self.engine {
            let kind = event.kind();
            let accepted = engine.producer.push(event);
            engine.counters.record_push(kind, accepted);
        }
    }
}

impl Drop for TieredMemory {
    fn drop(&mut self) {
        log::debug!("deleting tiered memory: {}", self.stats().to_json());
        if let Some(engine) = self.engine.as_mut() {
            engine.worker.shutdown();
        }
    }
}

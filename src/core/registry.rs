//! Allocation group registry.
//!
//! Owned exclusively by the ranking worker; no operation here takes a lock.
//! Two indices are maintained: fingerprint → group (groups are long-lived)
//! and starting address → region (ordered, so a sampled address anywhere
//! inside a region resolves through a predecessor lookup). Groups live in a
//! dense arena and regions refer to them by index, which keeps the
//! region ↔ group ↔ ranking references cycle-free.
//!
//! Every mutation keeps the ranking's aggregate in step: a group's bytes sit
//! in the bucket of its current frequency, and move buckets when a window
//! close changes the frequency.
//!
//! The registry also mirrors two read-side caches for the allocation fast
//! path and diagnostics: fingerprint → frequency and address → fingerprint.
//! Only the worker writes them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;

use crate::core::events::TouchCallback;
use crate::core::hotness::{HotnessParams, HotnessState, WindowPhase};
use crate::core::ranking::Ranking;

/// A live allocation, keyed by starting address.
#[derive(Debug, Clone, Copy)]
struct Region {
    start: usize,
    size: usize,
    group: usize,
}

/// All regions sharing one allocation-site fingerprint.
struct Group {
    fingerprint: u64,
    total_size: usize,
    hotness: HotnessState,
    touch_callback: Option<TouchCallback>,
}

impl Group {
    fn new(fingerprint: u64) -> Self {
        Self {
            fingerprint,
            total_size: 0,
            hotness: HotnessState::new(),
            touch_callback: None,
        }
    }
}

/// Fingerprint-keyed group table plus the address index.
pub struct TypeRegistry {
    groups: Vec<Option<Group>>,
    free_slots: Vec<usize>,
    by_fingerprint: HashMap<u64, usize>,
    regions: BTreeMap<usize, Region>,
    ranking: Ranking,
    params: HotnessParams,
    malloc_touch_weight: f64,
    hotness_cache: Arc<DashMap<u64, f64>>,
    address_index: Arc<DashMap<usize, u64>>,
}

impl TypeRegistry {
    /// Create a registry feeding `ranking` and mirroring into the shared
    /// read-side caches.
    pub fn new(
        ranking: Ranking,
        params: HotnessParams,
        malloc_touch_weight: f64,
        hotness_cache: Arc<DashMap<u64, f64>>,
        address_index: Arc<DashMap<usize, u64>>,
    ) -> Self {
        Self {
            groups: Vec::new(),
            free_slots: Vec::new(),
            by_fingerprint: HashMap::new(),
            regions: BTreeMap::new(),
            ranking,
            params,
            malloc_touch_weight,
            hotness_cache,
            address_index,
        }
    }

    /// The ranking owned by this registry.
    pub fn ranking(&self) -> &Ranking {
        &self.ranking
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.by_fingerprint.len()
    }

    /// Number of live regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Register a new region at `address`.
    pub fn on_create(&mut self, fingerprint: u64, address: usize, size: usize) {
        if address == 0 {
            return;
        }
        // A colliding start address means the destroy notification for the
        // previous occupant was dropped; unmap it before mapping the new one.
        if self.regions.contains_key(&address) {
            log::debug!("registry: recreate at live address {:#x}", address);
            self.on_destroy(address);
        }
        let index = self.group_index(fingerprint);
        if let Some(group) = self.groups[index].as_mut() {
            self.ranking.add(group.hotness.frequency(), size);
            group.total_size += size;
            // Allocation counts as a touch with no timestamp: it feeds the
            // open window without advancing the window machinery.
            Self::touch_group(group, 0, self.malloc_touch_weight, &self.params);
        }
        self.regions.insert(
            address,
            Region {
                start: address,
                size,
                group: index,
            },
        );
        self.address_index.insert(address, fingerprint);
    }

    /// Unregister the region starting at `address`. Unknown addresses are
    /// ignored: the destroy may refer to a create that never made it through
    /// the queue.
    pub fn on_destroy(&mut self, address: usize) {
        let Some(region) = self.regions.remove(&address) else {
            return;
        };
        self.address_index.remove(&address);
        let Some(group) = self.groups[region.group].as_mut() else {
            return;
        };
        self.ranking.remove(group.hotness.frequency(), region.size);
        group.total_size = group.total_size.saturating_sub(region.size);
        if group.total_size == 0 {
            let fingerprint = group.fingerprint;
            self.by_fingerprint.remove(&fingerprint);
            self.hotness_cache.remove(&fingerprint);
            self.groups[region.group] = None;
            self.free_slots.push(region.group);
        }
    }

    /// Move a region from `old_address` to `new_address` with a new size,
    /// staying in the same group.
    pub fn on_realloc(&mut self, old_address: usize, new_address: usize, size: usize) {
        let Some(region) = self.regions.remove(&old_address) else {
            return;
        };
        self.address_index.remove(&old_address);
        let Some(group) = self.groups[region.group].as_mut() else {
            return;
        };
        let frequency = group.hotness.frequency();
        self.ranking.remove(frequency, region.size);
        group.total_size = group.total_size.saturating_sub(region.size);
        self.ranking.add(frequency, size);
        group.total_size += size;
        // A realloc is a destroy plus a create of the same group, so the new
        // region gets the same allocation-time touch a create would.
        Self::touch_group(group, 0, self.malloc_touch_weight, &self.params);
        let fingerprint = group.fingerprint;
        if new_address != 0 {
            if new_address != old_address && self.regions.contains_key(&new_address) {
                self.on_destroy(new_address);
            }
            self.regions.insert(
                new_address,
                Region {
                    start: new_address,
                    size,
                    group: region.group,
                },
            );
            self.address_index.insert(new_address, fingerprint);
        }
    }

    /// Record a sampled access at `address`. Addresses that resolve to no
    /// live region are silently ignored.
    pub fn on_touch(&mut self, address: usize, timestamp: u64) {
        let Some(region) = self.region_containing(address) else {
            return;
        };
        let Some(group) = self.groups[region.group].as_mut() else {
            return;
        };
        // Move the group's bytes out of its current bucket, update the
        // estimator, then put back exactly what was taken.
        let removed = self
            .ranking
            .remove_up_to(group.hotness.frequency(), group.total_size);
        let changed = Self::touch_group(group, timestamp, 1.0, &self.params);
        self.ranking.add(group.hotness.frequency(), removed);
        if changed {
            self.hotness_cache
                .insert(group.fingerprint, group.hotness.frequency());
        }
    }

    /// Attach a diagnostic callback to the group owning `address`.
    pub fn on_set_touch_callback(&mut self, address: usize, callback: TouchCallback) {
        let Some(region) = self.region_containing(address) else {
            return;
        };
        if let Some(group) = self.groups[region.group].as_mut() {
            group.touch_callback = Some(callback);
        }
    }

    /// Frequency of the group with `fingerprint`, if it is live.
    pub fn frequency_of(&self, fingerprint: u64) -> Option<f64> {
        let index = *self.by_fingerprint.get(&fingerprint)?;
        self.groups[index]
            .as_ref()
            .map(|group| group.hotness.frequency())
    }

    /// Warm-up phase of the group with `fingerprint`, if it is live.
    pub fn phase_of(&self, fingerprint: u64) -> Option<WindowPhase> {
        let index = *self.by_fingerprint.get(&fingerprint)?;
        self.groups[index].as_ref().map(|group| group.hotness.phase())
    }

    fn region_containing(&self, address: usize) -> Option<Region> {
        let (_, region) = self.regions.range(..=address).next_back()?;
        if address < region.start + region.size {
            Some(*region)
        } else {
            None
        }
    }

    fn group_index(&mut self, fingerprint: u64) -> usize {
        if let Some(&index) = self.by_fingerprint.get(&fingerprint) {
            return index;
        }
        let group = Group::new(fingerprint);
        let index = match self.free_slots.pop() {
            Some(slot) => {
                self.groups[slot] = Some(group);
                slot
            }
            None => {
                self.groups.push(Some(group));
                self.groups.len() - 1
            }
        };
        self.by_fingerprint.insert(fingerprint, index);
        self.hotness_cache.insert(fingerprint, 0.0);
        index
    }

    fn touch_group(
        group: &mut Group,
        timestamp: u64,
        weight: f64,
        params: &HotnessParams,
    ) -> bool {
        if let Some(callback) = group.touch_callback.as_mut() {
            callback();
        }
        group.hotness.touch(timestamp, weight, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::atomics::AtomicF64;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> TypeRegistry {
        registry_with_caches().0
    }

    fn registry_with_caches() -> (
        TypeRegistry,
        Arc<DashMap<u64, f64>>,
        Arc<DashMap<usize, u64>>,
    ) {
        let hotness_cache = Arc::new(DashMap::new());
        let address_index = Arc::new(DashMap::new());
        let ranking = Ranking::new(Arc::new(AtomicF64::new(0.0)));
        let params = HotnessParams {
            window: 1000,
            old_weight: 0.9,
        };
        let registry = TypeRegistry::new(
            ranking,
            params,
            20.0,
            hotness_cache.clone(),
            address_index.clone(),
        );
        (registry, hotness_cache, address_index)
    }

    #[test]
    fn test_create_destroy_lifecycle() {
        let mut r = registry();
        r.on_create(0xf00d, 0x1000, 256);
        assert_eq!(r.group_count(), 1);
        assert_eq!(r.region_count(), 1);
        assert_eq!(r.ranking().total_size(), 256);

        r.on_create(0xf00d, 0x2000, 128);
        assert_eq!(r.group_count(), 1);
        assert_eq!(r.region_count(), 2);
        assert_eq!(r.ranking().total_size(), 384);

        r.on_destroy(0x1000);
        assert_eq!(r.group_count(), 1);
        assert_eq!(r.ranking().total_size(), 128);

        // group disappears when its last region does
        r.on_destroy(0x2000);
        assert_eq!(r.group_count(), 0);
        assert_eq!(r.region_count(), 0);
        assert_eq!(r.ranking().total_size(), 0);
    }

    #[test]
    fn test_destroy_unknown_address_ignored() {
        let mut r = registry();
        r.on_create(1, 0x1000, 64);
        r.on_destroy(0x9999);
        assert_eq!(r.region_count(), 1);
        assert_eq!(r.ranking().total_size(), 64);
    }

    #[test]
    fn test_touch_unknown_address_ignored() {
        let mut r = registry();
        r.on_create(1, 0x1000, 64);
        r.on_touch(0x0500, 123);
        r.on_touch(0x1040, 123); // one past the end
        assert_eq!(r.ranking().total_size(), 64);
    }

    #[test]
    fn test_touch_interior_address_resolves() {
        let mut r = registry();
        r.on_create(7, 0x1000, 0x100);
        r.on_touch(0x10ff, 50);
        assert_eq!(r.phase_of(7), Some(WindowPhase::Init));
    }

    #[test]
    fn test_realloc_moves_region() {
        let mut r = registry();
        r.on_create(7, 0x1000, 100);
        r.on_realloc(0x1000, 0x3000, 300);
        assert_eq!(r.region_count(), 1);
        assert_eq!(r.group_count(), 1);
        assert_eq!(r.ranking().total_size(), 300);

        // old address no longer resolves, new one does
        r.on_touch(0x1000, 10);
        assert_eq!(r.phase_of(7), Some(WindowPhase::Unset));
        r.on_touch(0x3010, 10);
        assert_eq!(r.phase_of(7), Some(WindowPhase::Init));
    }

    #[test]
    fn test_realloc_unknown_old_address_ignored() {
        let mut r = registry();
        r.on_realloc(0x4000, 0x5000, 100);
        assert_eq!(r.region_count(), 0);
        assert_eq!(r.ranking().total_size(), 0);
    }

    #[test]
    fn test_frequency_change_rebuckets_ranking() {
        let mut r = registry();
        r.on_create(1, 0x1000, 500);
        // drive the estimator through warm-up and one window close
        r.on_touch(0x1000, 1);
        r.on_touch(0x1000, 1002);
        r.on_touch(0x1000, 2003);
        let f = r.frequency_of(1).unwrap();
        assert!(f > 0.0);
        // the group's bytes must all sit in the new bucket
        assert_eq!(r.ranking().total_size(), 500);
        assert_eq!(r.ranking().len(), 1);
        let threshold = r.ranking().threshold_by_total_fraction(0.0);
        assert!((threshold - crate::core::ranking::dequantify(
            crate::core::ranking::quantify(f),
        ))
        .abs()
            < 1e-9);
    }

    #[test]
    fn test_hotness_cache_mirrors_frequency() {
        let (mut r, cache, _) = registry_with_caches();
        r.on_create(42, 0x1000, 100);
        assert_eq!(cache.get(&42).map(|v| *v), Some(0.0));

        r.on_touch(0x1000, 1);
        r.on_touch(0x1000, 1002);
        r.on_touch(0x1000, 2003);
        let cached = cache.get(&42).map(|v| *v).unwrap();
        assert_eq!(cached, r.frequency_of(42).unwrap());
        assert!(cached > 0.0);

        r.on_destroy(0x1000);
        assert!(cache.get(&42).is_none());
    }

    #[test]
    fn test_address_index_mirrors_regions() {
        let (mut r, _, index) = registry_with_caches();
        r.on_create(9, 0x1000, 64);
        assert_eq!(index.get(&0x1000).map(|v| *v), Some(9));
        r.on_realloc(0x1000, 0x2000, 64);
        assert!(index.get(&0x1000).is_none());
        assert_eq!(index.get(&0x2000).map(|v| *v), Some(9));
        r.on_destroy(0x2000);
        assert!(index.get(&0x2000).is_none());
    }

    #[test]
    fn test_touch_callback_invoked() {
        let mut r = registry();
        r.on_create(5, 0x1000, 64);
        let count = Arc::new(AtomicUsize::new(0));
        let probe = count.clone();
        r.on_set_touch_callback(
            0x1000,
            Box::new(move || {
                probe.fetch_add(1, Ordering::SeqCst);
            }),
        );
        r.on_touch(0x1000, 100);
        r.on_touch(0x1010, 200);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        // allocation-time touches fire it too
        r.on_create(5, 0x2000, 64);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        // realloc is a destroy plus a create, so it carries the same touch
        r.on_realloc(0x2000, 0x3000, 64);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_create_over_live_address_replaces() {
        let mut r = registry();
        r.on_create(1, 0x1000, 100);
        r.on_create(2, 0x1000, 200);
        assert_eq!(r.region_count(), 1);
        assert_eq!(r.group_count(), 1);
        assert_eq!(r.ranking().total_size(), 200);
        assert!(r.frequency_of(1).is_none());
        assert!(r.frequency_of(2).is_some());
    }

    #[test]
    fn test_group_slot_reuse() {
        let mut r = registry();
        r.on_create(1, 0x1000, 10);
        r.on_destroy(0x1000);
        r.on_create(2, 0x2000, 20);
        assert_eq!(r.group_count(), 1);
        assert_eq!(r.ranking().total_size(), 20);
    }
}

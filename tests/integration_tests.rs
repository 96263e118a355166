//! Integration tests for tieralloc.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tieralloc::{
    EngineConfig, HeapBackend, HotnessClass, PolicyKind, TierBuilder, TierGrade, TieredMemory,
};

const BUF_SIZE: usize = 4096;

fn data_hotness_memory() -> TieredMemory {
    let mut builder = TierBuilder::new(PolicyKind::DataHotness).with_engine_config(
        EngineConfig::default()
            .with_window(1000)
            .with_queue_capacity(1 << 15)
            .with_refresh(16, Duration::from_millis(5))
            .with_idle_sleep(Duration::from_micros(50)),
    );
    builder.add_tier(Arc::new(HeapBackend::fast("dram")), 1).unwrap();
    builder.add_tier(Arc::new(HeapBackend::slow("pmem")), 1).unwrap();
    builder.construct().unwrap()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

// Two allocation helpers with distinct call stacks, so the engine sees two
// allocation sites. The bodies differ on purpose; identical functions could
// be folded together by the linker.
#[inline(never)]
fn alloc_site_a(memory: &TieredMemory, size: usize) -> *mut u8 {
    memory.alloc(size)
}

#[inline(never)]
fn alloc_site_b(memory: &TieredMemory, size: usize) -> *mut u8 {
    let size = std::hint::black_box(size);
    memory.alloc(size)
}

#[test]
fn test_hotness_ordering_and_tier_routing() {
    let memory = data_hotness_memory();

    let mut a_ptr: *mut u8 = std::ptr::null_mut();
    let mut b_ptr: *mut u8 = std::ptr::null_mut();

    // The loop keeps every allocation at the same call site across rounds,
    // so each helper maps to one stable fingerprint.
    for round in 0..2 {
        let new_a = alloc_site_a(&memory, BUF_SIZE);
        let new_b = alloc_site_b(&memory, BUF_SIZE);
        assert!(!new_a.is_null() && !new_b.is_null());
        unsafe {
            memory.dealloc(a_ptr);
            memory.dealloc(b_ptr);
        }
        a_ptr = new_a;
        b_ptr = new_b;

        match round {
            0 => {
                // nothing is known yet: both sites land on the fast tier
                assert_eq!(memory.detect_grade(a_ptr), Some(TierGrade::Fast));
                assert_eq!(memory.detect_grade(b_ptr), Some(TierGrade::Fast));

                // site A is touched at twice site B's rate across ~400
                // estimator windows
                for step in 0..4000u64 {
                    let timestamp = 1 + step * 100;
                    memory.record_access(a_ptr as usize + 8, timestamp);
                    if step % 2 == 0 {
                        memory.record_access(b_ptr as usize + 8, timestamp);
                    }
                }

                wait_until("event stream drained", || {
                    let events = memory.stats().events.unwrap();
                    events.processed >= events.total_pushed()
                });
                wait_until("hotness of both buffers", || {
                    memory.address_hotness(a_ptr as usize).unwrap_or(0.0) > 0.0
                        && memory.address_hotness(b_ptr as usize).unwrap_or(0.0) > 0.0
                });
                let hotness_a = memory.address_hotness(a_ptr as usize).unwrap();
                let hotness_b = memory.address_hotness(b_ptr as usize).unwrap();
                assert!(hotness_a > hotness_b);
                let ratio = hotness_a / hotness_b;
                assert!(
                    (ratio - 2.0).abs() < 0.6,
                    "hotness ratio {} too far from 2",
                    ratio
                );

                // with equal sizes and a 1:1 split, the threshold settles on
                // the hotter bucket: A stays hot, B goes cold
                wait_until("threshold between the two frequencies", || {
                    let threshold = memory.hot_threshold().unwrap();
                    threshold > hotness_b && threshold <= hotness_a
                });
                assert_eq!(
                    memory.address_hotness_class(a_ptr as usize),
                    HotnessClass::Hot
                );
                assert_eq!(
                    memory.address_hotness_class(b_ptr as usize),
                    HotnessClass::Cold
                );
            }
            _ => {
                // reallocation round: classification is now known
                assert_eq!(memory.detect_grade(a_ptr), Some(TierGrade::Fast));
                assert_eq!(memory.detect_grade(b_ptr), Some(TierGrade::Slow));
            }
        }
    }

    unsafe {
        memory.dealloc(a_ptr);
        memory.dealloc(b_ptr);
    }
}

#[test]
fn test_warmup_unknown_is_hot_then_cold_site_demoted() {
    let memory = data_hotness_memory();
    let mut hot_ptr: *mut u8 = std::ptr::null_mut();
    let mut cold_ptrs = Vec::new();

    // both rounds allocate the idle buffer from the same call site
    for round in 0..2 {
        let ptr = alloc_site_b(&memory, 512);
        assert!(!ptr.is_null());
        cold_ptrs.push(ptr);

        if round == 0 {
            // a fresh, never-seen site goes fast
            assert_eq!(memory.detect_grade(ptr), Some(TierGrade::Fast));

            // a second site becomes hot and pushes the threshold above zero
            hot_ptr = alloc_site_a(&memory, 4 * BUF_SIZE);
            for step in 0..4000u64 {
                memory.record_access(hot_ptr as usize, 1 + step * 100);
            }
            wait_until("non-zero threshold", || {
                memory.hot_threshold().unwrap_or(0.0) > 0.0
            });
            // the idle site's group is known with frequency 0, now below
            // the threshold
            wait_until("idle group registered", || {
                memory.address_hotness(ptr as usize).is_some()
            });
        } else {
            // next allocation from the idle site is demoted
            assert_eq!(memory.detect_grade(ptr), Some(TierGrade::Slow));
        }
    }

    for ptr in cold_ptrs {
        unsafe { memory.dealloc(ptr) };
    }
    unsafe { memory.dealloc(hot_ptr) };
}

#[test]
fn test_touch_callback_fires_on_worker() {
    let memory = data_hotness_memory();
    let ptr = memory.alloc(1024);
    assert!(!ptr.is_null());

    let touches = Arc::new(AtomicUsize::new(0));
    let probe = touches.clone();
    memory.set_touch_callback(
        ptr as usize,
        Box::new(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        }),
    );

    for i in 0..10 {
        memory.record_access(ptr as usize + i, 1000 + i as u64);
    }
    wait_until("touch callback invocations", || {
        touches.load(Ordering::SeqCst) >= 10
    });

    unsafe { memory.dealloc(ptr) };
}

#[test]
fn test_realloc_keeps_tier_and_accounting() {
    let memory = data_hotness_memory();
    let ptr = memory.alloc(1000);
    assert!(!ptr.is_null());
    let tier = memory.detect_tier(ptr).unwrap();
    assert_eq!(memory.usable_size(ptr), 1000);

    let grown = unsafe { memory.realloc(ptr, 8000) };
    assert!(!grown.is_null());
    assert_eq!(memory.detect_tier(grown), Some(tier));
    assert_eq!(memory.usable_size(grown), 8000);
    assert_eq!(memory.allocated_size(tier), 8000);

    // realloc to zero frees
    let gone = unsafe { memory.realloc(grown, 0) };
    assert!(gone.is_null());
    assert_eq!(memory.allocated_size(tier), 0);
    assert_eq!(memory.usable_size(grown), 0);
}

#[test]
fn test_realloc_null_allocates() {
    let memory = data_hotness_memory();
    let ptr = unsafe { memory.realloc(std::ptr::null_mut(), 256) };
    assert!(!ptr.is_null());
    unsafe { memory.dealloc(ptr) };
}

#[test]
fn test_alloc_zeroed_and_aligned() {
    let memory = data_hotness_memory();

    let zeroed = memory.alloc_zeroed(64, 16);
    assert!(!zeroed.is_null());
    let bytes = unsafe { std::slice::from_raw_parts(zeroed, 1024) };
    assert!(bytes.iter().all(|&b| b == 0));

    let aligned = memory.alloc_aligned(4096, 100).unwrap();
    assert!(!aligned.is_null());
    assert_eq!(aligned as usize % 4096, 0);

    assert!(matches!(
        memory.alloc_aligned(3, 100),
        Err(tieralloc::TierError::InvalidAlignment(3))
    ));

    unsafe {
        memory.dealloc(zeroed);
        memory.dealloc(aligned);
    }
}

#[test]
fn test_static_ratio_distribution() {
    let fast = Arc::new(HeapBackend::fast("dram"));
    let slow = Arc::new(HeapBackend::slow("pmem"));
    let mut builder = TierBuilder::new(PolicyKind::StaticRatio);
    builder.add_tier(fast.clone(), 1).unwrap();
    builder.add_tier(slow.clone(), 3).unwrap();
    let memory = builder.construct().unwrap();

    let mut ptrs = Vec::new();
    for _ in 0..400 {
        let ptr = memory.alloc(1024);
        assert!(!ptr.is_null());
        ptrs.push(ptr);
    }

    let fast_bytes = memory.allocated_size(0) as f64;
    let slow_bytes = memory.allocated_size(1) as f64;
    let ratio = slow_bytes / fast_bytes;
    assert!(
        (ratio - 3.0).abs() < 0.5,
        "slow/fast byte ratio {} too far from 3",
        ratio
    );

    for ptr in ptrs {
        unsafe { memory.dealloc(ptr) };
    }
    assert_eq!(memory.allocated_size(0), 0);
    assert_eq!(memory.allocated_size(1), 0);
}

#[test]
fn test_dynamic_threshold_partitions_by_size() {
    let mut builder = TierBuilder::new(PolicyKind::DynamicThreshold);
    builder.add_tier(Arc::new(HeapBackend::fast("dram")), 1).unwrap();
    builder.add_tier(Arc::new(HeapBackend::slow("pmem")), 1).unwrap();
    // pin the threshold band so the cut point cannot move during the test
    builder
        .ctl_set("policy.dynamic_threshold.thresholds[0].min", "1024")
        .unwrap();
    builder
        .ctl_set("policy.dynamic_threshold.thresholds[0].max", "1024")
        .unwrap();
    let memory = builder.construct().unwrap();

    let small = memory.alloc(100);
    let large = memory.alloc(100_000);
    assert_eq!(memory.detect_tier(small), Some(0));
    assert_eq!(memory.detect_tier(large), Some(1));

    unsafe {
        memory.dealloc(small);
        memory.dealloc(large);
    }
}

#[test]
fn test_stats_snapshot() {
    let memory = data_hotness_memory();
    let ptr = memory.alloc(2048);
    memory.record_access(ptr as usize, 1000);

    wait_until("events processed", || {
        memory.stats().events.map_or(0, |e| e.processed) >= 2
    });

    let stats = memory.stats();
    assert_eq!(stats.tiers.len(), 2);
    assert_eq!(stats.tiers[0].grade, TierGrade::Fast);
    assert!(stats.hot_threshold.is_some());
    let events = stats.events.unwrap();
    assert_eq!(events.create.pushed, 1);
    assert_eq!(events.touch.pushed, 1);
    assert_eq!(events.total_dropped(), 0);

    let json = stats.to_json();
    assert!(json.contains("\"tiers\":["));
    assert!(json.contains("\"events\":{"));

    unsafe { memory.dealloc(ptr) };
}

#[test]
fn test_allocated_size_tracks_usable_bytes() {
    let memory = data_hotness_memory();
    let a = memory.alloc(1000);
    let b = memory.alloc(3000);
    let tier_a = memory.detect_tier(a).unwrap();
    let tier_b = memory.detect_tier(b).unwrap();
    let mut expected = vec![0usize; 2];
    expected[tier_a] += 1000;
    expected[tier_b] += 3000;
    assert_eq!(memory.allocated_size(0), expected[0]);
    assert_eq!(memory.allocated_size(1), expected[1]);
    unsafe {
        memory.dealloc(a);
        memory.dealloc(b);
    }
    assert_eq!(memory.allocated_size(0), 0);
    assert_eq!(memory.allocated_size(1), 0);
}

#[test]
fn test_shutdown_drains_event_queue() {
    let memory = data_hotness_memory();
    let mut ptrs = Vec::new();
    for _ in 0..200 {
        ptrs.push(memory.alloc(64));
    }
    for &ptr in &ptrs {
        unsafe { memory.dealloc(ptr) };
    }
    // drop waits for the worker to consume everything that was queued
    drop(memory);
}

#[test]
fn test_concurrent_allocation_across_threads() {
    let memory = Arc::new(data_hotness_memory());
    let mut handles = Vec::new();
    for _ in 0..4 {
        let memory = memory.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                let ptr = memory.alloc(256);
                assert!(!ptr.is_null());
                memory.record_access(ptr as usize, 1);
                unsafe { memory.dealloc(ptr) };
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(memory.allocated_size(0) + memory.allocated_size(1), 0);
}

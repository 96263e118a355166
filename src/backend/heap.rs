//! Process-heap reference backend.
//!
//! Serves allocations from the global allocator and keeps a layout table so
//! it can answer `usable_size`, `owns` and `realloc`. Two instances with
//! different grades are enough to exercise every policy; real deployments
//! substitute NUMA- or device-backed implementations of [`TierBackend`].

use std::alloc::{self, Layout};
use std::collections::HashMap;

use crate::backend::{TierBackend, TierGrade};
use crate::sync::atomics::AtomicGauge;
use crate::sync::mutex::Mutex;

const MIN_ALIGN: usize = 16;

/// Heap-backed tier.
pub struct HeapBackend {
    grade: TierGrade,
    name: String,
    layouts: Mutex<HashMap<usize, Layout>>,
    allocated: AtomicGauge,
}

impl HeapBackend {
    /// Create a backend with the given grade and name.
    pub fn new(grade: TierGrade, name: impl Into<String>) -> Self {
        Self {
            grade,
            name: name.into(),
            layouts: Mutex::new(HashMap::new()),
            allocated: AtomicGauge::new(0),
        }
    }

    /// Convenience constructor for a fast (DRAM-like) tier.
    pub fn fast(name: impl Into<String>) -> Self {
        Self::new(TierGrade::Fast, name)
    }

    /// Convenience constructor for a slow (capacity) tier.
    pub fn slow(name: impl Into<String>) -> Self {
        Self::new(TierGrade::Slow, name)
    }

    /// Bytes currently allocated through this backend.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.get()
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.layouts.lock().len()
    }

    fn allocate(&self, layout: Layout, zeroed: bool) -> *mut u8 {
        let ptr = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        if !ptr.is_null() {
            self.layouts.lock().insert(ptr as usize, layout);
            self.allocated.add(layout.size());
        }
        ptr
    }
}

impl TierBackend for HeapBackend {
    fn grade(&self) -> TierGrade {
        self.grade
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn alloc(&self, size: usize) -> *mut u8 {
        match Layout::from_size_align(size.max(1), MIN_ALIGN) {
            Ok(layout) => self.allocate(layout, false),
            Err(_) => std::ptr::null_mut(),
        }
    }

    fn alloc_zeroed(&self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            return std::ptr::null_mut();
        };
        match Layout::from_size_align(total.max(1), MIN_ALIGN) {
            Ok(layout) => self.allocate(layout, true),
            Err(_) => std::ptr::null_mut(),
        }
    }

    fn alloc_aligned(&self, align: usize, size: usize) -> *mut u8 {
        match Layout::from_size_align(size.max(1), align.max(MIN_ALIGN)) {
            Ok(layout) => self.allocate(layout, false),
            Err(_) => std::ptr::null_mut(),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let Some(layout) = self.layouts.lock().get(&(ptr as usize)).copied() else {
            return std::ptr::null_mut();
        };
        let new_ptr = alloc::realloc(ptr, layout, size.max(1));
        if new_ptr.is_null() {
            return std::ptr::null_mut();
        }
        let new_layout = match Layout::from_size_align(size.max(1), layout.align()) {
            Ok(layout) => layout,
            Err(_) => return std::ptr::null_mut(),
        };
        let mut layouts = self.layouts.lock();
        layouts.remove(&(ptr as usize));
        layouts.insert(new_ptr as usize, new_layout);
        self.allocated.sub(layout.size());
        self.allocated.add(new_layout.size());
        new_ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8) {
        let layout = self.layouts.lock().remove(&(ptr as usize));
        if let Some(layout) = layout {
            self.allocated.sub(layout.size());
            alloc::dealloc(ptr, layout);
        } else {
            log::error!("heap backend {}: free of unknown pointer", self.name);
        }
    }

    fn usable_size(&self, ptr: *const u8) -> usize {
        self.layouts
            .lock()
            .get(&(ptr as usize))
            .map_or(0, Layout::size)
    }

    fn owns(&self, ptr: *const u8) -> bool {
        self.layouts.lock().contains_key(&(ptr as usize))
    }
}

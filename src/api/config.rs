//! Hotness engine configuration.

use std::time::Duration;

use crate::core::fingerprint::DEFAULT_STACK_DEPTH;
use crate::core::hotness::{
    DEFAULT_MALLOC_TOUCH_WEIGHT, DEFAULT_OLD_WINDOW_WEIGHT, DEFAULT_WINDOW_NS,
};

/// Tuning for the data-hotness engine.
///
/// The defaults match a hardware sampler reporting nanosecond timestamps at
/// a moderate rate; tests shrink the windows and cadences aggressively.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Estimator window length, in sampler timebase units (default 1 s in
    /// nanoseconds).
    pub window: u64,

    /// Weight of the previous window in the smoothed frequency (default 0.9).
    pub old_window_weight: f64,

    /// Synthetic touch weight fed to a group when one of its regions is
    /// allocated (default 20).
    pub malloc_touch_weight: f64,

    /// Event ring capacity (default 65536; powers of two map slots cheaply).
    pub queue_capacity: usize,

    /// Processed events between threshold recomputations (default 4096).
    pub refresh_events: u64,

    /// Upper bound between threshold recomputations (default 100 ms).
    pub refresh_interval: Duration,

    /// Worker sleep while the queue is empty (default 100 µs).
    pub idle_sleep: Duration,

    /// Stack frames mixed into the allocation-site fingerprint (default 16).
    pub stack_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW_NS,
            old_window_weight: DEFAULT_OLD_WINDOW_WEIGHT,
            malloc_touch_weight: DEFAULT_MALLOC_TOUCH_WEIGHT,
            queue_capacity: 1 << 16,
            refresh_events: 4096,
            refresh_interval: Duration::from_millis(100),
            idle_sleep: Duration::from_micros(100),
            stack_depth: DEFAULT_STACK_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Builder pattern: set the estimator window length.
    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    /// Builder pattern: set the previous-window smoothing weight.
    pub fn with_old_window_weight(mut self, weight: f64) -> Self {
        self.old_window_weight = weight;
        self
    }

    /// Builder pattern: set the allocation-touch weight.
    pub fn with_malloc_touch_weight(mut self, weight: f64) -> Self {
        self.malloc_touch_weight = weight;
        self
    }

    /// Builder pattern: set the event ring capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Builder pattern: set the refresh cadence in events and time.
    pub fn with_refresh(mut self, events: u64, interval: Duration) -> Self {
        self.refresh_events = events;
        self.refresh_interval = interval;
        self
    }

    /// Builder pattern: set the worker idle sleep.
    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }

    /// Builder pattern: set the fingerprint stack depth.
    pub fn with_stack_depth(mut self, depth: usize) -> Self {
        self.stack_depth = depth;
        self
    }
}

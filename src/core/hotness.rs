//! Two-window access-frequency estimator.
//!
//! Each allocation group carries one [`HotnessState`]. Sampled accesses
//! accumulate into the current window; once the window length is exceeded
//! the state rolls over and the smoothed frequency `f` is refreshed from the
//! closing and the previous window:
//!
//! ```text
//! f = old_weight * n2/(t1 - t2) + (1 - old_weight) * n1/(t0 - t1)
//! ```
//!
//! Touches with timestamp 0 are allocation-time touches: they only add
//! weight to the open window and never advance the window machinery.

/// Default window length in the sampler's timebase (1 s in nanoseconds).
pub const DEFAULT_WINDOW_NS: u64 = 1_000_000_000;

/// Default smoothing weight of the previous window.
pub const DEFAULT_OLD_WINDOW_WEIGHT: f64 = 0.9;

/// Default synthetic touch weight applied when a region is allocated.
pub const DEFAULT_MALLOC_TOUCH_WEIGHT: f64 = 20.0;

/// Estimator tuning shared by all groups.
#[derive(Debug, Clone, Copy)]
pub struct HotnessParams {
    /// Window length in sampler timebase units.
    pub window: u64,
    /// Weight of the previous window in the smoothed frequency, in `[0, 1]`.
    pub old_weight: f64,
}

impl Default for HotnessParams {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW_NS,
            old_weight: DEFAULT_OLD_WINDOW_WEIGHT,
        }
    }
}

impl HotnessParams {
    /// Weight of the just-closed window.
    #[inline]
    pub fn new_weight(&self) -> f64 {
        1.0 - self.old_weight
    }
}

/// Warm-up progress of a group's window machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// No timestamped touch seen yet.
    Unset,
    /// First window is filling; no frequency has been computed.
    Init,
    /// Windows roll over normally.
    InitDone,
}

/// Per-group estimator state.
#[derive(Debug, Clone)]
pub struct HotnessState {
    /// Accesses in the open window.
    n1: f64,
    /// Accesses in the previous window.
    n2: f64,
    /// Latest touch timestamp.
    t0: u64,
    /// Open time of the current window.
    t1: u64,
    /// Open time of the previous window.
    t2: u64,
    /// Smoothed access frequency.
    f: f64,
    phase: WindowPhase,
}

impl HotnessState {
    /// Fresh state: frequency 0, warm-up not started.
    pub fn new() -> Self {
        Self {
            n1: 0.0,
            n2: 0.0,
            t0: 0,
            t1: 0,
            t2: 0,
            f: 0.0,
            phase: WindowPhase::Unset,
        }
    }

    /// Smoothed access frequency.
    #[inline]
    pub fn frequency(&self) -> f64 {
        self.f
    }

    /// Warm-up phase.
    #[inline]
    pub fn phase(&self) -> WindowPhase {
        self.phase
    }

    /// Timestamp of the most recent touch.
    #[inline]
    pub fn last_touch(&self) -> u64 {
        self.t0
    }

    /// Record an access of `weight` at `timestamp`.
    ///
    /// Returns `true` when the smoothed frequency changed (a window closed).
    pub fn touch(&mut self, timestamp: u64, weight: f64, params: &HotnessParams) -> bool {
        self.n1 += weight;
        if timestamp == 0 {
            // Allocation-time touch; only feeds the open window.
            return false;
        }
        self.t0 = timestamp;
        if self.phase == WindowPhase::Unset {
            self.t2 = timestamp;
            self.phase = WindowPhase::Init;
        }
        match self.phase {
            WindowPhase::InitDone => {
                if self.t0 - self.t1 > params.window {
                    let f2 = self.n2 / (self.t1 - self.t2) as f64;
                    let f1 = self.n1 / (self.t0 - self.t1) as f64;
                    self.f = f2 * params.old_weight + f1 * params.new_weight();
                    self.t2 = self.t1;
                    self.t1 = self.t0;
                    self.n2 = self.n1;
                    self.n1 = 0.0;
                    return true;
                }
                false
            }
            _ => {
                if self.t0 - self.t2 > params.window {
                    self.phase = WindowPhase::InitDone;
                    self.t1 = self.t0;
                }
                false
            }
        }
    }
}

impl Default for HotnessState {
    fn default() -> Self {
        Self::new()
    }
}

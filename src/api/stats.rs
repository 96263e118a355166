//! Runtime statistics.
//!
//! Counters are cheap enough to stay on in production: every cell is a
//! relaxed atomic, and reading a snapshot does not stop the engine.

use crate::backend::TierGrade;
use crate::core::events::EventKind;
use crate::sync::atomics::AtomicCounter;
use crate::util::size::format_bytes;

/// Push/drop counters per event class plus worker-side totals.
///
/// Queue-full drops land here instead of surfacing to the caller; a rising
/// drop count means the estimator is shedding accuracy, not that anything
/// failed.
pub(crate) struct EngineCounters {
    pushed: [AtomicCounter; 5],
    dropped: [AtomicCounter; 5],
    processed: AtomicCounter,
    refreshes: AtomicCounter,
}

fn class_index(kind: EventKind) -> usize {
    match kind {
        EventKind::CreateAdd => 0,
        EventKind::DestroyRemove => 1,
        EventKind::Realloc => 2,
        EventKind::Touch => 3,
        EventKind::SetTouchCallback => 4,
    }
}

impl EngineCounters {
    pub fn new() -> Self {
        Self {
            pushed: Default::default(),
            dropped: Default::default(),
            processed: AtomicCounter::new(0),
            refreshes: AtomicCounter::new(0),
        }
    }

    /// Account one push attempt of `kind`.
    pub fn record_push(&self, kind: EventKind, accepted: bool) {
        let index = class_index(kind);
        if accepted {
            self.pushed[index].increment();
        } else {
            self.dropped[index].increment();
        }
    }

    /// Account one event consumed by the worker.
    pub fn record_processed(&self) {
        self.processed.increment();
    }

    /// Account one threshold recomputation.
    pub fn record_refresh(&self) {
        self.refreshes.increment();
    }

    pub fn processed(&self) -> u64 {
        self.processed.get()
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.get()
    }

    pub fn snapshot(&self) -> EventStats {
        let class = |kind| EventClassStats {
            pushed: self.pushed[class_index(kind)].get(),
            dropped: self.dropped[class_index(kind)].get(),
        };
        EventStats {
            create: class(EventKind::CreateAdd),
            destroy: class(EventKind::DestroyRemove),
            realloc: class(EventKind::Realloc),
            touch: class(EventKind::Touch),
            callback: class(EventKind::SetTouchCallback),
            processed: self.processed(),
            refreshes: self.refreshes(),
        }
    }
}

/// Push/drop counts of one event class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventClassStats {
    /// Events accepted by the queue.
    pub pushed: u64,
    /// Events dropped because the queue was full.
    pub dropped: u64,
}

/// Event-queue traffic, split by class.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventStats {
    pub create: EventClassStats,
    pub destroy: EventClassStats,
    pub realloc: EventClassStats,
    pub touch: EventClassStats,
    pub callback: EventClassStats,
    /// Events consumed by the ranking worker.
    pub processed: u64,
    /// Threshold recomputations.
    pub refreshes: u64,
}

impl EventStats {
    /// Total accepted pushes.
    pub fn total_pushed(&self) -> u64 {
        self.create.pushed
            + self.destroy.pushed
            + self.realloc.pushed
            + self.touch.pushed
            + self.callback.pushed
    }

    /// Total queue-full drops.
    pub fn total_dropped(&self) -> u64 {
        self.create.dropped
            + self.destroy.dropped
            + self.realloc.dropped
            + self.touch.dropped
            + self.callback.dropped
    }
}

/// Per-tier view in a stats snapshot.
#[derive(Debug, Clone)]
pub struct TierStats {
    /// Backend name.
    pub name: String,
    /// Backend grade.
    pub grade: TierGrade,
    /// Normalized capacity ratio.
    pub ratio: f64,
    /// Bytes currently accounted to the tier.
    pub allocated_bytes: usize,
}

/// Point-in-time snapshot of a memory object.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    /// Per-tier state, in tier order.
    pub tiers: Vec<TierStats>,
    /// Published hot threshold; `None` for policies without a hotness engine.
    pub hot_threshold: Option<f64>,
    /// Event-queue traffic; `None` for policies without a hotness engine.
    pub events: Option<EventStats>,
}

impl MemoryStats {
    /// Render as a single JSON object (stable key order, no trailing
    /// whitespace). Meant for log shipping and test harnesses.
    pub fn to_json(&self) -> String {
        let mut out = String::from("{\"tiers\":[");
        for (i, tier) in self.tiers.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!(
                "{{\"name\":\"{}\",\"grade\":\"{:?}\",\"ratio\":{},\"allocated_bytes\":{},\"allocated\":\"{}\"}}",
                tier.name,
                tier.grade,
                tier.ratio,
                tier.allocated_bytes,
                format_bytes(tier.allocated_bytes)
            ));
        }
        out.push(']');
        if let Some(threshold) = self.hot_threshold {
            out.push_str(&format!(",\"hot_threshold\":{}", threshold));
        }
        if let Some(events) = &self.events {
            out.push_str(&format!(
                ",\"events\":{{\"pushed\":{},\"dropped\":{},\"processed\":{},\"refreshes\":{}}}",
                events.total_pushed(),
                events.total_dropped(),
                events.processed,
                events.refreshes
            ));
        }
        out.push('}');
        out
    }
}

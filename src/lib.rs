//! # tieralloc
//!
//! Hotness-aware tiered-memory allocation policy engine.
//!
//! tieralloc decides, for every allocation request, which memory backend
//! (a fast DRAM-like tier or a slower large-capacity tier) should serve it,
//! so frequently accessed data stays fast while cold data spills to
//! capacity. Access observations arrive asynchronously from a sampler; a
//! dedicated ranking thread folds them into per-allocation-site frequency
//! estimates and continuously recomputes the hot/cold boundary for the
//! configured capacity split.
//!
//! ## Policies
//!
//! - **Static ratio** — keep per-tier allocated bytes close to fixed ratios.
//! - **Dynamic threshold** — partition requests by size with self-adjusting
//!   cut points.
//! - **Data hotness** — fingerprint the allocation site, classify it against
//!   the published hot threshold, route hot sites fast and cold sites slow.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tieralloc::{HeapBackend, PolicyKind, TierBuilder};
//!
//! let mut builder = TierBuilder::new(PolicyKind::DataHotness);
//! builder.add_tier(Arc::new(HeapBackend::fast("dram")), 1)?;
//! builder.add_tier(Arc::new(HeapBackend::slow("pmem")), 4)?;
//! let memory = builder.construct()?;
//!
//! let ptr = memory.alloc(4096);
//! // ... the sampler reports accesses via memory.record_access(...) ...
//! unsafe { memory.dealloc(ptr) };
//! # Ok::<(), tieralloc::TierError>(())
//! ```
//!
//! ## Concurrency model
//!
//! Many application threads allocate; one or more sampler threads report
//! accesses; a single ranking thread consumes both streams through a
//! bounded lock-free MPSC queue. The allocation fast path reads two shared
//! cells (the fingerprint→frequency cache and the atomic hot threshold) and
//! never blocks on the engine. When the queue is full, notifications are
//! dropped and counted; the estimator degrades gracefully instead of
//! applying backpressure.

pub mod api;
pub mod backend;

#[allow(dead_code)]
mod core;
mod error;
mod policy;
#[allow(dead_code)]
mod sync;
mod util;

// Re-export public API at crate root for convenience
pub use api::builder::TierBuilder;
pub use api::config::EngineConfig;
pub use api::memory::TieredMemory;
pub use api::stats::{EventClassStats, EventStats, MemoryStats, TierStats};
pub use backend::{BackendRef, HeapBackend, TierBackend, TierGrade};
pub use error::TierError;
pub use policy::{HotnessClass, PolicyKind};

// Sampler-facing event types
pub use crate::core::events::TouchCallback;

//! Synchronization primitives.
//!
//! Thin wrappers over std or parking_lot mutexes, plus the atomic cells used
//! to publish engine state across threads.

pub(crate) mod atomics;
pub(crate) mod mutex;

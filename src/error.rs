//! Error types.

use thiserror::Error;

use crate::policy::PolicyKind;

/// Rejections surfaced by the builder and the client API.
///
/// Allocation failure is deliberately not represented here: allocation entry
/// points return null pointers, like the backend interface they wrap.
#[derive(Debug, Error)]
pub enum TierError {
    /// No tier was added before construction.
    #[error("no tiers were added to the builder")]
    NoTiers,

    /// The same backend was added twice.
    #[error("backend is already registered as a tier")]
    DuplicateTier,

    /// The policy's tier-count requirement was not met.
    #[error("policy {policy:?} requires {required} tiers, got {actual}")]
    TierCount {
        policy: PolicyKind,
        required: &'static str,
        actual: usize,
    },

    /// Data-hotness needs exactly one fast-grade backend among its tiers.
    #[error("data-hotness policy requires exactly one fast-grade tier")]
    NoFastTier,

    /// A tier ratio of zero.
    #[error("tier ratio must be positive")]
    InvalidRatio,

    /// A configuration key the active policy does not know.
    #[error("unknown configuration key: {0}")]
    InvalidCtlKey(String),

    /// A configuration value that failed to parse for its key.
    #[error("invalid value for configuration key {key}: {value}")]
    InvalidCtlValue { key: String, value: String },

    /// A threshold index with no matching tier pair.
    #[error("threshold index {index} needs at least {} tiers", .index + 2)]
    ThresholdIndex { index: usize },

    /// A threshold outside its own `[min, max]` band.
    #[error("threshold {index} out of range: min {min}, val {val}, max {max}")]
    ThresholdRange {
        index: usize,
        min: usize,
        val: usize,
        max: usize,
    },

    /// Adjacent threshold bands that overlap.
    #[error("threshold {index} band overlaps its predecessor")]
    ThresholdOverlap { index: usize },

    /// A tuning parameter that must be non-negative.
    #[error("{name} must be >= 0")]
    NegativeParam { name: &'static str },

    /// Alignment that is not a pointer-sized power of two.
    #[error("alignment {0} is not a supported power of two")]
    InvalidAlignment(usize),

    /// The ranking worker thread could not be started.
    #[error("failed to start ranking worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

//! Aggregated hotness ranking.
//!
//! Groups with the same quantified hotness collapse into one bucket holding
//! their combined size. Buckets live in a weight-ranked tree ordered
//! hottest-first and weighted by aggregated size, so the hot/cold threshold
//! for a fast-tier capacity share `d` is a single weighted-quantile query:
//! the bucket the fraction `d` of total bytes lands on, walking from the
//! hottest down.
//!
//! The computed threshold is published through an atomic f64 cell that the
//! allocation fast path reads with relaxed ordering; stale values only make
//! the policy momentarily imprecise.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::core::wrtree::WrTree;
use crate::sync::atomics::AtomicF64;

/// Collapse a frequency into its ranking bucket.
#[cfg(feature = "quantized-hotness")]
#[inline]
pub fn quantify(hotness: f64) -> f64 {
    if hotness > 0.0 {
        hotness.ln().floor()
    } else {
        f64::NEG_INFINITY
    }
}

/// Representative frequency of a ranking bucket.
#[cfg(feature = "quantized-hotness")]
#[inline]
pub fn dequantify(bucket: f64) -> f64 {
    if bucket == f64::NEG_INFINITY {
        0.0
    } else {
        bucket.exp()
    }
}

/// Collapse a frequency into its ranking bucket (identity when quantization
/// is disabled).
#[cfg(not(feature = "quantized-hotness"))]
#[inline]
pub fn quantify(hotness: f64) -> f64 {
    hotness
}

/// Representative frequency of a ranking bucket.
#[cfg(not(feature = "quantized-hotness"))]
#[inline]
pub fn dequantify(bucket: f64) -> f64 {
    bucket
}

/// One ranking bucket: all bytes whose groups share a quantified hotness.
#[derive(Debug, Clone)]
struct AggregatedHotness {
    bucket: f64,
    size: usize,
}

impl AggregatedHotness {
    fn probe(bucket: f64) -> Self {
        Self { bucket, size: 0 }
    }
}

impl PartialEq for AggregatedHotness {
    fn eq(&self, other: &Self) -> bool {
        self.bucket.total_cmp(&other.bucket) == Ordering::Equal
    }
}

impl Eq for AggregatedHotness {}

impl PartialOrd for AggregatedHotness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AggregatedHotness {
    fn cmp(&self, other: &Self) -> Ordering {
        // Hotter buckets sort first so a small weight fraction lands on the
        // hottest bytes.
        other.bucket.total_cmp(&self.bucket)
    }
}

/// Hotness-bucketed size ranking with a published hot threshold.
pub struct Ranking {
    entries: WrTree<AggregatedHotness>,
    hot_threshold: Arc<AtomicF64>,
}

impl Ranking {
    /// Create an empty ranking publishing into `hot_threshold`.
    pub fn new(hot_threshold: Arc<AtomicF64>) -> Self {
        Self {
            entries: WrTree::new(),
            hot_threshold,
        }
    }

    /// The cell the threshold is published through.
    pub fn threshold_cell(&self) -> Arc<AtomicF64> {
        self.hot_threshold.clone()
    }

    /// Account `size` bytes at `hotness`.
    pub fn add(&mut self, hotness: f64, size: usize) {
        if size == 0 {
            return;
        }
        let probe = AggregatedHotness::probe(quantify(hotness));
        let mut entry = match self.entries.remove(&probe) {
            Some(existing) => existing,
            None => probe,
        };
        entry.size += size;
        let weight = entry.size;
        self.entries.put(entry, weight);
    }

    /// Remove `size` bytes previously accounted at `hotness`.
    ///
    /// Removing more than the bucket holds is an accounting bug upstream:
    /// it is logged and saturates to zero (or panics under the
    /// `strict-ranking` feature).
    pub fn remove(&mut self, hotness: f64, size: usize) {
        if size == 0 {
            return;
        }
        let probe = AggregatedHotness::probe(quantify(hotness));
        match self.entries.remove(&probe) {
            Some(mut entry) => {
                if size > entry.size {
                    log::error!(
                        "ranking: tried to remove more than added ({} vs {})",
                        size,
                        entry.size
                    );
                    #[cfg(feature = "strict-ranking")]
                    panic!("ranking: attempt to remove non-existent data");
                }
                entry.size = entry.size.saturating_sub(size);
                if entry.size > 0 {
                    let weight = entry.size;
                    self.entries.put(entry, weight);
                }
            }
            None => {
                log::error!("ranking: remove from absent bucket (size {})", size);
                #[cfg(feature = "strict-ranking")]
                panic!("ranking: attempt to remove non-existent data");
            }
        }
    }

    /// Remove up to `limit` bytes from the bucket at `hotness`, returning how
    /// much was actually removed. Used when a group is re-bucketed and the
    /// ranking may lag the group's own accounting.
    pub fn remove_up_to(&mut self, hotness: f64, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }
        let probe = AggregatedHotness::probe(quantify(hotness));
        match self.entries.remove(&probe) {
            Some(mut entry) => {
                let taken = limit.min(entry.size);
                entry.size -= taken;
                if entry.size > 0 {
                    let weight = entry.size;
                    self.entries.put(entry, weight);
                }
                taken
            }
            None => 0,
        }
    }

    /// Recompute the hot threshold for a fast-tier share of total bytes in
    /// `[0, 1]` and publish it.
    pub fn threshold_by_total_fraction(&self, fraction: f64) -> f64 {
        let threshold = self
            .entries
            .find_by_weight_fraction(fraction)
            .map(|entry| dequantify(entry.bucket))
            .unwrap_or(0.0);
        self.hot_threshold.set(threshold);
        threshold
    }

    /// Recompute the hot threshold from the fast:slow capacity ratio.
    pub fn threshold_by_tier_ratio(&self, ratio: f64) -> f64 {
        let fraction = ratio / (1.0 + ratio);
        self.threshold_by_total_fraction(fraction)
    }

    /// Latest published threshold.
    pub fn hot_threshold(&self) -> f64 {
        self.hot_threshold.get()
    }

    /// Whether a group at `frequency` classifies as hot under the published
    /// threshold. The boundary itself is hot.
    pub fn is_hot(&self, frequency: f64) -> bool {
        frequency >= self.hot_threshold.get()
    }

    /// Sum of all bucket sizes.
    pub fn total_size(&self) -> usize {
        self.entries.total_weight()
    }

    /// Number of distinct buckets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no bytes are accounted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

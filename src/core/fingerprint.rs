//! Allocation-site fingerprints.
//!
//! A fingerprint is a 64-bit hash of the current call stack (up to a
//! configured depth) and the requested size. The same allocation site
//! produces the same fingerprint on every call, which is what lets the
//! engine aggregate short-lived regions into long-lived groups.
//!
//! The walk runs inside the allocator, so it must not allocate and must
//! tolerate reentrant entry; a thread-local guard degrades recursive calls
//! to a size-only hash.

use std::cell::Cell;

use crate::util::hash::{mix, splitmix64};

/// Default number of stack frames mixed into a fingerprint.
pub const DEFAULT_STACK_DEPTH: usize = 16;

/// Hard cap on the walked depth.
pub const MAX_STACK_DEPTH: usize = 64;

thread_local! {
    static WALK_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Mix a frame list and a request size into a fingerprint.
#[inline]
pub fn hash_frames(frames: &[u64], size: usize) -> u64 {
    let mut hash = splitmix64(size as u64);
    for &ip in frames {
        hash = mix(hash, ip);
    }
    hash
}

/// Fingerprint of the current call site for a request of `size` bytes.
pub fn fingerprint(size: usize, depth: usize) -> u64 {
    let depth = depth.min(MAX_STACK_DEPTH);
    if depth == 0 {
        return hash_frames(&[], size);
    }
    let reentered = WALK_ACTIVE.with(|active| active.replace(true));
    if reentered {
        return hash_frames(&[], size);
    }
    let mut frames = [0u64; MAX_STACK_DEPTH];
    let mut count = 0usize;
    backtrace::trace(|frame| {
        frames[count] = frame.ip() as usize as u64;
        count += 1;
        count < depth
    });
    WALK_ACTIVE.with(|active| active.set(false));
    hash_frames(&frames[..count], size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn site_a(size: usize) -> u64 {
        fingerprint(size, DEFAULT_STACK_DEPTH)
    }

    #[inline(never)]
    fn site_b(size: usize) -> u64 {
        // The extra statement keeps this body distinct from site_a so the
        // linker cannot fold the two functions together.
        let size = std::hint::black_box(size);
        fingerprint(size, DEFAULT_STACK_DEPTH)
    }

    #[test]
    fn test_stable_per_site() {
        let first = site_a(128);
        for _ in 0..8 {
            assert_eq!(site_a(128), first);
        }
    }

    #[test]
    fn test_size_changes_fingerprint() {
        assert_ne!(site_a(128), site_a(256));
    }

    #[test]
    fn test_hash_frames_depends_on_frames() {
        assert_ne!(hash_frames(&[1, 2, 3], 64), hash_frames(&[3, 2, 1], 64));
        assert_ne!(hash_frames(&[1, 2, 3], 64), hash_frames(&[1, 2], 64));
    }

    #[test]
    fn test_zero_depth_is_size_only() {
        assert_eq!(fingerprint(64, 0), hash_frames(&[], 64));
    }

    #[test]
    fn test_distinct_sites_differ() {
        // Same size from two different call sites. Relies on the two helper
        // functions not being merged; both are #[inline(never)].
        assert_ne!(site_a(128), site_b(128));
    }
}

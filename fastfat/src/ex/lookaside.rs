//! Lookaside List Implementation
//!
//! Lookaside lists are fixed-type allocators. They keep a bounded cache of
//! freed blocks so that frequently allocated structures avoid the general
//! pool allocator.
//!
//! # NT Semantics
//!
//! - Each lookaside list allocates blocks of a single type
//! - Freed blocks are cached up to a depth, then returned to the pool
//! - Allocate/free statistics are kept per list
//!
//! Every block handed out is an owned `Box<T>`, so a block can be returned
//! at most once; the statistics let callers check that it is returned
//! exactly once.
//!
//! # Usage
//! ```
//! use fastfat::ex::LookasideList;
//! # fastfat::ke::ke_register_thread_id_source(|| 1);
//!
//! let list: LookasideList<[u8; 64]> = LookasideList::new(8);
//! let block = list.allocate([0; 64]);
//! // ... use block ...
//! list.free(block);
//! assert_eq!(list.outstanding(), 0);
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::ke::spinlock::SpinLock;

/// Default depth of the cache of freed blocks
pub const LOOKASIDE_DEPTH: usize = 256;

/// Lookaside list statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LookasideStats {
    /// Total allocations
    pub allocates: u64,
    /// Total frees
    pub frees: u64,
    /// Allocations served from the cache (hits)
    pub allocate_hits: u64,
    /// Frees that went back to the pool (cache full)
    pub free_misses: u64,
}

/// Lookaside list for allocations of one type
pub struct LookasideList<T> {
    /// Cached free blocks
    cache: SpinLock<Vec<Box<T>>>,
    /// Maximum number of cached blocks
    depth: usize,
    allocates: AtomicU64,
    frees: AtomicU64,
    allocate_hits: AtomicU64,
    free_misses: AtomicU64,
}

impl<T> LookasideList<T> {
    /// Create a lookaside list caching up to `depth` freed blocks
    pub const fn new(depth: usize) -> Self {
        Self {
            cache: SpinLock::new(Vec::new()),
            depth,
            allocates: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            allocate_hits: AtomicU64::new(0),
            free_misses: AtomicU64::new(0),
        }
    }

    /// Allocate a block initialized with `value`
    pub fn allocate(&self, value: T) -> Box<T> {
        self.allocates.fetch_add(1, Ordering::Relaxed);

        let cached = self.cache.lock().pop();
        match cached {
            Some(mut block) => {
                self.allocate_hits.fetch_add(1, Ordering::Relaxed);
                *block = value;
                block
            }
            None => Box::new(value),
        }
    }

    /// Return a block to the list
    pub fn free(&self, block: Box<T>) {
        self.frees.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.cache.lock();
        if cache.len() < self.depth {
            cache.push(block);
        } else {
            drop(cache);
            self.free_misses.fetch_add(1, Ordering::Relaxed);
            drop(block);
        }
    }

    /// Blocks allocated and not yet freed
    pub fn outstanding(&self) -> u64 {
        self.allocates.load(Ordering::Relaxed) - self.frees.load(Ordering::Relaxed)
    }

    /// Snapshot of the list statistics
    pub fn stats(&self) -> LookasideStats {
        LookasideStats {
            allocates: self.allocates.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            allocate_hits: self.allocate_hits.load(Ordering::Relaxed),
            free_misses: self.free_misses.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for LookasideList<T> {
    fn default() -> Self {
        Self::new(LOOKASIDE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_reuses_block() {
        let list: LookasideList<u64> = LookasideList::new(4);

        let block = list.allocate(7);
        assert_eq!(*block, 7);
        let address = &*block as *const u64;
        list.free(block);

        let again = list.allocate(9);
        assert_eq!(*again, 9);
        assert_eq!(&*again as *const u64, address);
        list.free(again);

        let stats = list.stats();
        assert_eq!(stats.allocates, 2);
        assert_eq!(stats.frees, 2);
        assert_eq!(stats.allocate_hits, 1);
        assert_eq!(list.outstanding(), 0);
    }

    #[test]
    fn test_cache_depth_bounded() {
        let list: LookasideList<u32> = LookasideList::new(1);
        let a = list.allocate(1);
        let b = list.allocate(2);
        list.free(a);
        list.free(b);
        assert_eq!(list.stats().free_misses, 1);
        assert_eq!(list.outstanding(), 0);
    }
}

//! Executive Resource (ERESOURCE) Implementation
//!
//! ERESOURCEs are full-featured reader-writer locks with ownership tracking,
//! recursive acquisition support, and waiter management.
//!
//! # NT Semantics
//!
//! - Supports exclusive (write) and shared (read) access
//! - Allows recursive acquisition by the same thread
//! - Tracks owner thread for exclusive access
//! - A shared request from the exclusive owner nests inside the exclusive hold
//! - Provides waiter counts so long-term holders can yield to waiters
//!
//! Waiters spin on the processor instead of blocking on a dispatcher event;
//! the host's thread-id source decides who owns what.
//!
//! # Usage
//! ```
//! use fastfat::ex::EResource;
//! # fastfat::ke::ke_register_thread_id_source(|| 1);
//!
//! let resource = EResource::new();
//!
//! // Exclusive access
//! resource.acquire_exclusive(true);
//! // ... write critical section ...
//! resource.release();
//!
//! // Shared access
//! resource.acquire_shared(true);
//! // ... read critical section ...
//! resource.release();
//! ```

use core::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};

use crate::ke::bugcheck::{codes, ke_bug_check_ex};
use crate::ke::thread::{ke_get_current_thread_id, yield_processor, NO_THREAD};

/// Executive Resource structure
///
/// Equivalent to NT's ERESOURCE
pub struct EResource {
    /// Owner of exclusive access (NO_THREAD if not exclusively held)
    owner_thread: AtomicUsize,

    /// Count of active locks:
    /// - Positive: number of shared owners
    /// - Negative: exclusively owned (absolute value is recursion count)
    /// - Zero: not locked
    active_count: AtomicI32,

    /// Number of threads waiting for shared access
    shared_waiters: AtomicU32,

    /// Number of threads waiting for exclusive access
    exclusive_waiters: AtomicU32,

    /// Number of times current owner acquired the resource
    owner_count: AtomicU32,

    /// Statistics: acquisitions that had to wait
    contention_count: AtomicU32,

    /// Statistics: successful acquisitions (shared or exclusive)
    acquire_count: AtomicU32,
}

impl EResource {
    /// Create a new, free resource
    pub const fn new() -> Self {
        Self {
            owner_thread: AtomicUsize::new(NO_THREAD),
            active_count: AtomicI32::new(0),
            shared_waiters: AtomicU32::new(0),
            exclusive_waiters: AtomicU32::new(0),
            owner_count: AtomicU32::new(0),
            contention_count: AtomicU32::new(0),
            acquire_count: AtomicU32::new(0),
        }
    }

    /// Acquire the resource exclusively (write lock)
    ///
    /// # Arguments
    /// * `wait` - If true, wait for the resource; if false, fail immediately
    ///
    /// Returns true if acquired, false if couldn't acquire (wait=false only)
    pub fn acquire_exclusive(&self, wait: bool) -> bool {
        let current = ke_get_current_thread_id();

        // Check for recursive acquisition
        if self.owner_thread.load(Ordering::Acquire) == current {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            self.owner_count.fetch_add(1, Ordering::Relaxed);
            self.acquire_count.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let mut waiting = false;
        loop {
            if self
                .active_count
                .compare_exchange_weak(0, -1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.owner_thread.store(current, Ordering::Release);
                self.owner_count.store(1, Ordering::Relaxed);
                if waiting {
                    self.exclusive_waiters.fetch_sub(1, Ordering::Relaxed);
                }
                self.acquire_count.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            // Resource is held - need to wait or fail
            if !wait {
                return false;
            }

            if !waiting {
                waiting = true;
                self.contention_count.fetch_add(1, Ordering::Relaxed);
                self.exclusive_waiters.fetch_add(1, Ordering::Relaxed);
            }

            yield_processor();
        }
    }

    /// Try to acquire exclusively without waiting
    pub fn try_acquire_exclusive(&self) -> bool {
        self.acquire_exclusive(false)
    }

    /// Acquire the resource in shared mode (read lock)
    ///
    /// Exclusive waiters are let through first, so a steady stream of
    /// readers cannot starve a writer.
    ///
    /// Returns true if acquired, false if couldn't acquire (wait=false only)
    pub fn acquire_shared(&self, wait: bool) -> bool {
        let current = ke_get_current_thread_id();

        // If we already own it exclusively, nest inside the exclusive hold
        if self.owner_thread.load(Ordering::Acquire) == current {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            self.owner_count.fetch_add(1, Ordering::Relaxed);
            self.acquire_count.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let mut waiting = false;
        loop {
            let active = self.active_count.load(Ordering::Relaxed);

            if active >= 0 && self.exclusive_waiters.load(Ordering::Relaxed) == 0 {
                if self
                    .active_count
                    .compare_exchange_weak(active, active + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    if waiting {
                        self.shared_waiters.fetch_sub(1, Ordering::Relaxed);
                    }
                    self.acquire_count.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                continue;
            }

            if !wait {
                return false;
            }

            if !waiting {
                waiting = true;
                self.contention_count.fetch_add(1, Ordering::Relaxed);
                self.shared_waiters.fetch_add(1, Ordering::Relaxed);
            }

            yield_processor();
        }
    }

    /// Try to acquire shared without waiting
    pub fn try_acquire_shared(&self) -> bool {
        self.acquire_shared(false)
    }

    /// Release the resource
    ///
    /// Must be called once for each successful acquire.
    pub fn release(&self) {
        let active = self.active_count.load(Ordering::Relaxed);

        if active < 0 {
            // Exclusive release
            let current = ke_get_current_thread_id();
            let owner = self.owner_thread.load(Ordering::Relaxed);
            if owner != current {
                ke_bug_check_ex(
                    codes::RESOURCE_NOT_OWNED,
                    self as *const Self as u64,
                    current as u64,
                    owner as u64,
                    0,
                );
            }

            let owner_count = self.owner_count.fetch_sub(1, Ordering::Relaxed);
            if owner_count > 1 {
                // Still recursively held
                self.active_count.fetch_add(1, Ordering::Release);
                return;
            }

            // Final release
            self.owner_thread.store(NO_THREAD, Ordering::Release);
            self.active_count.store(0, Ordering::Release);
        } else if active > 0 {
            // Shared release
            self.active_count.fetch_sub(1, Ordering::Release);
        } else {
            ke_bug_check_ex(
                codes::RESOURCE_NOT_OWNED,
                self as *const Self as u64,
                ke_get_current_thread_id() as u64,
                0,
                0,
            );
        }
    }

    /// Check if resource is held exclusively
    #[inline]
    pub fn is_acquired_exclusive(&self) -> bool {
        self.active_count.load(Ordering::Relaxed) < 0
    }

    /// Check if resource is held (exclusively or shared)
    #[inline]
    pub fn is_acquired(&self) -> bool {
        self.active_count.load(Ordering::Relaxed) != 0
    }

    /// Check if resource is held in shared mode
    #[inline]
    pub fn is_acquired_shared(&self) -> bool {
        self.active_count.load(Ordering::Relaxed) > 0
    }

    /// Get the number of shared owners
    #[inline]
    pub fn shared_count(&self) -> u32 {
        let active = self.active_count.load(Ordering::Relaxed);
        if active > 0 {
            active as u32
        } else {
            0
        }
    }

    /// Get the recursion depth of the exclusive owner (0 when not owned)
    #[inline]
    pub fn exclusive_recursion(&self) -> u32 {
        let active = self.active_count.load(Ordering::Relaxed);
        if active < 0 {
            active.unsigned_abs()
        } else {
            0
        }
    }

    /// Number of threads waiting for shared access
    #[inline]
    pub fn shared_waiter_count(&self) -> u32 {
        self.shared_waiters.load(Ordering::Relaxed)
    }

    /// Number of threads waiting for exclusive access
    #[inline]
    pub fn exclusive_waiter_count(&self) -> u32 {
        self.exclusive_waiters.load(Ordering::Relaxed)
    }

    /// Get the contention count (for statistics)
    #[inline]
    pub fn contention_count(&self) -> u32 {
        self.contention_count.load(Ordering::Relaxed)
    }

    /// Get the number of successful acquisitions (for statistics)
    #[inline]
    pub fn acquire_count(&self) -> u32 {
        self.acquire_count.load(Ordering::Relaxed)
    }

    /// Check if current thread owns the resource exclusively
    pub fn is_owned_exclusively(&self) -> bool {
        self.owner_thread.load(Ordering::Relaxed) == ke_get_current_thread_id()
    }
}

impl Default for EResource {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for exclusive resource access
pub struct EResourceExclusiveGuard<'a> {
    resource: &'a EResource,
}

impl<'a> EResourceExclusiveGuard<'a> {
    /// Acquire exclusive access and return a guard
    pub fn new(resource: &'a EResource) -> Self {
        resource.acquire_exclusive(true);
        Self { resource }
    }
}

impl<'a> Drop for EResourceExclusiveGuard<'a> {
    fn drop(&mut self) {
        self.resource.release();
    }
}

/// Number of threads waiting for shared access (NT API compatibility)
#[inline]
pub fn ex_get_shared_waiter_count(resource: &EResource) -> u32 {
    resource.shared_waiter_count()
}

/// Number of threads waiting for exclusive access (NT API compatibility)
#[inline]
pub fn ex_get_exclusive_waiter_count(resource: &EResource) -> u32 {
    resource.exclusive_waiter_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_basic_exclusive() {
        let resource = EResource::new();

        assert!(!resource.is_acquired());

        assert!(resource.acquire_exclusive(true));
        assert!(resource.is_acquired_exclusive());
        assert!(resource.is_owned_exclusively());

        resource.release();
        assert!(!resource.is_acquired());
    }

    #[test]
    fn test_basic_shared() {
        let resource = EResource::new();

        assert!(resource.acquire_shared(true));
        assert!(resource.is_acquired_shared());
        assert_eq!(resource.shared_count(), 1);

        assert!(resource.acquire_shared(true));
        assert_eq!(resource.shared_count(), 2);

        resource.release();
        resource.release();
        assert!(!resource.is_acquired());
    }

    #[test]
    fn test_recursive_exclusive() {
        let resource = EResource::new();

        assert!(resource.acquire_exclusive(true));
        assert!(resource.try_acquire_exclusive());
        assert!(resource.acquire_shared(false));
        assert_eq!(resource.exclusive_recursion(), 3);

        resource.release();
        resource.release();
        assert!(resource.is_acquired_exclusive());
        resource.release();
        assert!(!resource.is_acquired());
        assert_eq!(resource.acquire_count(), 3);
    }

    #[test]
    fn test_try_acquire_from_other_thread() {
        let resource = Arc::new(EResource::new());
        assert!(resource.try_acquire_exclusive());

        let other = Arc::clone(&resource);
        let (exclusive, shared) = std::thread::spawn(move || {
            (other.try_acquire_exclusive(), other.try_acquire_shared())
        })
        .join()
        .unwrap();

        assert!(!exclusive);
        assert!(!shared);
        resource.release();
    }

    #[test]
    fn test_waiter_counts_visible_to_owner() {
        let resource = Arc::new(EResource::new());
        assert!(resource.acquire_exclusive(true));

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let resource = Arc::clone(&resource);
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                resource.acquire_exclusive(true);
                acquired.store(true, Ordering::SeqCst);
                resource.release();
            })
        };

        while resource.exclusive_waiter_count() == 0 {
            std::thread::yield_now();
        }
        assert!(!acquired.load(Ordering::SeqCst));

        resource.release();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(resource.exclusive_waiter_count(), 0);
        assert!(resource.contention_count() >= 1);
    }

    #[test]
    #[should_panic(expected = "RESOURCE_NOT_OWNED")]
    fn test_release_unowned_bugchecks() {
        let resource = EResource::new();
        resource.release();
    }
}

//! Kernel Spinlock Implementation (KSPIN_LOCK)
//!
//! Spinlocks provide mutual exclusion for short critical sections.
//! They busy-wait (spin) until the lock becomes available.
//!
//! In NT, spinlocks raise IRQL to DISPATCH_LEVEL so the holder cannot be
//! preempted. This library cannot touch the interrupt flag, so the contract
//! is stated instead of enforced: a holder must never block. The lock
//! records its owning thread so callers can assert that contract in debug
//! builds before they enter a blocking wait.
//!
//! # Usage
//! ```
//! use fastfat::ke::SpinLock;
//! # fastfat::ke::ke_register_thread_id_source(|| 1);
//!
//! let lock = SpinLock::new(0u32);
//! {
//!     let mut guard = lock.lock();
//!     *guard += 1;
//! } // guard dropped, lock released
//! ```

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::thread::{ke_get_current_thread_id, NO_THREAD};

/// A spinlock for mutual exclusion
///
/// Equivalent to NT's KSPIN_LOCK
pub struct SpinLock<T> {
    /// Lock state (true = locked)
    locked: AtomicBool,
    /// Thread currently holding the lock (NO_THREAD when free)
    owner: AtomicUsize,
    /// Protected data
    data: UnsafeCell<T>,
}

// SpinLock is Sync if T is Send (data can be sent between threads)
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new unlocked spinlock
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_THREAD),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the spinlock, returning a guard that releases on drop
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        debug_assert!(
            !self.is_owned_by_current_thread(),
            "spinlock acquired recursively"
        );

        // Spin until we acquire the lock
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin with a hint to reduce power consumption
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }

        self.owner.store(ke_get_current_thread_id(), Ordering::Relaxed);
        SpinLockGuard { lock: self }
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns Some(guard) if successful, None if lock is held
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(ke_get_current_thread_id(), Ordering::Relaxed);
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Check if the lock is currently held
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Check if the calling thread is the one holding the lock
    #[inline]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.is_locked() && self.owner.load(Ordering::Relaxed) == ke_get_current_thread_id()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for spinlock
///
/// Releases the lock when dropped
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.owner.store(NO_THREAD, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_and_release() {
        let lock = SpinLock::new(5u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_locked());
            assert!(lock.is_owned_by_current_thread());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn test_try_lock_contended() {
        let lock = SpinLock::new(());
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_owner_is_per_thread() {
        let lock = Arc::new(SpinLock::new(()));
        let _guard = lock.lock();

        let other = Arc::clone(&lock);
        let owned_elsewhere = std::thread::spawn(move || other.is_owned_by_current_thread())
            .join()
            .unwrap();

        assert!(!owned_elsewhere);
        assert!(lock.is_owned_by_current_thread());
    }

    #[test]
    fn test_counter_across_threads() {
        let lock = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}

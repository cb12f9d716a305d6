//! Current Thread Identity
//!
//! The executive primitives (spinlock owner tracking, ERESOURCE recursive
//! acquisition) need to know which thread is running. In the kernel this
//! comes from the PRCB's current thread pointer; as a library the driver
//! asks a source registered by the embedding kernel during phase 1 init.
//!
//! Asking for the current thread before a source is registered is a
//! bring-up error and bug checks. Host unit tests get a distinct id per OS
//! thread.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::bugcheck::{codes, ke_bug_check_ex};

/// Id that never names a running thread
pub const NO_THREAD: usize = 0;

/// Next id handed out by [`ke_allocate_thread_id`]
static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(NO_THREAD + 1);

/// Thread id source registered by the embedding kernel
static THREAD_ID_SOURCE: spin::Once<fn() -> usize> = spin::Once::new();

/// Register the routine that reports the current thread's id
///
/// Only the first registration takes effect. The routine must never return
/// `NO_THREAD` and must return a stable value per thread.
pub fn ke_register_thread_id_source(source: fn() -> usize) {
    THREAD_ID_SOURCE.call_once(|| source);
}

/// Allocate a fresh thread id (for kernels that number threads lazily)
pub fn ke_allocate_thread_id() -> usize {
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

/// Ask the registered source for the calling thread's id
fn source_thread_id(source: Option<&fn() -> usize>) -> usize {
    match source {
        Some(source) => source(),
        None => ke_bug_check_ex(codes::PHASE1_INITIALIZATION_FAILED, 0, 0, 0, 0),
    }
}

/// Get the id of the calling thread
#[cfg(not(test))]
#[inline]
pub fn ke_get_current_thread_id() -> usize {
    source_thread_id(THREAD_ID_SOURCE.get())
}

/// Get the id of the calling thread
#[cfg(test)]
pub fn ke_get_current_thread_id() -> usize {
    if let Some(source) = THREAD_ID_SOURCE.get() {
        return source_thread_id(Some(source));
    }
    std::thread_local! {
        static CURRENT: usize = ke_allocate_thread_id();
    }
    CURRENT.with(|id| *id)
}

/// Give up the processor while busy-waiting
#[inline]
pub fn yield_processor() {
    #[cfg(test)]
    std::thread::yield_now();
    #[cfg(not(test))]
    core::hint::spin_loop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_ids_are_stable_and_distinct() {
        let here = ke_get_current_thread_id();
        assert_ne!(here, NO_THREAD);
        assert_eq!(here, ke_get_current_thread_id());

        let there = std::thread::spawn(ke_get_current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    #[should_panic(expected = "PHASE1_INITIALIZATION_FAILED")]
    fn test_unregistered_source_bug_checks() {
        source_thread_id(None);
    }

    #[test]
    fn test_registered_source_is_asked() {
        fn fixed() -> usize {
            42
        }
        assert_eq!(source_thread_id(Some(&(fixed as fn() -> usize))), 42);
    }
}

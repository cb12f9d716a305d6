//! Top-Level Request Tracking
//!
//! Each thread running inside the file system records which request is
//! "top level" for it: the request that entered the driver from outside,
//! or the driver's own worker. Nested calls on the same thread see that a
//! marker exists and leave it alone.

use alloc::collections::BTreeMap;

use crate::ke::spinlock::SpinLock;
use crate::ke::thread::ke_get_current_thread_id;

/// Top-level marker for one thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelIrp {
    /// The file system's own worker thread
    Fsp,
    /// A request that entered the driver, by request id
    Request(u64),
}

/// Per-thread markers, keyed by thread id
static TOP_LEVEL: SpinLock<BTreeMap<usize, TopLevelIrp>> = SpinLock::new(BTreeMap::new());

/// Current thread's top-level marker
pub fn io_get_top_level_irp() -> Option<TopLevelIrp> {
    TOP_LEVEL.lock().get(&ke_get_current_thread_id()).copied()
}

/// Set or clear the current thread's top-level marker
pub fn io_set_top_level_irp(marker: Option<TopLevelIrp>) {
    let thread = ke_get_current_thread_id();
    let mut markers = TOP_LEVEL.lock();
    match marker {
        Some(marker) => {
            markers.insert(thread, marker);
        }
        None => {
            markers.remove(&thread);
        }
    }
}

/// Claim top-level status for a request if nothing on this thread has
///
/// Returns true if the caller became top level and must clear the marker
/// when it leaves the driver.
pub fn io_claim_top_level(request_id: u64) -> bool {
    let thread = ke_get_current_thread_id();
    let mut markers = TOP_LEVEL.lock();
    if markers.contains_key(&thread) {
        return false;
    }
    markers.insert(thread, TopLevelIrp::Request(request_id));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_nested() {
        assert_eq!(io_get_top_level_irp(), None);

        assert!(io_claim_top_level(7));
        assert_eq!(io_get_top_level_irp(), Some(TopLevelIrp::Request(7)));

        // Nested entry does not take over
        assert!(!io_claim_top_level(8));
        assert_eq!(io_get_top_level_irp(), Some(TopLevelIrp::Request(7)));

        io_set_top_level_irp(None);
        assert_eq!(io_get_top_level_irp(), None);
    }

    #[test]
    fn test_markers_are_per_thread() {
        io_set_top_level_irp(Some(TopLevelIrp::Fsp));

        let other = std::thread::spawn(io_get_top_level_irp).join().unwrap();
        assert_eq!(other, None);

        assert_eq!(io_get_top_level_irp(), Some(TopLevelIrp::Fsp));
        io_set_top_level_irp(None);
    }
}

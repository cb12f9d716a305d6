//! Kernel Bug Check Implementation
//!
//! Implements KeBugCheckEx for the components of this library. A bug check
//! is raised when a caller or the driver itself has broken a structural
//! invariant (an open type the close path cannot decode, a lock released by
//! a thread that does not own it). Nothing is recovered.
//!
//! The embedding kernel owns the blue screen and the crash dump. Here the
//! STOP code is recorded for the debugger, logged, and the thread panics,
//! which the kernel's panic handler turns into a halt.
//!
//! # Windows Equivalent
//! This implements the driver-facing half of NT's bugcheck.c.

use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

/// Number of bug checks raised so far
static BUGCHECK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Parameters of the most recent bug check, kept for the debugger
static LAST_BUGCHECK: Mutex<Option<BugCheckData>> = Mutex::new(None);

/// Bug check information structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct BugCheckData {
    /// The bug check code
    pub code: u32,
    /// First parameter
    pub parameter1: u64,
    /// Second parameter
    pub parameter2: u64,
    /// Third parameter
    pub parameter3: u64,
    /// Fourth parameter
    pub parameter4: u64,
}

// ============================================================================
// Bug Check Codes (STOP Codes)
// ============================================================================

pub mod codes {
    //! Bug check codes used by the executive and the FAT driver

    /// SPIN_LOCK_ALREADY_OWNED (0x0F)
    /// Attempt to acquire spinlock already owned
    pub const SPIN_LOCK_ALREADY_OWNED: u32 = 0x0000000F;

    /// FAT_FILE_SYSTEM (0x23)
    /// FAT file system error
    /// Parameter1: Source file id and line
    /// Parameter2..4: Driver specific
    pub const FAT_FILE_SYSTEM: u32 = 0x00000023;

    /// PHASE1_INITIALIZATION_FAILED (0x32)
    /// Kernel service used before the host finished bring-up
    pub const PHASE1_INITIALIZATION_FAILED: u32 = 0x00000032;

    /// INVALID_WORK_QUEUE_ITEM (0x96)
    /// Work item queued in an invalid state
    pub const INVALID_WORK_QUEUE_ITEM: u32 = 0x00000096;

    /// RESOURCE_NOT_OWNED (0xE3)
    /// Thread released a resource it does not own
    pub const RESOURCE_NOT_OWNED: u32 = 0x000000E3;
}

/// Get the human-readable name for a bug check code
pub fn bugcheck_code_name(code: u32) -> &'static str {
    match code {
        codes::SPIN_LOCK_ALREADY_OWNED => "SPIN_LOCK_ALREADY_OWNED",
        codes::FAT_FILE_SYSTEM => "FAT_FILE_SYSTEM",
        codes::PHASE1_INITIALIZATION_FAILED => "PHASE1_INITIALIZATION_FAILED",
        codes::INVALID_WORK_QUEUE_ITEM => "INVALID_WORK_QUEUE_ITEM",
        codes::RESOURCE_NOT_OWNED => "RESOURCE_NOT_OWNED",
        _ => "UNKNOWN_BUGCHECK",
    }
}

/// Get the parameters of the most recent bug check
pub fn ke_last_bugcheck() -> Option<BugCheckData> {
    *LAST_BUGCHECK.lock()
}

/// Get the number of bug checks raised
pub fn ke_bugcheck_count() -> u32 {
    BUGCHECK_COUNT.load(Ordering::Relaxed)
}

/// Crash with a bug check code and parameters
///
/// # Never Returns
/// Panics after recording and logging the STOP code.
#[cold]
pub fn ke_bug_check_ex(code: u32, p1: u64, p2: u64, p3: u64, p4: u64) -> ! {
    BUGCHECK_COUNT.fetch_add(1, Ordering::SeqCst);

    let data = BugCheckData {
        code,
        parameter1: p1,
        parameter2: p2,
        parameter3: p3,
        parameter4: p4,
    };
    *LAST_BUGCHECK.lock() = Some(data);

    log::error!(
        "[KE] *** STOP: 0x{:08X} (0x{:016X}, 0x{:016X}, 0x{:016X}, 0x{:016X}) {}",
        code,
        p1,
        p2,
        p3,
        p4,
        bugcheck_code_name(code)
    );

    panic!(
        "*** STOP: 0x{:08X} ({}) 0x{:X} 0x{:X} 0x{:X} 0x{:X}",
        code,
        bugcheck_code_name(code),
        p1,
        p2,
        p3,
        p4
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "FAT_FILE_SYSTEM")]
    fn test_bug_check_panics_with_code_name() {
        ke_bug_check_ex(codes::FAT_FILE_SYSTEM, 1, 2, 3, 4);
    }

    #[test]
    fn test_bug_check_is_recorded() {
        let result = std::panic::catch_unwind(|| {
            ke_bug_check_ex(codes::RESOURCE_NOT_OWNED, 7, 0, 0, 0)
        });
        assert!(result.is_err());
        assert!(ke_bugcheck_count() >= 1);
        assert_eq!(bugcheck_code_name(codes::RESOURCE_NOT_OWNED), "RESOURCE_NOT_OWNED");
    }
}

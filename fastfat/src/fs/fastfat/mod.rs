//! FAT File System Driver: Close Path
//!
//! Closing a file object is the last thing that happens to it, and the
//! caller has already moved on. The driver therefore never fails a close
//! and tries hard not to block one:
//!
//! ```text
//!   IRP_MJ_CLOSE ──► fsd_close ──► common_close (no wait) ──► done
//!                        │               │
//!                        │ delay-close   │ volume busy
//!                        ▼               ▼
//!                    queue_close ◄───────┘
//!                        │ async close, or delayed queue past the mark
//!                        ▼
//!                  close worker (fsp_close) ──► common_close (wait)
//! ```
//!
//! - [`FatData`] is the driver-wide close subsystem: queues, lookaside
//!   lists, tuning, the worker scheduler and the cache manager
//! - [`Vcb`] / [`Fcb`] / [`Ccb`] are the in-memory volume, file and handle
//!   records the close path tears down
//! - Delayed closes are held back so a file that is reopened soon keeps its
//!   in-memory records; async closes run as soon as the worker gets to them
//!
//! Broken structural invariants bug check the system with
//! `FAT_FILE_SYSTEM`, tagging the source module and line.

/// Bug check with FAT_FILE_SYSTEM; the caller's module defines
/// `BUG_CHECK_FILE_ID`
macro_rules! fat_bug_check {
    ($p1:expr, $p2:expr, $p3:expr) => {
        $crate::ke::bugcheck::ke_bug_check_ex(
            $crate::ke::bugcheck::codes::FAT_FILE_SYSTEM,
            (u64::from(BUG_CHECK_FILE_ID) << 16) | u64::from(line!()),
            $p1 as u64,
            $p2 as u64,
            $p3 as u64,
        )
    };
}

pub mod close;
pub mod close_context;
pub mod config;
pub mod data;
pub mod error;
pub mod fcb;
pub mod node;
pub mod open;
pub mod queue;
pub mod shutdown;
pub mod vcb;

#[cfg(test)]
mod testing;

pub use close_context::{CloseContext, CloseRecord};
pub use config::{CloseConfig, SystemSize, FAT_CLOSE_YIELD_INTERVAL, FAT_MAX_DELAYED_CLOSES};
pub use data::{CloseStatistics, FatData};
pub use error::FatError;
pub use fcb::{Ccb, Fcb, FcbTable};
pub use node::{CcbFlags, FcbId, FcbState, NodeType, TypeOfOpen, VcbCondition, VcbId, VcbState};
pub use open::OpenOptions;
pub use queue::{CloseClass, CloseQueues};
pub use vcb::{Vcb, VcbInner};

//! Kernel (ke)
//!
//! The kernel layer this library needs from its host:
//!
//! - **Spinlocks**: Short-hold mutual exclusion, never held across a wait
//! - **Thread identity**: Who is running, for owner tracking
//! - **Bug check**: Fatal stop on broken structural invariants
//!
//! # IRQL
//!
//! NT raises IRQL to DISPATCH_LEVEL while a spinlock is held. The
//! equivalent rule here is the spinlock contract: a holder never blocks,
//! and the FAT driver asserts it before every blocking volume acquisition.

pub mod bugcheck;
pub mod spinlock;
pub mod thread;

// Re-export key types
pub use bugcheck::{codes, ke_bug_check_ex, BugCheckData};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use thread::{ke_get_current_thread_id, ke_register_thread_id_source, yield_processor};

//! Executive (ex)
//!
//! The executive services the FAT close path is built on:
//!
//! - **ERESOURCE**: Reader-writer locks with recursive exclusive ownership
//! - **Lookaside Lists**: Fixed-type allocation with accounting
//! - **Worker Threads**: Deferred work execution
//!
//! # Key Structures
//!
//! - `ERESOURCE`: Reader-writer lock (`EResource`)
//! - `LOOKASIDE_LIST_EX`: Fixed-size allocator (`LookasideList`)
//! - `WORK_QUEUE_ITEM`: Deferred routine (`WorkQueueItem`)

pub mod lookaside;
pub mod resource;
pub mod worker;

// Re-exports for convenience
pub use lookaside::*;
pub use resource::*;
pub use worker::*;

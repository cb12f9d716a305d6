//! Nostalgia OS FAT Close Path
//!
//! The close side of the FAT file system driver, with the slices of the NT
//! kernel, executive, I/O and cache managers it runs on.
//!
//! # Subsystems
//!
//! - **ke** - Kernel: spinlocks, thread identity, bug check
//! - **ex** - Executive: resources, worker queues, lookaside lists
//! - **io** - I/O Manager: close IRPs, file objects, completion, top-level tracking
//! - **cc** - Cache Manager: cache map lifetime, stream file objects
//! - **fs** - File System: FAT close path (delayed/async close queues,
//!   close worker, teardown state machine)
//!
//! # Bring-up
//!
//! The host registers a thread-id source with
//! [`ke::ke_register_thread_id_source`], creates a work scheduler and a cache
//! manager, and hands both to [`fs::fastfat::FatData::new`].

#![cfg_attr(not(test), no_std)]
// Kernel-specific lint configurations:
// - new_without_default: Kernel structs often have specific initialization requirements
// - collapsible_if: Nested conditions mirror the NT control flow they follow
// - doc_lazy_continuation: Doc lists wrap the way the kernel's do
#![allow(clippy::new_without_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::doc_lazy_continuation)]

extern crate alloc;

pub mod cc;
pub mod ex;
pub mod fs;
pub mod io;
pub mod ke;

//! I/O Manager (io)
//!
//! The slice of the I/O manager a file system driver's close path talks to:
//!
//! - **IRPs**: close requests and their status blocks
//! - **File Objects**: the decoded open being closed
//! - **Completion**: IoCompleteRequest
//! - **Top-level tracking**: which request owns the current thread
//! - **Status codes**: NTSTATUS values
//!
//! # Close Flow
//!
//! 1. Last reference to a file object goes away
//! 2. I/O manager builds an IRP_MJ_CLOSE request
//! 3. Request dispatched to the file system's close entry point
//! 4. Driver completes the request, immediately or after posting the work

pub mod complete;
pub mod file;
pub mod irp;
pub mod status;
pub mod top_level;

pub use complete::{io_complete_request, io_completed_request_count};
pub use file::{file_flags, FileObject};
pub use irp::{DeviceTarget, IoStatusBlock, Irp, IrpFlags};
pub use status::*;
pub use top_level::{io_claim_top_level, io_get_top_level_irp, io_set_top_level_irp, TopLevelIrp};

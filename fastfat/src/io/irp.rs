//! I/O Request Packet (IRP) Implementation
//!
//! IRPs carry one I/O operation from the I/O manager to a driver and back.
//! The FAT close path only ever sees IRP_MJ_CLOSE, so the packet here is the
//! close-shaped slice of the NT structure: the target device, the file
//! object being closed, the status block, and the completion flags.
//!
//! # IRP Flow
//! 1. Built by the I/O manager when the last reference to a file object goes
//! 2. Dispatched to the driver's close entry point
//! 3. Completed exactly once with `io_complete_request`

use core::sync::atomic::{AtomicU64, Ordering};

use super::file::FileObject;
use super::status::NtStatus;

/// Source of request ids
static NEXT_IRP_ID: AtomicU64 = AtomicU64::new(1);

bitflags::bitflags! {
    /// IRP flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrpFlags: u32 {
        /// Request has been completed
        const COMPLETED = 0x0001;
        /// Caller waits for the request on its own thread
        const SYNCHRONOUS_API = 0x0002;
        /// Request was generated by the file system itself
        const FS_GENERATED = 0x0004;
    }
}

/// Device object a request is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTarget {
    /// The file system's own control device
    FileSystemDevice,
    /// A mounted volume's device
    VolumeDevice,
}

/// I/O Status Block - result of an I/O operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStatusBlock {
    /// Status code (NTSTATUS)
    pub status: NtStatus,
    /// Information (bytes transferred, etc.)
    pub information: usize,
}

/// I/O Request Packet
#[derive(Debug)]
pub struct Irp {
    /// Request id, used as the top-level marker
    id: u64,
    /// Device the request was sent to
    pub target: DeviceTarget,
    /// File object being closed (taken by the driver)
    pub file_object: Option<FileObject>,
    /// I/O status block
    pub io_status: IoStatusBlock,
    /// IRP flags
    pub flags: IrpFlags,
}

impl Irp {
    /// Build a close request for a file object on its volume device
    pub fn close(file_object: FileObject) -> Self {
        Self {
            id: NEXT_IRP_ID.fetch_add(1, Ordering::Relaxed),
            target: DeviceTarget::VolumeDevice,
            file_object: Some(file_object),
            io_status: IoStatusBlock::default(),
            flags: IrpFlags::SYNCHRONOUS_API,
        }
    }

    /// Build a close request sent to the file system device itself
    pub fn close_file_system_device() -> Self {
        Self {
            id: NEXT_IRP_ID.fetch_add(1, Ordering::Relaxed),
            target: DeviceTarget::FileSystemDevice,
            file_object: None,
            io_status: IoStatusBlock::default(),
            flags: IrpFlags::SYNCHRONOUS_API,
        }
    }

    /// Request id
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Has the request been completed
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.flags.contains(IrpFlags::COMPLETED)
    }
}

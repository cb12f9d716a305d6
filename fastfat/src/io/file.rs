//! File Object Implementation
//!
//! A file object is one open instance of a file, directory, volume or
//! internal stream. For the FAT driver it carries the decoded open: what
//! kind of open it is, the volume, the in-memory record (FCB/DCB) and the
//! per-handle context (CCB).
//!
//! # File Object vs Handle
//! By the time a close reaches the driver every handle to the file object
//! is gone; the file object is handed over by value and never comes back.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::fs::fastfat::{Ccb, FcbId, TypeOfOpen, Vcb};

/// File flags
pub mod file_flags {
    /// Stream file created by the file system for its own use
    pub const FO_STREAM_FILE: u32 = 0x00000100;
    /// Cleanup complete
    pub const FO_CLEANUP_COMPLETE: u32 = 0x00004000;
    /// Volume open
    pub const FO_VOLUME_OPEN: u32 = 0x00400000;
}

/// File Object
pub struct FileObject {
    /// Decoded type of open
    pub type_of_open: TypeOfOpen,
    /// Volume the open belongs to
    pub vcb: Arc<Vcb>,
    /// File or directory record (none for volume-level opens)
    pub fcb: Option<FcbId>,
    /// Per-handle context (user opens only)
    pub ccb: Option<Box<Ccb>>,
    /// FO_* flags
    pub flags: u32,
}

impl FileObject {
    /// Create a file object for an open
    pub fn new(
        type_of_open: TypeOfOpen,
        vcb: Arc<Vcb>,
        fcb: Option<FcbId>,
        ccb: Option<Box<Ccb>>,
    ) -> Self {
        let flags = match type_of_open {
            TypeOfOpen::VirtualVolumeFile | TypeOfOpen::DirectoryFile | TypeOfOpen::EaFile => {
                file_flags::FO_STREAM_FILE
            }
            TypeOfOpen::UserVolumeOpen => file_flags::FO_VOLUME_OPEN,
            _ => 0,
        };

        Self {
            type_of_open,
            vcb,
            fcb,
            ccb,
            flags,
        }
    }

    /// Create a file object that was never opened
    pub fn unopened(vcb: Arc<Vcb>) -> Self {
        Self::new(TypeOfOpen::UnopenedFileObject, vcb, None, None)
    }

    /// Check a FO_* flag
    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Record that cleanup (last handle close) has run
    #[inline]
    pub fn set_cleanup_complete(&mut self) {
        self.flags |= file_flags::FO_CLEANUP_COMPLETE;
    }
}

impl core::fmt::Debug for FileObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileObject")
            .field("type_of_open", &self.type_of_open)
            .field("vcb", &self.vcb.id())
            .field("fcb", &self.fcb)
            .field("has_ccb", &self.ccb.is_some())
            .field("flags", &format_args!("{:#x}", self.flags))
            .finish()
    }
}

//! Node Types, Open Types and State Flags
//!
//! Shared vocabulary of the FAT driver's in-memory structures: which kind
//! of record a node is, what kind of open a file object represents, and the
//! state bits kept on volumes, FCBs and CCBs.

use core::fmt;

/// Identifier of a mounted volume (VCB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VcbId(pub u32);

impl fmt::Display for VcbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vcb#{}", self.0)
    }
}

/// Identifier of an in-memory file or directory record within its volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FcbId(pub u32);

impl fmt::Display for FcbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fcb#{}", self.0)
    }
}

/// Kind of in-memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeType {
    /// File control block
    Fcb = 0x0502,
    /// Directory control block
    Dcb = 0x0503,
    /// Root directory control block
    RootDcb = 0x0504,
}

impl NodeType {
    /// True for the root and ordinary directories
    #[inline]
    pub fn is_directory(self) -> bool {
        matches!(self, NodeType::Dcb | NodeType::RootDcb)
    }
}

/// What a file object was opened as
///
/// Decoded from the file object on every request; the close path
/// dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TypeOfOpen {
    /// File object created but never opened (stream creation in progress)
    UnopenedFileObject = 1,
    /// Direct open of the volume by a user
    UserVolumeOpen = 2,
    /// Internal stream over the whole volume
    VirtualVolumeFile = 3,
    /// Internal stream over a directory's contents
    DirectoryFile = 4,
    /// User open of a directory
    UserDirectoryOpen = 5,
    /// User open of a file
    UserFileOpen = 6,
    /// Internal stream over the extended-attribute file
    EaFile = 7,
}

impl TypeOfOpen {
    /// Opens whose close context was reserved when the stream was created
    #[inline]
    pub fn is_metadata_stream(self) -> bool {
        matches!(
            self,
            TypeOfOpen::VirtualVolumeFile | TypeOfOpen::DirectoryFile | TypeOfOpen::EaFile
        )
    }

    /// Opens made by a user on a file or directory
    #[inline]
    pub fn is_user_file_or_directory(self) -> bool {
        matches!(self, TypeOfOpen::UserFileOpen | TypeOfOpen::UserDirectoryOpen)
    }
}

/// Mount condition of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VcbCondition {
    /// Mounted and usable
    #[default]
    Good,
    /// Media removed or volume dismounted
    NotMounted,
    /// Verification failed
    Bad,
}

bitflags::bitflags! {
    /// Volume state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VcbState: u32 {
        /// A non-recursive close is running on this volume
        const CLOSE_IN_PROGRESS = 0x0000_0001;
        /// System shutdown has reached this volume
        const SHUTDOWN = 0x0000_0002;
        /// Volume descriptor is being (or has been) deleted
        const DELETE_PENDING = 0x0000_0004;
        /// Volume descriptor has been freed
        const DELETED = 0x0000_0008;
        /// EA file stream is open
        const EA_FILE_OPEN = 0x0000_0010;
    }
}

bitflags::bitflags! {
    /// FCB/DCB state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FcbState: u32 {
        /// Closes of user opens on this record should be delayed
        const DELAY_CLOSE = 0x0000_0001;
        /// A create is operating on this record
        const CREATE_IN_PROGRESS = 0x0000_0002;
        /// Record has been deleted from the volume's table
        const DELETED = 0x0000_0004;
    }
}

bitflags::bitflags! {
    /// Per-handle (CCB) flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CcbFlags: u32 {
        /// Handle was opened read-only
        const READ_ONLY = 0x0000_0001;
        /// The embedded close context is in use
        const CLOSE_CONTEXT = 0x0000_0002;
        /// A directory query template is cached
        const QUERY_TEMPLATE = 0x0000_0004;
    }
}

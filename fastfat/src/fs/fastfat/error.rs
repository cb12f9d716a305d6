//! FAT Driver Errors
//!
//! Recoverable failures. Broken invariants are not errors; they bug check.

use core::fmt;

use super::node::{FcbId, VcbId};
use crate::io::status::{
    NtStatus, STATUS_FILE_CORRUPT_ERROR, STATUS_INVALID_PARAMETER, STATUS_IO_DEVICE_ERROR,
    STATUS_NOT_A_DIRECTORY, STATUS_VOLUME_DISMOUNTED,
};

/// FAT driver error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatError {
    /// The cache manager could not tear down a stream's cache map
    CacheTeardownFailed {
        /// Volume owning the stream
        vcb: VcbId,
        /// Directory the stream belongs to
        fcb: FcbId,
    },
    /// The record is not in the volume's table
    FcbNotFound(FcbId),
    /// A child was requested under a file
    NotADirectory(FcbId),
    /// The volume is not mounted or is being torn down
    VolumeDismounted(VcbId),
    /// Bad argument from the caller
    InvalidParameter,
}

impl FatError {
    /// NTSTATUS the I/O framework reports for this error
    pub fn status(&self) -> NtStatus {
        match self {
            FatError::CacheTeardownFailed { .. } => STATUS_IO_DEVICE_ERROR,
            FatError::FcbNotFound(_) => STATUS_FILE_CORRUPT_ERROR,
            FatError::NotADirectory(_) => STATUS_NOT_A_DIRECTORY,
            FatError::VolumeDismounted(_) => STATUS_VOLUME_DISMOUNTED,
            FatError::InvalidParameter => STATUS_INVALID_PARAMETER,
        }
    }
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatError::CacheTeardownFailed { vcb, fcb } => {
                write!(f, "cache map teardown failed for {} on {}", fcb, vcb)
            }
            FatError::FcbNotFound(fcb) => write!(f, "{} not found", fcb),
            FatError::NotADirectory(fcb) => write!(f, "{} is not a directory", fcb),
            FatError::VolumeDismounted(vcb) => write!(f, "{} is not mounted", vcb),
            FatError::InvalidParameter => f.write_str("invalid parameter"),
        }
    }
}

impl core::error::Error for FatError {}

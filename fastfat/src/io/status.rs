//! NTSTATUS Codes
//!
//! The subset of NTSTATUS values the FAT close path and its I/O surface
//! produce. Severity lives in the top two bits: success codes are
//! non-negative, errors have the high bit set.

/// NTSTATUS value
pub type NtStatus = i32;

/// Operation completed
pub const STATUS_SUCCESS: NtStatus = 0x0000_0000;

/// Operation will complete later
pub const STATUS_PENDING: NtStatus = 0x0000_0103;

/// Bad argument
pub const STATUS_INVALID_PARAMETER: NtStatus = 0xC000_000Du32 as i32;

/// Device reported an error
pub const STATUS_IO_DEVICE_ERROR: NtStatus = 0xC000_0185u32 as i32;

/// Target is a file, not a directory
pub const STATUS_NOT_A_DIRECTORY: NtStatus = 0xC000_0103u32 as i32;

/// On-disk or in-memory structure is inconsistent
pub const STATUS_FILE_CORRUPT_ERROR: NtStatus = 0xC000_0102u32 as i32;

/// Volume has been dismounted
pub const STATUS_VOLUME_DISMOUNTED: NtStatus = 0xC000_026Eu32 as i32;

/// NT_SUCCESS(): success and informational codes
#[inline]
pub const fn nt_success(status: NtStatus) -> bool {
    status >= 0
}

//! IRP Completion Implementation
//!
//! When a driver finishes an IRP it calls IoCompleteRequest, which records
//! the final status in the IRP's status block and marks the packet
//! completed. A packet is completed exactly once; a second completion is
//! a driver bug and is reported and ignored.

use core::sync::atomic::{AtomicU64, Ordering};

use super::irp::{Irp, IrpFlags};
use super::status::NtStatus;

/// Statistics: requests completed
static COMPLETED_REQUESTS: AtomicU64 = AtomicU64::new(0);

/// Complete an I/O request
///
/// # Arguments
/// * `irp` - The request to complete
/// * `status` - Final status reported to the requester
pub fn io_complete_request(irp: &mut Irp, status: NtStatus) {
    // Check if already completed
    if irp.flags.contains(IrpFlags::COMPLETED) {
        log::warn!("[IO] WARNING: IRP {} already completed!", irp.id());
        return;
    }

    irp.io_status.status = status;
    irp.io_status.information = 0;
    irp.flags.insert(IrpFlags::COMPLETED);

    COMPLETED_REQUESTS.fetch_add(1, Ordering::Relaxed);
    log::trace!("[IO] IRP {} completed with status {:#x}", irp.id(), status);
}

/// Number of requests completed since boot
pub fn io_completed_request_count() -> u64 {
    COMPLETED_REQUESTS.load(Ordering::Relaxed)
}

//! Volume Control Block
//!
//! One VCB per mounted volume. The VCB resource is the long-hold volume
//! lock taken exclusively by creates, cleanups and closes; the bookkeeping
//! behind it sits in [`VcbInner`], under a short spin mutex that is never
//! held across a call out of the driver.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use super::close_context::CloseContext;
use super::fcb::FcbTable;
use super::node::{FcbId, VcbCondition, VcbId, VcbState};
use crate::ex::resource::{ex_get_exclusive_waiter_count, ex_get_shared_waiter_count, EResource};

/// Mutable volume bookkeeping
#[derive(Debug)]
pub struct VcbInner {
    /// Mount condition
    pub condition: VcbCondition,
    /// VCB_STATE_* bits
    pub state: VcbState,
    /// Opens that keep the volume alive, the virtual volume file included
    pub open_file_count: u32,
    /// Direct user opens of the volume
    pub direct_access_open_count: u32,
    /// Read-only user opens
    pub read_only_count: u32,
    /// Opens of the driver's own streams
    pub internal_open_count: u32,
    /// Internal opens that stay until the volume goes away
    pub residual_open_count: u32,
    /// File and directory records
    pub fcbs: FcbTable,
    /// Root directory record
    pub root_dcb: FcbId,
    /// Close context set aside for the virtual volume file
    pub virtual_volume_close_context: Option<Box<CloseContext>>,
    /// Close context set aside for the EA file
    pub ea_close_context: Option<Box<CloseContext>>,
}

/// Volume Control Block
pub struct Vcb {
    id: VcbId,
    label: String,
    /// Volume lock
    pub resource: EResource,
    inner: spin::Mutex<VcbInner>,
}

impl Vcb {
    /// Fresh volume with a root directory and a reserved close context for
    /// the virtual volume file, which is counted as open
    pub(crate) fn new(id: VcbId, label: &str, virtual_volume_close_context: Box<CloseContext>) -> Arc<Self> {
        let (fcbs, root_dcb) = FcbTable::with_root();

        Arc::new(Self {
            id,
            label: String::from(label),
            resource: EResource::new(),
            inner: spin::Mutex::new(VcbInner {
                condition: VcbCondition::Good,
                state: VcbState::empty(),
                open_file_count: 1,
                direct_access_open_count: 0,
                read_only_count: 0,
                internal_open_count: 1,
                residual_open_count: 0,
                fcbs,
                root_dcb,
                virtual_volume_close_context: Some(virtual_volume_close_context),
                ea_close_context: None,
            }),
        })
    }

    /// Volume id
    #[inline]
    pub fn id(&self) -> VcbId {
        self.id
    }

    /// Volume label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Lock the volume bookkeeping
    ///
    /// Never call out of the driver while the guard is alive.
    #[inline]
    pub fn lock_inner(&self) -> spin::MutexGuard<'_, VcbInner> {
        self.inner.lock()
    }

    /// Current open file count
    pub fn open_file_count(&self) -> u32 {
        self.inner.lock().open_file_count
    }

    /// Current mount condition
    pub fn condition(&self) -> VcbCondition {
        self.inner.lock().condition
    }

    /// Current state bits
    pub fn state(&self) -> VcbState {
        self.inner.lock().state
    }

    /// Root directory record
    pub fn root_dcb(&self) -> FcbId {
        self.inner.lock().root_dcb
    }

    /// Has the volume been torn down
    pub fn is_deleted(&self) -> bool {
        self.state().contains(VcbState::DELETED)
    }

    /// Can the volume go away
    ///
    /// Caller holds the volume lock exclusively, exactly once, and passes in
    /// the locked bookkeeping. Only residual internal opens may remain and
    /// nobody may be waiting for the lock. An open EA file pins the volume
    /// until its own close runs, since that close needs the reserved context.
    pub fn check_for_dismount(&self, inner: &VcbInner) -> bool {
        inner.open_file_count == 0
            && inner.internal_open_count == inner.residual_open_count
            && !inner.state.contains(VcbState::EA_FILE_OPEN)
            && self.resource.exclusive_recursion() == 1
            && ex_get_shared_waiter_count(&self.resource) == 0
            && ex_get_exclusive_waiter_count(&self.resource) == 0
    }
}

impl core::fmt::Debug for Vcb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vcb")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_volume_counts_virtual_volume_file() {
        let vcb = Vcb::new(VcbId(9), "DATA", Box::new(CloseContext::reserved()));
        let inner = vcb.lock_inner();
        assert_eq!(inner.open_file_count, 1);
        assert_eq!(inner.internal_open_count, 1);
        assert_eq!(inner.fcbs.len(), 1);
        assert!(inner.virtual_volume_close_context.is_some());
        assert_eq!(inner.condition, VcbCondition::Good);
    }

    #[test]
    fn test_check_for_dismount() {
        let vcb = Vcb::new(VcbId(10), "DATA", Box::new(CloseContext::reserved()));

        vcb.resource.acquire_exclusive(true);
        {
            let mut inner = vcb.lock_inner();
            assert!(!vcb.check_for_dismount(&inner));

            inner.open_file_count = 0;
            inner.internal_open_count = 1;
            inner.residual_open_count = 1;
            assert!(vcb.check_for_dismount(&inner));
        }

        // Recursive hold is not eligible
        vcb.resource.acquire_exclusive(true);
        assert!(!vcb.check_for_dismount(&vcb.lock_inner()));
        vcb.resource.release();
        vcb.resource.release();
    }

    #[test]
    fn test_open_ea_file_pins_volume() {
        let vcb = Vcb::new(VcbId(11), "DATA", Box::new(CloseContext::reserved()));

        vcb.resource.acquire_exclusive(true);
        {
            let mut inner = vcb.lock_inner();
            inner.open_file_count = 0;
            inner.internal_open_count = 1;
            inner.residual_open_count = 1;
            inner.state.insert(VcbState::EA_FILE_OPEN);
            assert!(!vcb.check_for_dismount(&inner));

            inner.state.remove(VcbState::EA_FILE_OPEN);
            assert!(vcb.check_for_dismount(&inner));
        }
        vcb.resource.release();
    }
}

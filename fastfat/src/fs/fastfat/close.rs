//! Close Support Routines
//!
//! IRP_MJ_CLOSE arrives when the last reference to a file object is gone.
//! [`FatData::fsd_close`] tries to finish the close on the caller's thread
//! without waiting for the volume; when that is not possible, or when the
//! file is marked for delayed close, it queues the close and completes the
//! request anyway. The close worker ([`FatData::fsp_close`]) drains the
//! queues, holding one volume across a run of closes for that volume.
//!
//! [`FatData::common_close`] does the actual teardown: it drops the open's
//! counts, deletes records that are no longer referenced walking up the
//! directory tree, and deletes the volume when its last open goes away on
//! a dismounted volume.

use alloc::boxed::Box;
use alloc::sync::Arc;

use super::close_context::{CloseContext, CloseRecord, DequeuedClose};
use super::data::{CloseStats, FatData};
use super::fcb::{Ccb, Fcb};
use super::node::{CcbFlags, FcbId, FcbState, NodeType, TypeOfOpen, VcbCondition, VcbId, VcbState};
use super::vcb::{Vcb, VcbInner};
use crate::cc::{StreamFileObject, StreamKey};
use crate::ex::resource::{ex_get_exclusive_waiter_count, ex_get_shared_waiter_count};
use crate::ex::worker::{WorkQueueItem, WorkQueueType};
use crate::io::complete::io_complete_request;
use crate::io::file::FileObject;
use crate::io::irp::{DeviceTarget, Irp};
use crate::io::status::{NtStatus, STATUS_INVALID_PARAMETER, STATUS_PENDING, STATUS_SUCCESS};
use crate::io::top_level::{io_claim_top_level, io_set_top_level_irp, TopLevelIrp};

const BUG_CHECK_FILE_ID: u32 = 0x0003;

/// Decrement an open count that must be positive
#[inline]
fn decrement(count: &mut u32, vcb: VcbId, which: u32) {
    match count.checked_sub(1) {
        Some(value) => *count = value,
        None => fat_bug_check!(vcb.0, which, 0),
    }
}

/// Finally-block of a close: runs on every exit once the volume is held
///
/// Drops the open-count bias of a top-level close, clears the recursion
/// guard, and releases the volume. If that was the volume's last open on a
/// volume that is going away and no close for it is still queued, the
/// volume is deleted after the release.
struct CloseScope<'a> {
    fat: &'a FatData,
    vcb: &'a Arc<Vcb>,
    recursive: bool,
}

impl Drop for CloseScope<'_> {
    fn drop(&mut self) {
        let queued = self.fat.volume_close_counts(self.vcb.id()) != (0, 0);
        let delete = {
            let mut inner = self.vcb.lock_inner();

            if !self.recursive {
                decrement(&mut inner.open_file_count, self.vcb.id(), 0x100);
                inner.state.remove(VcbState::CLOSE_IN_PROGRESS);
            }

            let eligible = !self.recursive
                && inner.open_file_count == 0
                && (inner.condition != VcbCondition::Good
                    || inner.state.contains(VcbState::SHUTDOWN))
                && !inner.state.contains(VcbState::DELETE_PENDING)
                && !queued
                && self.vcb.check_for_dismount(&inner);

            if eligible {
                inner.state.insert(VcbState::DELETE_PENDING);
            }
            eligible
        };

        self.vcb.resource.release();

        if delete {
            self.fat.delete_vcb(self.vcb);
        }
    }
}

impl FatData {
    /// Acquire a volume exclusively for a close
    ///
    /// The close spinlock is never held across this.
    fn acquire_exclusive_vcb(&self, vcb: &Vcb, wait: bool) -> bool {
        debug_assert!(
            !self.close_queue.is_owned_by_current_thread(),
            "close spinlock held across a volume acquisition"
        );
        vcb.resource.acquire_exclusive(wait)
    }

    /// Post a close to the worker
    ///
    /// The record goes to the tail of the delayed or async queue of its
    /// volume. The worker is scheduled, after the close spinlock is
    /// released, when this is the close that activates it.
    pub(crate) fn queue_close(&self, record: CloseRecord, delay: bool) {
        let Some(vcb) = record.vcb_id() else {
            fat_bug_check!(record.context().type_of_open as u32, 0, 0);
        };
        let max_delayed = self.max_delayed_close_count();

        let start_worker = self
            .close_queue
            .lock()
            .insert(record, vcb, delay, max_delayed);

        if delay {
            CloseStats::bump(&self.stats.delayed_posted);
        } else {
            CloseStats::bump(&self.stats.async_posted);
        }

        if start_worker {
            self.start_close_worker();
        }
    }

    fn start_close_worker(&self) {
        let Some(fat) = self.strong() else {
            return;
        };

        CloseStats::bump(&self.stats.worker_activations);
        log::debug!("[FASTFAT] Starting close worker");

        self.scheduler().queue_work_item(
            WorkQueueItem::new(move || fat.fsp_close(None)),
            WorkQueueType::CriticalWorkQueue,
        );
    }

    /// Take the next close off the queues
    ///
    /// See [`CloseQueues::remove_close`](super::queue::CloseQueues::remove_close)
    /// for the selection rules; tuning and the shutdown flag are read fresh
    /// on every call.
    pub(crate) fn remove_close(&self, vcb: Option<VcbId>, hint: Option<VcbId>) -> Option<CloseRecord> {
        let max_delayed = self.max_delayed_close_count();
        let shutdown = self.shutdown_started();

        self.close_queue
            .lock()
            .remove_close(vcb, hint, max_delayed, shutdown)
    }

    /// Run queued closes
    ///
    /// With `None` this is the close worker: it runs closes for any volume
    /// until the queues no longer need draining, holding each volume across
    /// consecutive closes for it. With a volume it synchronously runs every
    /// close queued for that volume; this is how volume teardown flushes
    /// delayed closes. An empty drain takes no locks.
    pub fn fsp_close(&self, vcb: Option<&Arc<Vcb>>) {
        let worker = vcb.is_none();
        let restrict = vcb.map(|vcb| vcb.id());

        if worker {
            io_set_top_level_irp(Some(TopLevelIrp::Fsp));
        }

        let mut current: Option<Arc<Vcb>> = None;
        let mut last: Option<VcbId> = None;
        let mut loops_with_vcb_held: u32 = 0;

        while let Some(record) = self.remove_close(restrict, last) {
            let mut close = DequeuedClose::unpack(record);

            log::trace!(
                "[FASTFAT] Worker close {:?} on {}",
                close.type_of_open,
                close.vcb.id()
            );

            if worker {
                if !self.shutdown_started() {
                    let same_volume = current
                        .as_ref()
                        .is_some_and(|held| held.id() == close.vcb.id());

                    if !same_volume {
                        loops_with_vcb_held = 0;

                        if let Some(held) = current.take() {
                            held.resource.release();
                        }

                        self.acquire_exclusive_vcb(&close.vcb, true);
                        current = Some(close.vcb.clone());
                    } else {
                        loops_with_vcb_held += 1;

                        // Let creates in if they have been waiting on us
                        if loops_with_vcb_held >= self.close_yield_interval() {
                            if let Some(held) = current.as_ref() {
                                let waiters = ex_get_shared_waiter_count(&held.resource)
                                    + ex_get_exclusive_waiter_count(&held.resource);
                                if waiters != 0 {
                                    log::debug!(
                                        "[FASTFAT] Close worker yielding {} to {} waiters",
                                        held.id(),
                                        waiters
                                    );
                                    held.resource.release();
                                    self.acquire_exclusive_vcb(held, true);
                                    CloseStats::bump(&self.stats.lock_yields);
                                }
                            }
                            loops_with_vcb_held = 0;
                        }
                    }

                    // The close may be the one that deletes the volume, and
                    // the volume must not be held when that happens
                    if current.as_ref().is_some_and(|held| held.open_file_count() <= 1) {
                        if let Some(held) = current.take() {
                            held.resource.release();
                        }
                    }
                } else if let Some(held) = current.take() {
                    held.resource.release();
                }
            }

            last = current.as_ref().map(|held| held.id());

            let status = self.common_close(
                &close.vcb,
                close.fcb,
                &mut close.ccb,
                close.type_of_open,
                true,
            );
            if status == STATUS_PENDING {
                fat_bug_check!(close.vcb.id().0, close.type_of_open as u32, 0);
            }
            CloseStats::bump(&self.stats.worker_closes);

            if let Some(block) = close.pool_block.take() {
                self.free_close_context(block);
            }
        }

        if let Some(held) = current.take() {
            held.resource.release();
        }

        if worker {
            io_set_top_level_irp(None);
        }
    }

    /// Finish a close
    ///
    /// Returns `STATUS_PENDING` when `wait` is false and either the volume
    /// is busy or a create is working on the file; otherwise the close is
    /// complete and `STATUS_SUCCESS` is returned. Teardown failures are
    /// absorbed.
    ///
    /// A close that arrives while another close is running on the same
    /// volume on this thread (a directory stream released during teardown)
    /// only drops its own counts and leaves the rest to the outer close.
    pub fn common_close(
        &self,
        vcb: &Arc<Vcb>,
        fcb: Option<FcbId>,
        ccb: &mut Option<Box<Ccb>>,
        type_of_open: TypeOfOpen,
        wait: bool,
    ) -> NtStatus {
        log::trace!(
            "[FASTFAT] CommonClose {:?} {:?} on {} (wait={})",
            type_of_open,
            fcb,
            vcb.id(),
            wait
        );

        if type_of_open == TypeOfOpen::UnopenedFileObject {
            return STATUS_SUCCESS;
        }

        if !self.acquire_exclusive_vcb(vcb, wait) {
            return STATUS_PENDING;
        }

        let recursive = {
            let mut inner = vcb.lock_inner();

            // Leave the file alone while a create is using it
            let create_in_progress = type_of_open.is_user_file_or_directory()
                && fcb
                    .and_then(|id| inner.fcbs.get(id))
                    .is_some_and(|record| record.state.contains(FcbState::CREATE_IN_PROGRESS));

            if !wait && create_in_progress {
                drop(inner);
                vcb.resource.release();
                return STATUS_PENDING;
            }

            if inner.state.contains(VcbState::CLOSE_IN_PROGRESS) {
                true
            } else {
                // Hold the volume open until the dismount check at the end
                inner.state.insert(VcbState::CLOSE_IN_PROGRESS);
                inner.open_file_count += 1;
                false
            }
        };

        let _scope = CloseScope {
            fat: self,
            vcb,
            recursive,
        };

        if recursive {
            CloseStats::bump(&self.stats.recursive_closes);
        }

        let fcb = match type_of_open {
            TypeOfOpen::UnopenedFileObject => return STATUS_SUCCESS,

            TypeOfOpen::VirtualVolumeFile => {
                let mut inner = vcb.lock_inner();
                decrement(&mut inner.internal_open_count, vcb.id(), 0x200);
                decrement(&mut inner.open_file_count, vcb.id(), 0x201);
                return STATUS_SUCCESS;
            }

            TypeOfOpen::UserVolumeOpen => {
                let read_only = self.require_ccb(vcb, ccb, type_of_open).is_read_only();
                {
                    let mut inner = vcb.lock_inner();
                    decrement(&mut inner.direct_access_open_count, vcb.id(), 0x300);
                    decrement(&mut inner.open_file_count, vcb.id(), 0x301);
                    if read_only {
                        decrement(&mut inner.read_only_count, vcb.id(), 0x302);
                    }
                }
                self.delete_ccb(ccb);
                return STATUS_SUCCESS;
            }

            TypeOfOpen::EaFile => {
                let mut inner = vcb.lock_inner();
                decrement(&mut inner.internal_open_count, vcb.id(), 0x400);
                decrement(&mut inner.residual_open_count, vcb.id(), 0x401);
                inner.state.remove(VcbState::EA_FILE_OPEN);
                return STATUS_SUCCESS;
            }

            TypeOfOpen::DirectoryFile => {
                let id = self.require_fcb(vcb, fcb, type_of_open);
                {
                    let mut inner = vcb.lock_inner();
                    let root = inner.root_dcb == id;
                    let dcb = Self::fcb_mut(&mut inner, vcb.id(), id);
                    decrement(&mut dcb.directory_file_open_count, vcb.id(), 0x500);
                    decrement(&mut inner.internal_open_count, vcb.id(), 0x501);
                    if root {
                        decrement(&mut inner.residual_open_count, vcb.id(), 0x502);
                    }
                }

                // The outer close finishes the teardown
                if recursive {
                    return STATUS_SUCCESS;
                }
                id
            }

            TypeOfOpen::UserFileOpen | TypeOfOpen::UserDirectoryOpen => {
                let id = self.require_fcb(vcb, fcb, type_of_open);
                let read_only = self.require_ccb(vcb, ccb, type_of_open).is_read_only();

                // Last user open of a leaf directory: the stream goes first,
                // which may send its own close through here
                let uninitialize = {
                    let mut inner = vcb.lock_inner();
                    let dcb = Self::fcb_mut(&mut inner, vcb.id(), id);
                    dcb.node_type == NodeType::Dcb
                        && dcb.children.is_empty()
                        && dcb.open_count == 1
                        && dcb.directory_file
                };
                if uninitialize {
                    self.uninitialize_directory_stream(vcb, id);
                }

                {
                    let mut inner = vcb.lock_inner();
                    let record = Self::fcb_mut(&mut inner, vcb.id(), id);
                    decrement(&mut record.open_count, vcb.id(), 0x600);
                    decrement(&mut inner.open_file_count, vcb.id(), 0x601);
                    if read_only {
                        decrement(&mut inner.read_only_count, vcb.id(), 0x602);
                    }
                }
                self.delete_ccb(ccb);
                id
            }
        };

        self.delete_unreferenced(vcb, fcb);
        STATUS_SUCCESS
    }

    /// Delete a record that has lost its last reference, then walk up
    /// through parent directories that are left with nothing but their
    /// own stream
    fn delete_unreferenced(&self, vcb: &Arc<Vcb>, id: FcbId) {
        let mut parent = {
            let mut inner = vcb.lock_inner();
            let record = Self::fcb_mut(&mut inner, vcb.id(), id);

            let unreferenced = match record.node_type {
                NodeType::Fcb => record.open_count == 0,
                NodeType::Dcb => {
                    record.children.is_empty()
                        && record.open_count == 0
                        && record.directory_file_open_count == 0
                }
                NodeType::RootDcb => false,
            };
            if !unreferenced {
                return;
            }

            let parent = record.parent;
            self.delete_fcb(&mut inner, vcb.id(), id);
            parent
        };

        while let Some(dcb_id) = parent {
            let uninitialize = {
                let mut inner = vcb.lock_inner();
                let dcb = Self::fcb_mut(&mut inner, vcb.id(), dcb_id);
                dcb.node_type == NodeType::Dcb
                    && dcb.children.is_empty()
                    && dcb.open_count == 0
                    && dcb.directory_file
            };
            if !uninitialize {
                break;
            }

            self.uninitialize_directory_stream(vcb, dcb_id);

            // Gone only if releasing the stream closed it
            let mut inner = vcb.lock_inner();
            let dcb = Self::fcb_mut(&mut inner, vcb.id(), dcb_id);
            if dcb.directory_file_open_count != 0 {
                break;
            }
            parent = dcb.parent;
            self.delete_fcb(&mut inner, vcb.id(), dcb_id);
        }
    }

    /// Tear down a directory's cache map and release its stream file object
    ///
    /// Releasing the stream can close it on this thread before this
    /// returns. The volume is held; its bookkeeping is not.
    fn uninitialize_directory_stream(&self, vcb: &Arc<Vcb>, id: FcbId) {
        let present = {
            let mut inner = vcb.lock_inner();
            let dcb = Self::fcb_mut(&mut inner, vcb.id(), id);
            core::mem::take(&mut dcb.directory_file)
        };
        if !present {
            return;
        }

        log::debug!("[FASTFAT] Uninitialize directory stream {} on {}", id, vcb.id());

        let key = StreamKey {
            vcb: vcb.id(),
            fcb: id,
        };
        let stream = StreamFileObject::new(
            key,
            self.weak(),
            FileObject::new(TypeOfOpen::DirectoryFile, vcb.clone(), Some(id), None),
        );

        if let Err(err) = self.cache.uninitialize_cache_map(stream) {
            log::warn!("[FASTFAT] Close continuing after teardown failure: {}", err);
            CloseStats::bump(&self.stats.interior_failures);
        }
    }

    fn delete_fcb(&self, inner: &mut VcbInner, vcb: VcbId, id: FcbId) {
        let fcb = inner.fcbs.remove(id);
        if fcb.directory_file {
            fat_bug_check!(vcb.0, id.0, fcb.directory_file_open_count);
        }
        if let Some(context) = fcb.close_context {
            self.free_close_context(context);
        }

        CloseStats::bump(&self.stats.fcb_deletes);
        log::debug!("[FASTFAT] Deleted {} ({}) on {}", id, fcb.name, vcb);
    }

    fn fcb_mut<'a>(inner: &'a mut VcbInner, vcb: VcbId, id: FcbId) -> &'a mut Fcb {
        match inner.fcbs.get_mut(id) {
            Some(fcb) => fcb,
            None => fat_bug_check!(vcb.0, id.0, 0),
        }
    }

    fn require_fcb(&self, vcb: &Vcb, fcb: Option<FcbId>, type_of_open: TypeOfOpen) -> FcbId {
        match fcb {
            Some(id) => id,
            None => fat_bug_check!(vcb.id().0, type_of_open as u32, 0),
        }
    }

    fn require_ccb<'a>(
        &self,
        vcb: &Vcb,
        ccb: &'a Option<Box<Ccb>>,
        type_of_open: TypeOfOpen,
    ) -> &'a Ccb {
        match ccb.as_deref() {
            Some(ccb) => ccb,
            None => fat_bug_check!(vcb.id().0, type_of_open as u32, 1),
        }
    }

    /// Take a metadata stream's reserved close context from its owner
    fn take_reserved_close_context(
        &self,
        vcb: &Vcb,
        fcb: Option<FcbId>,
        type_of_open: TypeOfOpen,
    ) -> Box<CloseContext> {
        let taken = {
            let mut inner = vcb.lock_inner();
            match type_of_open {
                TypeOfOpen::VirtualVolumeFile => inner.virtual_volume_close_context.take(),
                TypeOfOpen::EaFile => inner.ea_close_context.take(),
                TypeOfOpen::DirectoryFile => fcb
                    .and_then(|id| inner.fcbs.get_mut(id))
                    .and_then(|dcb| dcb.close_context.take()),
                _ => None,
            }
        };

        match taken {
            Some(context) => context,
            None => fat_bug_check!(vcb.id().0, type_of_open as u32, fcb.map_or(0, |id| id.0)),
        }
    }

    /// IRP_MJ_CLOSE entry point
    ///
    /// The request is always completed with success before returning. The
    /// close itself finishes here when it can do so without waiting, and is
    /// queued for the worker otherwise, or when the file wants its close
    /// delayed.
    pub fn fsd_close(&self, irp: &mut Irp) -> NtStatus {
        // Closing the file system device itself
        if irp.target == DeviceTarget::FileSystemDevice {
            io_complete_request(irp, STATUS_SUCCESS);
            return STATUS_SUCCESS;
        }

        let Some(file_object) = irp.file_object.take() else {
            log::warn!("[FASTFAT] Close request {} without a file object", irp.id());
            io_complete_request(irp, STATUS_INVALID_PARAMETER);
            return STATUS_INVALID_PARAMETER;
        };

        let top_level = io_claim_top_level(irp.id());

        let FileObject {
            type_of_open,
            vcb,
            fcb,
            mut ccb,
            ..
        } = file_object;

        // Metadata streams carry a close context set aside when they were
        // created; detach it from its owner before anything can free it
        let reserved = type_of_open
            .is_metadata_stream()
            .then(|| self.take_reserved_close_context(&vcb, fcb, type_of_open));

        let delay = type_of_open.is_user_file_or_directory()
            && !self.shutdown_started()
            && fcb.is_some_and(|id| {
                vcb.lock_inner()
                    .fcbs
                    .get(id)
                    .is_some_and(|record| record.state.contains(FcbState::DELAY_CLOSE))
            });

        let status = if delay {
            STATUS_PENDING
        } else {
            self.common_close(&vcb, fcb, &mut ccb, type_of_open, false)
        };

        if status == STATUS_PENDING {
            let record = match reserved {
                Some(mut context) => {
                    context.vcb = Some(vcb.clone());
                    context.fcb = fcb;
                    context.type_of_open = type_of_open;
                    context.free = true;
                    CloseRecord::Pool(context)
                }
                None => {
                    let Some(mut handle) = ccb.take() else {
                        fat_bug_check!(vcb.id().0, type_of_open as u32, 2);
                    };

                    // The query template is not needed past this point
                    handle.query_template = None;
                    handle.flags.remove(CcbFlags::QUERY_TEMPLATE);
                    handle.flags.insert(CcbFlags::CLOSE_CONTEXT);
                    handle.close_context = Some(CloseContext {
                        vcb: Some(vcb.clone()),
                        fcb,
                        type_of_open,
                        free: false,
                    });
                    CloseRecord::Embedded(handle)
                }
            };

            log::debug!(
                "[FASTFAT] Posting {} close of {:?} on {}",
                if delay { "delayed" } else { "async" },
                type_of_open,
                vcb.id()
            );
            self.queue_close(record, delay);
        } else {
            if let Some(context) = reserved {
                self.free_close_context(context);
            }
            CloseStats::bump(&self.stats.sync_completed);
        }

        if top_level {
            io_set_top_level_irp(None);
        }

        io_complete_request(irp, STATUS_SUCCESS);
        STATUS_SUCCESS
    }
}

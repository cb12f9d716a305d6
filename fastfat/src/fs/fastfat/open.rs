//! Opens and Record Creation
//!
//! The create side of the driver, cut down to what produces the state the
//! close path consumes: records in the volume's table, user handles with
//! their CCBs, and the driver's own metadata streams with their reserved
//! close contexts. Everything here runs with the volume held exclusively,
//! as creates do.

use alloc::sync::Arc;

use super::data::FatData;
use super::error::FatError;
use super::fcb::Ccb;
use super::node::{FcbId, FcbState, NodeType, TypeOfOpen, VcbCondition, VcbState};
use super::vcb::{Vcb, VcbInner};
use crate::cc::StreamKey;
use crate::ex::resource::EResourceExclusiveGuard;
use crate::io::file::FileObject;

/// How a user handle is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Read-only handle
    pub read_only: bool,
    /// Delay the close of this file so a quick reopen finds it in memory
    pub delay_close: bool,
}

impl OpenOptions {
    /// Read-only handle
    pub const fn read_only() -> Self {
        Self {
            read_only: true,
            delay_close: false,
        }
    }

    /// Handle whose close is delayed
    pub const fn delay_close() -> Self {
        Self {
            read_only: false,
            delay_close: true,
        }
    }
}

impl FatData {
    /// Mount a volume
    ///
    /// Returns the volume and its virtual volume file, which keeps the
    /// volume open until it is closed.
    pub fn mount_volume(&self, label: &str) -> (Arc<Vcb>, FileObject) {
        let vcb = self.register_volume(label);
        log::info!("[FASTFAT] Mounted volume {} ({})", vcb.id(), label);

        let virtual_volume_file = FileObject::new(TypeOfOpen::VirtualVolumeFile, vcb.clone(), None, None);
        (vcb, virtual_volume_file)
    }

    /// Create a directory record under `parent`
    pub fn create_dcb(&self, vcb: &Arc<Vcb>, parent: FcbId, name: &str) -> Result<FcbId, FatError> {
        self.create_record(vcb, parent, name, NodeType::Dcb)
    }

    /// Create a file record under `parent`
    pub fn create_fcb(&self, vcb: &Arc<Vcb>, parent: FcbId, name: &str) -> Result<FcbId, FatError> {
        self.create_record(vcb, parent, name, NodeType::Fcb)
    }

    fn create_record(
        &self,
        vcb: &Arc<Vcb>,
        parent: FcbId,
        name: &str,
        node_type: NodeType,
    ) -> Result<FcbId, FatError> {
        let _guard = EResourceExclusiveGuard::new(&vcb.resource);

        let (id, new_stream) = {
            let mut inner = vcb.lock_inner();
            check_mounted(vcb, &inner)?;

            // Looking up the name reads the parent through its stream
            let new_stream = self.reference_directory_stream(vcb, &mut inner, parent)?;
            let id = inner.fcbs.insert(node_type, parent, name);
            (id, new_stream)
        };

        if let Some(key) = new_stream {
            self.cache.initialize_cache_map(key);
        }

        log::trace!("[FASTFAT] Created {} {} under {} on {}", id, name, parent, vcb.id());
        Ok(id)
    }

    /// Make sure a directory has its stream file object
    pub fn open_directory_stream(&self, vcb: &Arc<Vcb>, dcb: FcbId) -> Result<(), FatError> {
        let _guard = EResourceExclusiveGuard::new(&vcb.resource);

        let new_stream = {
            let mut inner = vcb.lock_inner();
            check_mounted(vcb, &inner)?;
            self.reference_directory_stream(vcb, &mut inner, dcb)?
        };

        if let Some(key) = new_stream {
            self.cache.initialize_cache_map(key);
        }
        Ok(())
    }

    /// Create the directory's stream if it has none, returning the stream
    /// to start caching
    fn reference_directory_stream(
        &self,
        vcb: &Vcb,
        inner: &mut VcbInner,
        dcb: FcbId,
    ) -> Result<Option<StreamKey>, FatError> {
        let root = inner.root_dcb == dcb;
        let record = inner.fcbs.get_mut(dcb).ok_or(FatError::FcbNotFound(dcb))?;
        if !record.is_directory() {
            return Err(FatError::NotADirectory(dcb));
        }
        if record.directory_file {
            return Ok(None);
        }

        record.directory_file = true;
        record.directory_file_open_count += 1;
        record.close_context = Some(self.allocate_close_context());

        inner.internal_open_count += 1;
        if root {
            inner.residual_open_count += 1;
        }

        Ok(Some(StreamKey {
            vcb: vcb.id(),
            fcb: dcb,
        }))
    }

    /// Open a file for a user
    pub fn open_file(&self, vcb: &Arc<Vcb>, fcb: FcbId, options: OpenOptions) -> Result<FileObject, FatError> {
        self.open_user(vcb, fcb, options, TypeOfOpen::UserFileOpen)
    }

    /// Open a directory for a user
    pub fn open_directory(&self, vcb: &Arc<Vcb>, dcb: FcbId, options: OpenOptions) -> Result<FileObject, FatError> {
        self.open_user(vcb, dcb, options, TypeOfOpen::UserDirectoryOpen)
    }

    fn open_user(
        &self,
        vcb: &Arc<Vcb>,
        id: FcbId,
        options: OpenOptions,
        type_of_open: TypeOfOpen,
    ) -> Result<FileObject, FatError> {
        let _guard = EResourceExclusiveGuard::new(&vcb.resource);

        {
            let mut inner = vcb.lock_inner();
            check_mounted(vcb, &inner)?;

            let record = inner.fcbs.get_mut(id).ok_or(FatError::FcbNotFound(id))?;
            match type_of_open {
                TypeOfOpen::UserDirectoryOpen if !record.is_directory() => {
                    return Err(FatError::NotADirectory(id));
                }
                TypeOfOpen::UserFileOpen if record.is_directory() => {
                    return Err(FatError::InvalidParameter);
                }
                _ => {}
            }

            record.open_count += 1;
            if options.delay_close {
                record.state.insert(FcbState::DELAY_CLOSE);
            }

            inner.open_file_count += 1;
            if options.read_only {
                inner.read_only_count += 1;
            }
        }

        let ccb = self.ccb_pool.allocate(Ccb::new(options.read_only));
        Ok(FileObject::new(type_of_open, vcb.clone(), Some(id), Some(ccb)))
    }

    /// Open the volume itself for direct access
    pub fn open_volume(&self, vcb: &Arc<Vcb>, read_only: bool) -> Result<FileObject, FatError> {
        let _guard = EResourceExclusiveGuard::new(&vcb.resource);

        {
            let mut inner = vcb.lock_inner();
            check_mounted(vcb, &inner)?;

            inner.direct_access_open_count += 1;
            inner.open_file_count += 1;
            if read_only {
                inner.read_only_count += 1;
            }
        }

        let ccb = self.ccb_pool.allocate(Ccb::new(read_only));
        Ok(FileObject::new(TypeOfOpen::UserVolumeOpen, vcb.clone(), None, Some(ccb)))
    }

    /// Open the volume's extended-attribute file stream
    pub fn open_ea_file(&self, vcb: &Arc<Vcb>) -> Result<FileObject, FatError> {
        let _guard = EResourceExclusiveGuard::new(&vcb.resource);

        {
            let mut inner = vcb.lock_inner();
            check_mounted(vcb, &inner)?;
            if inner.state.contains(VcbState::EA_FILE_OPEN) {
                return Err(FatError::InvalidParameter);
            }

            inner.state.insert(VcbState::EA_FILE_OPEN);
            inner.internal_open_count += 1;
            inner.residual_open_count += 1;
            inner.ea_close_context = Some(self.allocate_close_context());
        }

        Ok(FileObject::new(TypeOfOpen::EaFile, vcb.clone(), None, None))
    }

    /// Change a volume's mount condition
    pub fn set_volume_condition(&self, vcb: &Arc<Vcb>, condition: VcbCondition) {
        let _guard = EResourceExclusiveGuard::new(&vcb.resource);
        vcb.lock_inner().condition = condition;
        log::info!("[FASTFAT] Volume {} condition {:?}", vcb.id(), condition);
    }

    /// Mark a record as being worked on by a create
    pub fn set_create_in_progress(&self, vcb: &Arc<Vcb>, fcb: FcbId, in_progress: bool) -> Result<(), FatError> {
        let _guard = EResourceExclusiveGuard::new(&vcb.resource);

        let mut inner = vcb.lock_inner();
        let record = inner.fcbs.get_mut(fcb).ok_or(FatError::FcbNotFound(fcb))?;
        record.state.set(FcbState::CREATE_IN_PROGRESS, in_progress);
        Ok(())
    }
}

/// Opens are refused once a volume is not mounted or is going away
fn check_mounted(vcb: &Vcb, inner: &VcbInner) -> Result<(), FatError> {
    if inner.condition != VcbCondition::Good
        || inner
            .state
            .intersects(VcbState::DELETE_PENDING | VcbState::DELETED | VcbState::SHUTDOWN)
    {
        return Err(FatError::VolumeDismounted(vcb.id()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fastfat::testing::setup;

    #[test]
    fn test_directory_stream_opened_once() {
        let (fat, _queue, cache) = setup();
        let (vcb, _vvf) = fat.mount_volume("C");
        let root = vcb.root_dcb();

        fat.create_fcb(&vcb, root, "ONE").unwrap();
        fat.create_fcb(&vcb, root, "TWO").unwrap();
        fat.open_directory_stream(&vcb, root).unwrap();

        let inner = vcb.lock_inner();
        assert_eq!(inner.fcbs.get(root).map(|dcb| dcb.directory_file_open_count), Some(1));
        assert_eq!(inner.internal_open_count, 2);
        assert_eq!(inner.residual_open_count, 1);
        drop(inner);

        assert_eq!(cache.stats().initialized, 1);
        assert_eq!(fat.close_context_pool_stats().allocates, 2);
        assert!(!vcb.resource.is_acquired());
    }

    #[test]
    fn test_open_kind_mismatch() {
        let (fat, _queue, _cache) = setup();
        let (vcb, _vvf) = fat.mount_volume("C");
        let root = vcb.root_dcb();
        let file = fat.create_fcb(&vcb, root, "FILE").unwrap();

        assert_eq!(
            fat.open_directory(&vcb, file, OpenOptions::default()).err(),
            Some(FatError::NotADirectory(file))
        );
        assert_eq!(
            fat.open_file(&vcb, root, OpenOptions::default()).err(),
            Some(FatError::InvalidParameter)
        );
        assert_eq!(fat.create_fcb(&vcb, file, "CHILD"), Err(FatError::NotADirectory(file)));
        assert_eq!(vcb.open_file_count(), 1);
    }

    #[test]
    fn test_ea_file_opened_once() {
        let (fat, _queue, _cache) = setup();
        let (vcb, _vvf) = fat.mount_volume("C");

        let _ea = fat.open_ea_file(&vcb).unwrap();
        assert!(vcb.state().contains(VcbState::EA_FILE_OPEN));
        assert_eq!(fat.open_ea_file(&vcb).err(), Some(FatError::InvalidParameter));
    }

    #[test]
    fn test_dismounted_volume_refuses_opens() {
        let (fat, _queue, _cache) = setup();
        let (vcb, _vvf) = fat.mount_volume("A");
        fat.set_volume_condition(&vcb, VcbCondition::NotMounted);

        assert_eq!(
            fat.create_fcb(&vcb, vcb.root_dcb(), "X"),
            Err(FatError::VolumeDismounted(vcb.id()))
        );
        assert_eq!(fat.open_volume(&vcb, false).err(), Some(FatError::VolumeDismounted(vcb.id())));
    }
}

//! Test doubles for the close path

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use super::config::{CloseConfig, SystemSize};
use super::data::FatData;
use super::error::FatError;
use super::node::{FcbId, VcbState};
use super::vcb::Vcb;
use crate::cc::{CacheManager, CacheMaps, StreamFileObject, StreamKey};
use crate::ex::worker::{WorkQueue, WorkQueueItem, WorkQueueType, WorkScheduler};
use crate::io::file::FileObject;
use crate::io::irp::Irp;
use crate::io::status::STATUS_SUCCESS;

/// Scheduler that counts work items and throws them away
#[derive(Default)]
pub struct DiscardingScheduler {
    pub queued: AtomicU64,
}

impl WorkScheduler for DiscardingScheduler {
    fn queue_work_item(&self, item: WorkQueueItem, _queue_type: WorkQueueType) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        drop(item);
    }
}

/// What a cache teardown saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownObservation {
    pub key: StreamKey,
    /// Volume lock held by anyone when the cache map went away
    pub vcb_locked: bool,
    /// A non-recursive close was running on the volume
    pub close_in_progress: bool,
    /// Stream opens of the directory before the stream was released
    pub opens_before: Option<u32>,
    /// Stream opens of the directory after the stream was released
    pub opens_after: Option<u32>,
}

/// Cache manager that records the volume state around each teardown
pub struct ObservingCache {
    pub maps: CacheMaps,
    pub volume: spin::Mutex<Option<Arc<Vcb>>>,
    pub observations: spin::Mutex<Vec<TeardownObservation>>,
    /// Report a teardown failure (after releasing the stream)
    pub fail: bool,
}

impl ObservingCache {
    pub fn new(fail: bool) -> Self {
        Self {
            maps: CacheMaps::new(),
            volume: spin::Mutex::new(None),
            observations: spin::Mutex::new(Vec::new()),
            fail,
        }
    }

    pub fn watch(&self, vcb: &Arc<Vcb>) {
        *self.volume.lock() = Some(vcb.clone());
    }

    pub fn observations(&self) -> Vec<TeardownObservation> {
        self.observations.lock().clone()
    }

    fn stream_opens(vcb: &Vcb, fcb: FcbId) -> Option<u32> {
        vcb.lock_inner()
            .fcbs
            .get(fcb)
            .map(|dcb| dcb.directory_file_open_count)
    }
}

impl CacheManager for ObservingCache {
    fn initialize_cache_map(&self, stream: StreamKey) {
        self.maps.initialize_cache_map(stream);
    }

    fn uninitialize_cache_map(&self, stream: StreamFileObject) -> Result<(), FatError> {
        let key = stream.key();
        let vcb = self.volume.lock().clone();

        let (vcb_locked, close_in_progress, opens_before) = match vcb.as_ref() {
            Some(vcb) => (
                vcb.resource.is_acquired(),
                vcb.state().contains(VcbState::CLOSE_IN_PROGRESS),
                Self::stream_opens(vcb, key.fcb),
            ),
            None => (false, false, None),
        };

        let result = self.maps.uninitialize_cache_map(stream);

        let opens_after = vcb.as_ref().and_then(|vcb| Self::stream_opens(vcb, key.fcb));
        self.observations.lock().push(TeardownObservation {
            key,
            vcb_locked,
            close_in_progress,
            opens_before,
            opens_after,
        });

        if self.fail {
            return Err(FatError::CacheTeardownFailed {
                vcb: key.vcb,
                fcb: key.fcb,
            });
        }
        result
    }
}

/// Driver with polled work queues and an in-memory cache
pub fn setup() -> (Arc<FatData>, Arc<WorkQueue>, Arc<CacheMaps>) {
    let queue = Arc::new(WorkQueue::new());
    let cache = Arc::new(CacheMaps::new());
    let fat = FatData::new(
        CloseConfig::for_system_size(SystemSize::Small),
        queue.clone(),
        cache.clone(),
    );
    (fat, queue, cache)
}

/// Driver with an observing cache manager
pub fn setup_observed(fail: bool) -> (Arc<FatData>, Arc<WorkQueue>, Arc<ObservingCache>) {
    let queue = Arc::new(WorkQueue::new());
    let cache = Arc::new(ObservingCache::new(fail));
    let fat = FatData::new(
        CloseConfig::for_system_size(SystemSize::Small),
        queue.clone(),
        cache.clone(),
    );
    (fat, queue, cache)
}

/// Send a close request and check it was completed with success
pub fn close(fat: &FatData, file_object: FileObject) {
    let mut irp = Irp::close(file_object);
    assert_eq!(fat.fsd_close(&mut irp), STATUS_SUCCESS);
    assert!(irp.is_completed());
    assert_eq!(irp.io_status.status, STATUS_SUCCESS);
}

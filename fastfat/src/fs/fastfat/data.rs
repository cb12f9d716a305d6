//! Driver-Wide Close State
//!
//! [`FatData`] owns everything the close path shares across volumes: the
//! close queues and their spinlock, the close-context and CCB lookaside
//! lists, the runtime tuning, the registry of mounted volumes, and the two
//! services the driver calls out to (the system work queues and the cache
//! manager). It is created once when the driver loads and handed to every
//! close operation.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use super::close_context::CloseContext;
use super::config::CloseConfig;
use super::fcb::Ccb;
use super::node::{VcbId, VcbState};
use super::queue::{CloseClass, CloseQueues};
use super::vcb::Vcb;
use crate::cc::{CacheManager, StreamFileObject, StreamKey};
use crate::ex::lookaside::{LookasideList, LookasideStats, LOOKASIDE_DEPTH};
use crate::ex::worker::WorkScheduler;
use crate::ke::spinlock::SpinLock;

const BUG_CHECK_FILE_ID: u32 = 0x0001;

/// Close path counters
#[derive(Debug, Default)]
pub(crate) struct CloseStats {
    pub worker_activations: AtomicU64,
    pub async_posted: AtomicU64,
    pub delayed_posted: AtomicU64,
    pub sync_completed: AtomicU64,
    pub worker_closes: AtomicU64,
    pub recursive_closes: AtomicU64,
    pub interior_failures: AtomicU64,
    pub lock_yields: AtomicU64,
    pub fcb_deletes: AtomicU64,
    pub ccb_deletes: AtomicU64,
    pub vcb_deletes: AtomicU64,
}

impl CloseStats {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of the close path counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CloseStatistics {
    /// Close workers scheduled
    pub worker_activations: u64,
    /// Closes posted to the async queue
    pub async_posted: u64,
    /// Closes posted to the delayed queue
    pub delayed_posted: u64,
    /// Closes finished on the requesting thread
    pub sync_completed: u64,
    /// Closes finished from the queues
    pub worker_closes: u64,
    /// Closes that arrived while another close was running on the volume
    pub recursive_closes: u64,
    /// Teardown failures absorbed by the close path
    pub interior_failures: u64,
    /// Volume locks given up to waiters by the worker
    pub lock_yields: u64,
    /// File and directory records deleted
    pub fcb_deletes: u64,
    /// Handle contexts deleted
    pub ccb_deletes: u64,
    /// Volumes deleted
    pub vcb_deletes: u64,
}

/// FAT driver global data
pub struct FatData {
    self_ref: Weak<FatData>,

    /// Close queues, guarded by the close spinlock
    pub(crate) close_queue: SpinLock<CloseQueues>,

    /// Pool blocks for metadata stream close contexts
    pub(crate) close_context_pool: LookasideList<CloseContext>,

    /// Pool blocks for handle contexts
    pub(crate) ccb_pool: LookasideList<Ccb>,

    scheduler: Arc<dyn WorkScheduler>,
    pub(crate) cache: Arc<dyn CacheManager>,

    max_delayed_close_count: AtomicUsize,
    close_yield_interval: AtomicU32,
    shutdown_started: AtomicBool,

    volumes: spin::Mutex<Vec<Arc<Vcb>>>,
    next_vcb_id: AtomicU32,

    pub(crate) stats: CloseStats,
}

impl FatData {
    /// Initialize the driver's close state
    pub fn new(
        config: CloseConfig,
        scheduler: Arc<dyn WorkScheduler>,
        cache: Arc<dyn CacheManager>,
    ) -> Arc<Self> {
        log::debug!(
            "[FASTFAT] Close path: max delayed closes {}, yield interval {}",
            config.max_delayed_close_count,
            config.close_yield_interval
        );

        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            close_queue: SpinLock::new(CloseQueues::new()),
            close_context_pool: LookasideList::new(LOOKASIDE_DEPTH),
            ccb_pool: LookasideList::new(LOOKASIDE_DEPTH),
            scheduler,
            cache,
            max_delayed_close_count: AtomicUsize::new(config.max_delayed_close_count),
            close_yield_interval: AtomicU32::new(config.close_yield_interval),
            shutdown_started: AtomicBool::new(false),
            volumes: spin::Mutex::new(Vec::new()),
            next_vcb_id: AtomicU32::new(1),
            stats: CloseStats::default(),
        })
    }

    /// Weak reference to this instance, for objects that call back in
    #[inline]
    pub(crate) fn weak(&self) -> Weak<FatData> {
        self.self_ref.clone()
    }

    /// Strong reference to this instance, while it is alive
    #[inline]
    pub(crate) fn strong(&self) -> Option<Arc<FatData>> {
        self.self_ref.upgrade()
    }

    #[inline]
    pub(crate) fn scheduler(&self) -> &dyn WorkScheduler {
        self.scheduler.as_ref()
    }

    /// Delayed-close high-water mark
    #[inline]
    pub fn max_delayed_close_count(&self) -> usize {
        self.max_delayed_close_count.load(Ordering::Relaxed)
    }

    /// Change the delayed-close high-water mark
    pub fn set_max_delayed_close_count(&self, count: usize) {
        self.max_delayed_close_count.store(count, Ordering::Relaxed);
    }

    /// Closes the worker does under one volume acquisition before yielding
    #[inline]
    pub fn close_yield_interval(&self) -> u32 {
        self.close_yield_interval.load(Ordering::Relaxed)
    }

    /// Change the worker's yield interval
    pub fn set_close_yield_interval(&self, interval: u32) {
        self.close_yield_interval.store(interval, Ordering::Relaxed);
    }

    /// Has system shutdown begun
    #[inline]
    pub fn shutdown_started(&self) -> bool {
        self.shutdown_started.load(Ordering::Acquire)
    }

    pub(crate) fn set_shutdown_started(&self) {
        self.shutdown_started.store(true, Ordering::Release);
    }

    /// Closes queued as (async, delayed)
    pub fn close_queue_counts(&self) -> (usize, usize) {
        let queues = self.close_queue.lock();
        (queues.count(CloseClass::Async), queues.count(CloseClass::Delayed))
    }

    /// Closes queued for one volume as (async, delayed)
    pub fn volume_close_counts(&self, vcb: VcbId) -> (usize, usize) {
        let queues = self.close_queue.lock();
        (
            queues.volume_count(vcb, CloseClass::Async),
            queues.volume_count(vcb, CloseClass::Delayed),
        )
    }

    /// Is a close worker scheduled or running
    pub fn is_close_worker_active(&self) -> bool {
        self.close_queue.lock().is_worker_active()
    }

    /// Check the close queue links and counts
    pub fn check_close_queue_consistency(&self) -> bool {
        self.close_queue.lock().is_consistent()
    }

    /// Close-context lookaside statistics
    pub fn close_context_pool_stats(&self) -> LookasideStats {
        self.close_context_pool.stats()
    }

    /// CCB lookaside statistics
    pub fn ccb_pool_stats(&self) -> LookasideStats {
        self.ccb_pool.stats()
    }

    /// Snapshot of the close path counters
    pub fn statistics(&self) -> CloseStatistics {
        let s = &self.stats;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CloseStatistics {
            worker_activations: load(&s.worker_activations),
            async_posted: load(&s.async_posted),
            delayed_posted: load(&s.delayed_posted),
            sync_completed: load(&s.sync_completed),
            worker_closes: load(&s.worker_closes),
            recursive_closes: load(&s.recursive_closes),
            interior_failures: load(&s.interior_failures),
            lock_yields: load(&s.lock_yields),
            fcb_deletes: load(&s.fcb_deletes),
            ccb_deletes: load(&s.ccb_deletes),
            vcb_deletes: load(&s.vcb_deletes),
        }
    }

    /// Mounted volumes
    pub fn volumes(&self) -> Vec<Arc<Vcb>> {
        self.volumes.lock().clone()
    }

    /// Look up a mounted volume
    pub fn volume(&self, id: VcbId) -> Option<Arc<Vcb>> {
        self.volumes.lock().iter().find(|vcb| vcb.id() == id).cloned()
    }

    pub(crate) fn register_volume(&self, label: &str) -> Arc<Vcb> {
        let id = VcbId(self.next_vcb_id.fetch_add(1, Ordering::Relaxed));
        let context = self.close_context_pool.allocate(CloseContext::reserved());
        let vcb = Vcb::new(id, label, context);
        self.volumes.lock().push(vcb.clone());
        vcb
    }

    /// Reserve a pool close context for a metadata stream
    pub(crate) fn allocate_close_context(&self) -> Box<CloseContext> {
        self.close_context_pool.allocate(CloseContext::reserved())
    }

    /// Return a pool close context; it must not keep its volume alive
    pub(crate) fn free_close_context(&self, mut context: Box<CloseContext>) {
        *context = CloseContext::reserved();
        self.close_context_pool.free(context);
    }

    /// Return a handle context to the pool
    pub(crate) fn delete_ccb(&self, ccb: &mut Option<Box<Ccb>>) {
        if let Some(mut ccb) = ccb.take() {
            *ccb = Ccb::default();
            self.ccb_pool.free(ccb);
            CloseStats::bump(&self.stats.ccb_deletes);
        }
    }

    /// Free a volume whose last open has gone
    ///
    /// Called with the volume lock released. Streams still cached for the
    /// volume are dropped from the cache without sending closes, and
    /// reserved close contexts go back to the pool.
    pub(crate) fn delete_vcb(&self, vcb: &Arc<Vcb>) {
        if vcb.resource.is_acquired() || vcb.is_deleted() {
            fat_bug_check!(vcb.id().0, vcb.resource.exclusive_recursion(), vcb.state().bits());
        }

        self.volumes.lock().retain(|mounted| mounted.id() != vcb.id());

        let queued = self.close_queue.lock().remove_volume(vcb.id());
        if queued != 0 {
            fat_bug_check!(vcb.id().0, queued, 0);
        }

        let mut streams = Vec::new();
        let mut contexts = Vec::new();
        {
            let mut inner = vcb.lock_inner();
            contexts.extend(inner.virtual_volume_close_context.take());
            contexts.extend(inner.ea_close_context.take());
            for fcb in inner.fcbs.drain() {
                if fcb.directory_file {
                    streams.push(StreamKey {
                        vcb: vcb.id(),
                        fcb: fcb.id,
                    });
                }
                contexts.extend(fcb.close_context);
            }
            inner.state.remove(VcbState::DELETE_PENDING);
            inner.state.insert(VcbState::DELETED);
        }

        for key in streams {
            if let Err(err) = self.cache.uninitialize_cache_map(StreamFileObject::detached(key)) {
                log::warn!("[FASTFAT] Volume {} teardown: {}", vcb.id(), err);
                CloseStats::bump(&self.stats.interior_failures);
            }
        }
        for context in contexts {
            self.free_close_context(context);
        }

        CloseStats::bump(&self.stats.vcb_deletes);
        log::info!("[FASTFAT] Volume {} ({}) deleted", vcb.id(), vcb.label());
    }
}

impl core::fmt::Debug for FatData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FatData")
            .field("max_delayed_close_count", &self.max_delayed_close_count())
            .field("close_yield_interval", &self.close_yield_interval())
            .field("shutdown_started", &self.shutdown_started())
            .finish_non_exhaustive()
    }
}

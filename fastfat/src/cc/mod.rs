//! Cache Manager (cc)
//!
//! The cache manager caches file data for file systems. The FAT close path
//! only touches its lifetime edges:
//!
//! - **CcInitializeCacheMap**: a stream gets a cache map when the driver
//!   starts using it
//! - **CcUninitializeCacheMap**: the cache map is torn down and the
//!   cache manager lets go of the stream file object
//!
//! # Stream File Objects
//!
//! Directory contents are read through an internal stream file object.
//! Whoever holds the last reference to that file object triggers its close:
//! dropping a [`StreamFileObject`] sends an IRP_MJ_CLOSE for it back into
//! the FAT driver, on the dropping thread. A cache manager that releases the
//! stream while the driver is inside a close therefore re-enters the close
//! path.
//!
//! # NT API
//!
//! - `CcInitializeCacheMap` - [`CacheManager::initialize_cache_map`]
//! - `CcUninitializeCacheMap` - [`CacheManager::uninitialize_cache_map`]

use alloc::collections::BTreeSet;
use alloc::sync::Weak;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::fs::fastfat::{FatData, FatError, FcbId, VcbId};
use crate::io::{FileObject, Irp};
use crate::ke::spinlock::SpinLock;

/// Identity of a cached stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    /// Volume owning the stream
    pub vcb: VcbId,
    /// Directory the stream reads
    pub fcb: FcbId,
}

/// Last reference to an internal stream file object
///
/// Dropping it closes the file object through the FAT driver.
pub struct StreamFileObject {
    key: StreamKey,
    fat: Weak<FatData>,
    file_object: Option<FileObject>,
}

impl StreamFileObject {
    /// Reference to a live stream; dropping it closes the stream
    pub(crate) fn new(key: StreamKey, fat: Weak<FatData>, file_object: FileObject) -> Self {
        Self {
            key,
            fat,
            file_object: Some(file_object),
        }
    }

    /// Stream whose volume is already gone; dropping it does nothing
    pub(crate) fn detached(key: StreamKey) -> Self {
        Self {
            key,
            fat: Weak::new(),
            file_object: None,
        }
    }

    /// Stream identity
    #[inline]
    pub fn key(&self) -> StreamKey {
        self.key
    }
}

impl Drop for StreamFileObject {
    fn drop(&mut self) {
        let Some(file_object) = self.file_object.take() else {
            return;
        };
        if let Some(fat) = self.fat.upgrade() {
            let mut irp = Irp::close(file_object);
            fat.fsd_close(&mut irp);
        }
    }
}

impl core::fmt::Debug for StreamFileObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamFileObject")
            .field("key", &self.key)
            .field("live", &self.file_object.is_some())
            .finish()
    }
}

/// Cache manager as seen by a file system driver
pub trait CacheManager: Send + Sync {
    /// Start caching a stream
    fn initialize_cache_map(&self, stream: StreamKey);

    /// Stop caching a stream and release the stream file object
    ///
    /// The stream reference is consumed whether or not teardown succeeds.
    fn uninitialize_cache_map(&self, stream: StreamFileObject) -> Result<(), FatError>;
}

/// Cache statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Streams with a cache map right now
    pub active_cache_maps: usize,
    /// Cache maps ever created
    pub initialized: u64,
    /// Cache maps torn down
    pub uninitialized: u64,
}

/// In-memory cache map registry
pub struct CacheMaps {
    maps: SpinLock<BTreeSet<StreamKey>>,
    initialized: AtomicU64,
    uninitialized: AtomicU64,
}

impl CacheMaps {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            maps: SpinLock::new(BTreeSet::new()),
            initialized: AtomicU64::new(0),
            uninitialized: AtomicU64::new(0),
        }
    }

    /// Does the stream have a cache map
    pub fn is_cached(&self, stream: StreamKey) -> bool {
        self.maps.lock().contains(&stream)
    }

    /// Snapshot of the cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            active_cache_maps: self.maps.lock().len(),
            initialized: self.initialized.load(Ordering::Relaxed),
            uninitialized: self.uninitialized.load(Ordering::Relaxed),
        }
    }
}

impl Default for CacheMaps {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager for CacheMaps {
    fn initialize_cache_map(&self, stream: StreamKey) {
        if self.maps.lock().insert(stream) {
            self.initialized.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn uninitialize_cache_map(&self, stream: StreamFileObject) -> Result<(), FatError> {
        let key = stream.key();
        let removed = self.maps.lock().remove(&key);
        if removed {
            self.uninitialized.fetch_add(1, Ordering::Relaxed);
        }

        // Last reference goes after the registry lock is released
        drop(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_stream_drop_is_silent() {
        let maps = CacheMaps::new();
        let key = StreamKey {
            vcb: VcbId(1),
            fcb: FcbId(1),
        };

        maps.initialize_cache_map(key);
        assert!(maps.is_cached(key));

        assert!(maps.uninitialize_cache_map(StreamFileObject::detached(key)).is_ok());
        assert!(!maps.is_cached(key));

        let stats = maps.stats();
        assert_eq!(stats.active_cache_maps, 0);
        assert_eq!(stats.initialized, 1);
        assert_eq!(stats.uninitialized, 1);
    }
}

//! Executive Worker Thread Pool (System Work Queue)
//!
//! Lets drivers defer work to a system thread context instead of running
//! it on the requesting thread.
//!
//! # NT Semantics
//!
//! Three queues with different priorities:
//! - **CriticalWorkQueue**: Highest priority, time-critical work
//! - **DelayedWorkQueue**: Normal priority, general work
//! - **HyperCriticalWorkQueue**: Emergency work during low resources
//!
//! Drivers see the pool through [`WorkScheduler`], so the host decides
//! whether items run on dedicated threads or are polled with
//! [`WorkQueue::process_work_items`].
//!
//! # Usage
//! ```
//! use fastfat::ex::{WorkQueue, WorkQueueItem, WorkQueueType, WorkScheduler};
//! # fastfat::ke::ke_register_thread_id_source(|| 1);
//!
//! let queue = WorkQueue::new();
//! queue.queue_work_item(WorkQueueItem::new(|| { /* do work */ }), WorkQueueType::DelayedWorkQueue);
//! assert_eq!(queue.process_work_items(WorkQueueType::DelayedWorkQueue, usize::MAX), 1);
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::ke::spinlock::SpinLock;

/// Work queue types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkQueueType {
    /// Time-critical work, higher priority
    CriticalWorkQueue = 0,
    /// Normal work items
    DelayedWorkQueue = 1,
    /// Emergency work during resource exhaustion
    HyperCriticalWorkQueue = 2,
}

/// Number of work queue types
const WORK_QUEUE_COUNT: usize = 3;

/// Work queue item
///
/// Equivalent to NT's WORK_QUEUE_ITEM. The routine and its context are
/// captured together and run exactly once.
pub struct WorkQueueItem {
    routine: Box<dyn FnOnce() + Send>,
}

impl WorkQueueItem {
    /// Create a work item from a routine
    pub fn new<F>(routine: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            routine: Box::new(routine),
        }
    }

    /// Execute the work item
    fn execute(self) {
        (self.routine)();
    }
}

impl fmt::Debug for WorkQueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueueItem").finish_non_exhaustive()
    }
}

/// Service that runs deferred work on a system thread
///
/// Equivalent to ExQueueWorkItem / IoQueueWorkItem as seen by a driver.
pub trait WorkScheduler: Send + Sync {
    /// Queue a work item for execution at the given priority
    fn queue_work_item(&self, item: WorkQueueItem, queue_type: WorkQueueType);
}

/// Executive work queues, drained by polling
pub struct WorkQueue {
    /// Pending items, one list per queue type
    queues: [SpinLock<VecDeque<WorkQueueItem>>; WORK_QUEUE_COUNT],
    /// Statistics: items ever queued
    queued: AtomicU64,
    /// Statistics: items executed
    executed: AtomicU64,
}

impl WorkQueue {
    /// Create empty work queues
    pub const fn new() -> Self {
        Self {
            queues: [
                SpinLock::new(VecDeque::new()),
                SpinLock::new(VecDeque::new()),
                SpinLock::new(VecDeque::new()),
            ],
            queued: AtomicU64::new(0),
            executed: AtomicU64::new(0),
        }
    }

    /// Process pending work items on the calling thread
    ///
    /// Items queued by a running item are picked up in the same call, up to
    /// `max_items`. Returns the number of items executed.
    pub fn process_work_items(&self, queue_type: WorkQueueType, max_items: usize) -> usize {
        let mut processed = 0;

        while processed < max_items {
            // The queue lock is dropped before the routine runs
            let item = self.queues[queue_type as usize].lock().pop_front();
            match item {
                Some(item) => {
                    item.execute();
                    self.executed.fetch_add(1, Ordering::Relaxed);
                    processed += 1;
                }
                None => break,
            }
        }

        processed
    }

    /// Process items from every queue, highest priority first
    pub fn process_all(&self) -> usize {
        let mut total = 0;
        loop {
            let processed = self.process_work_items(WorkQueueType::HyperCriticalWorkQueue, usize::MAX)
                + self.process_work_items(WorkQueueType::CriticalWorkQueue, usize::MAX)
                + self.process_work_items(WorkQueueType::DelayedWorkQueue, usize::MAX);
            if processed == 0 {
                return total;
            }
            total += processed;
        }
    }

    /// Get the number of pending items in a queue
    pub fn depth(&self, queue_type: WorkQueueType) -> usize {
        self.queues[queue_type as usize].lock().len()
    }

    /// Total number of items ever queued
    pub fn queued_count(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Total number of items executed
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkScheduler for WorkQueue {
    fn queue_work_item(&self, item: WorkQueueItem, queue_type: WorkQueueType) {
        self.queues[queue_type as usize].lock().push_back(item);
        self.queued.fetch_add(1, Ordering::Relaxed);
        log::trace!("[EX] Work item queued on {:?}", queue_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_work_queue_item() {
        let called = Arc::new(AtomicUsize::new(0));
        let item = {
            let called = Arc::clone(&called);
            WorkQueueItem::new(move || {
                called.fetch_add(1, Ordering::SeqCst);
            })
        };

        item.execute();
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_fifo_and_depth() {
        let queue = WorkQueue::new();
        let order = Arc::new(SpinLock::new(Vec::new()));

        for n in 0..3 {
            let order = Arc::clone(&order);
            queue.queue_work_item(
                WorkQueueItem::new(move || order.lock().push(n)),
                WorkQueueType::CriticalWorkQueue,
            );
        }

        assert_eq!(queue.depth(WorkQueueType::CriticalWorkQueue), 3);
        assert_eq!(queue.depth(WorkQueueType::DelayedWorkQueue), 0);

        assert_eq!(queue.process_work_items(WorkQueueType::CriticalWorkQueue, 2), 2);
        assert_eq!(*order.lock(), vec![0, 1]);

        assert_eq!(queue.process_all(), 1);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(queue.queued_count(), 3);
        assert_eq!(queue.executed_count(), 3);
    }

    #[test]
    fn test_item_may_queue_more_work() {
        let queue = Arc::new(WorkQueue::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let inner_queue = Arc::clone(&queue);
        let inner_ran = Arc::clone(&ran);
        queue.queue_work_item(
            WorkQueueItem::new(move || {
                inner_ran.fetch_add(1, Ordering::SeqCst);
                let ran = Arc::clone(&inner_ran);
                inner_queue.queue_work_item(
                    WorkQueueItem::new(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                    }),
                    WorkQueueType::DelayedWorkQueue,
                );
            }),
            WorkQueueType::DelayedWorkQueue,
        );

        assert_eq!(queue.process_work_items(WorkQueueType::DelayedWorkQueue, usize::MAX), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}

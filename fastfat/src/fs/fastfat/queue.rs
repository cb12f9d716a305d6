//! Close Queues
//!
//! Posted closes wait on two queues: *async* closes, which nobody is
//! expected to reopen and should run promptly, and *delayed* closes, which
//! are held back while the file may be opened again. Every entry is linked
//! twice, into the global list of its class and into its volume's list of
//! the same class, so the worker can drain in global order or volume by
//! volume in O(1) per entry.
//!
//! Entries live in an arena; the two memberships are pairs of sibling
//! indices. The whole structure is guarded by the close spinlock held by
//! [`FatData`](super::FatData); nothing here blocks.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::close_context::CloseRecord;
use super::node::VcbId;

const BUG_CHECK_FILE_ID: u32 = 0x0005;

/// Which queue a close waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Process as soon as possible
    Async = 0,
    /// Hold back while the file may be reopened
    Delayed = 1,
}

const CLASS_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ListHead {
    head: Option<usize>,
    tail: Option<usize>,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
enum Chain {
    Global,
    Volume,
}

#[derive(Debug)]
struct CloseEntry {
    record: Option<CloseRecord>,
    vcb: VcbId,
    class: CloseClass,
    global: Links,
    volume: Links,
}

impl CloseEntry {
    #[inline]
    fn links(&mut self, chain: Chain) -> &mut Links {
        match chain {
            Chain::Global => &mut self.global,
            Chain::Volume => &mut self.volume,
        }
    }
}

fn link_tail(entries: &mut [CloseEntry], list: &mut ListHead, index: usize, chain: Chain) {
    let tail = list.tail;
    *entries[index].links(chain) = Links { prev: tail, next: None };
    match tail {
        Some(tail) => entries[tail].links(chain).next = Some(index),
        None => list.head = Some(index),
    }
    list.tail = Some(index);
    list.count += 1;
}

fn unlink(entries: &mut [CloseEntry], list: &mut ListHead, index: usize, chain: Chain) {
    let Links { prev, next } = *entries[index].links(chain);
    match prev {
        Some(prev) => entries[prev].links(chain).next = next,
        None => list.head = next,
    }
    match next {
        Some(next) => entries[next].links(chain).prev = prev,
        None => list.tail = prev,
    }
    *entries[index].links(chain) = Links::default();
    list.count -= 1;
}

/// Global and per-volume close queues
#[derive(Debug)]
pub struct CloseQueues {
    entries: Vec<CloseEntry>,
    free_entries: Vec<usize>,
    global: [ListHead; CLASS_COUNT],
    volumes: BTreeMap<VcbId, [ListHead; CLASS_COUNT]>,
    /// A worker has been scheduled and has not yet run the queues dry
    async_close_active: bool,
    high_async: bool,
    high_delayed: bool,
}

impl CloseQueues {
    /// Empty queues, no worker active
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_entries: Vec::new(),
            global: [ListHead { head: None, tail: None, count: 0 }; CLASS_COUNT],
            volumes: BTreeMap::new(),
            async_close_active: false,
            high_async: false,
            high_delayed: false,
        }
    }

    /// Append a close to the tail of its global and volume queues
    ///
    /// Returns true when the caller must start the worker: an async close
    /// with no worker active, or the delayed queue past the high-water mark
    /// with no worker active. The active flag is set here, so only one
    /// caller ever gets true until the worker runs dry.
    pub fn insert(&mut self, record: CloseRecord, vcb: VcbId, delay: bool, max_delayed: usize) -> bool {
        let class = if delay { CloseClass::Delayed } else { CloseClass::Async };

        let entry = CloseEntry {
            record: Some(record),
            vcb,
            class,
            global: Links::default(),
            volume: Links::default(),
        };
        let index = match self.free_entries.pop() {
            Some(index) => {
                self.entries[index] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };

        link_tail(&mut self.entries, &mut self.global[class as usize], index, Chain::Global);
        let heads = self.volumes.entry(vcb).or_default();
        link_tail(&mut self.entries, &mut heads[class as usize], index, Chain::Volume);

        let start_worker = match class {
            CloseClass::Delayed => self.global[class as usize].count > max_delayed,
            CloseClass::Async => true,
        } && !self.async_close_active;

        if start_worker {
            self.async_close_active = true;
        }
        start_worker
    }

    /// Pick the next close to run
    ///
    /// * `vcb` - restrict to one volume (a synchronous drain); `None` for
    ///   the worker
    /// * `hint` - volume the worker is holding, if any
    ///
    /// The worker takes async closes first and delayed closes only while
    /// the delayed queue is above half the high-water mark, or during
    /// shutdown. Once either queue passes twice the mark the worker sticks
    /// to the hinted volume until both fall back under the mark, so one
    /// volume acquisition covers as many closes as possible. A volume drain
    /// takes async then delayed closes of that volume unconditionally.
    ///
    /// When the worker finds nothing it clears the active flag.
    pub fn remove_close(
        &mut self,
        vcb: Option<VcbId>,
        hint: Option<VcbId>,
        max_delayed: usize,
        shutdown: bool,
    ) -> Option<CloseRecord> {
        let worker = vcb.is_none();
        let mut vcb = vcb;

        if worker {
            if let Some(hint) = hint {
                let async_count = self.count(CloseClass::Async);
                let delayed_count = self.count(CloseClass::Delayed);

                if !self.high_async && async_count > max_delayed * 2 {
                    self.high_async = true;
                } else if self.high_async && async_count < max_delayed {
                    self.high_async = false;
                }

                if !self.high_delayed && delayed_count > max_delayed * 2 {
                    self.high_delayed = true;
                } else if self.high_delayed && delayed_count < max_delayed {
                    self.high_delayed = false;
                }

                if self.high_async || self.high_delayed {
                    vcb = Some(hint);
                }
            }
        }

        if let Some(vcb) = vcb {
            let index = self.volumes.get(&vcb).and_then(|heads| {
                heads[CloseClass::Async as usize]
                    .head
                    .or(heads[CloseClass::Delayed as usize].head)
            });
            if let Some(index) = index {
                return Some(self.take(index));
            }

            // Volume ran dry; a worker goes on with everyone else's closes
            if !worker {
                return None;
            }
        }

        let index = self.global[CloseClass::Async as usize].head.or_else(|| {
            let delayed = &self.global[CloseClass::Delayed as usize];
            if delayed.count > max_delayed / 2 || shutdown {
                delayed.head
            } else {
                None
            }
        });

        match index {
            Some(index) => Some(self.take(index)),
            None => {
                if worker {
                    self.async_close_active = false;
                }
                None
            }
        }
    }

    /// Unlink an entry from both its queues and hand back its record
    fn take(&mut self, index: usize) -> CloseRecord {
        let (vcb, class) = {
            let entry = &self.entries[index];
            (entry.vcb, entry.class)
        };

        unlink(&mut self.entries, &mut self.global[class as usize], index, Chain::Global);
        match self.volumes.get_mut(&vcb) {
            Some(heads) => unlink(&mut self.entries, &mut heads[class as usize], index, Chain::Volume),
            None => fat_bug_check!(vcb.0, index, class as u32),
        }

        let Some(record) = self.entries[index].record.take() else {
            fat_bug_check!(vcb.0, index, 0);
        };
        self.free_entries.push(index);
        record
    }

    /// Forget a volume's queue heads, returning how many closes were still
    /// queued for it
    pub fn remove_volume(&mut self, vcb: VcbId) -> usize {
        self.volumes
            .remove(&vcb)
            .map_or(0, |heads| heads.iter().map(|head| head.count).sum())
    }

    /// Closes queued in a class
    #[inline]
    pub fn count(&self, class: CloseClass) -> usize {
        self.global[class as usize].count
    }

    /// Closes queued in a class for one volume
    pub fn volume_count(&self, vcb: VcbId, class: CloseClass) -> usize {
        self.volumes
            .get(&vcb)
            .map_or(0, |heads| heads[class as usize].count)
    }

    /// Is a worker scheduled or running
    #[inline]
    pub fn is_worker_active(&self) -> bool {
        self.async_close_active
    }

    /// Walk every list and check the links against the counts
    ///
    /// Each global count must equal the sum of the volume counts of the
    /// same class, and every entry must sit in the lists its tags name.
    pub fn is_consistent(&self) -> bool {
        for class in [CloseClass::Async, CloseClass::Delayed] {
            let global = &self.global[class as usize];
            let walked = self.walk(global.head, Chain::Global, |entry| entry.class == class);
            if walked != Some(global.count) {
                return false;
            }

            let mut volume_total = 0;
            for (vcb, heads) in &self.volumes {
                let head = &heads[class as usize];
                let walked = self.walk(head.head, Chain::Volume, |entry| {
                    entry.class == class && entry.vcb == *vcb
                });
                if walked != Some(head.count) {
                    return false;
                }
                volume_total += head.count;
            }

            if volume_total != global.count {
                return false;
            }
        }
        true
    }

    /// Count a list's entries, or None if an entry fails the check or the
    /// back links disagree
    fn walk(&self, head: Option<usize>, chain: Chain, check: impl Fn(&CloseEntry) -> bool) -> Option<usize> {
        let mut count = 0;
        let mut prev = None;
        let mut cursor = head;

        while let Some(index) = cursor {
            let entry = self.entries.get(index)?;
            let links = match chain {
                Chain::Global => entry.global,
                Chain::Volume => entry.volume,
            };
            if links.prev != prev || entry.record.is_none() || !check(entry) {
                return None;
            }
            count += 1;
            if count > self.entries.len() {
                return None;
            }
            prev = Some(index);
            cursor = links.next;
        }
        Some(count)
    }
}

impl Default for CloseQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fastfat::close_context::CloseContext;
    use crate::fs::fastfat::node::{FcbId, TypeOfOpen};
    use alloc::boxed::Box;

    const V1: VcbId = VcbId(1);
    const V2: VcbId = VcbId(2);

    fn record(tag: u32) -> CloseRecord {
        CloseRecord::Pool(Box::new(CloseContext {
            vcb: None,
            fcb: Some(FcbId(tag)),
            type_of_open: TypeOfOpen::DirectoryFile,
            free: true,
        }))
    }

    fn tag(record: &CloseRecord) -> u32 {
        record.context().fcb.map_or(0, |fcb| fcb.0)
    }

    #[test]
    fn test_fifo_within_class() {
        let mut queues = CloseQueues::new();
        for n in 1..=3 {
            queues.insert(record(n), V1, false, 16);
        }

        let order: Vec<u32> = core::iter::from_fn(|| queues.remove_close(None, None, 16, false))
            .map(|record| tag(&record))
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(queues.is_consistent());
    }

    #[test]
    fn test_async_before_delayed() {
        let mut queues = CloseQueues::new();
        let max = 4;

        // Enough delayed closes to be eligible, queued before the async ones
        for n in 1..=3 {
            queues.insert(record(n), V1, true, max);
        }
        queues.insert(record(10), V2, false, max);
        queues.insert(record(11), V1, false, max);

        assert_eq!(tag(&queues.remove_close(None, None, max, false).unwrap()), 10);
        assert_eq!(tag(&queues.remove_close(None, None, max, false).unwrap()), 11);
        assert_eq!(tag(&queues.remove_close(None, None, max, false).unwrap()), 1);
    }

    #[test]
    fn test_delayed_held_below_half_mark() {
        let mut queues = CloseQueues::new();
        let max = 8;

        for n in 1..=4 {
            queues.insert(record(n), V1, true, max);
        }

        // Four is not above half of eight
        assert!(queues.remove_close(None, None, max, false).is_none());
        assert_eq!(queues.count(CloseClass::Delayed), 4);

        // Shutdown drains regardless
        assert_eq!(tag(&queues.remove_close(None, None, max, true).unwrap()), 1);

        // A volume drain ignores the mark
        assert_eq!(tag(&queues.remove_close(Some(V1), None, max, false).unwrap()), 2);
    }

    #[test]
    fn test_worker_activation_flag() {
        let mut queues = CloseQueues::new();
        let max = 2;

        // Delayed closes start the worker only past the mark
        assert!(!queues.insert(record(1), V1, true, max));
        assert!(!queues.insert(record(2), V1, true, max));
        assert!(queues.insert(record(3), V1, true, max));
        assert!(queues.is_worker_active());

        // Already active
        assert!(!queues.insert(record(4), V1, false, max));

        while queues.remove_close(None, None, max, false).is_some() {}
        assert!(!queues.is_worker_active());

        // A drain leaves the flag alone
        assert!(queues.insert(record(5), V1, false, max));
        while queues.remove_close(Some(V1), None, max, false).is_some() {}
        assert_eq!(queues.count(CloseClass::Async), 0);
        assert_eq!(queues.count(CloseClass::Delayed), 0);
        assert!(queues.is_worker_active());
    }

    #[test]
    fn test_volume_drain_leaves_other_volumes() {
        let mut queues = CloseQueues::new();
        queues.insert(record(1), V1, true, 16);
        queues.insert(record(2), V2, false, 16);
        queues.insert(record(3), V1, false, 16);

        assert_eq!(tag(&queues.remove_close(Some(V1), None, 16, false).unwrap()), 3);
        assert_eq!(tag(&queues.remove_close(Some(V1), None, 16, false).unwrap()), 1);
        assert!(queues.remove_close(Some(V1), None, 16, false).is_none());

        assert_eq!(queues.volume_count(V2, CloseClass::Async), 1);
        assert_eq!(queues.count(CloseClass::Async), 1);
        assert!(queues.is_consistent());
    }

    #[test]
    fn test_escalation_prefers_hinted_volume() {
        let mut queues = CloseQueues::new();
        let max = 4;

        // Nine delayed closes, V1 at the head of the global list
        queues.insert(record(100), V1, true, max);
        for n in 1..=4 {
            queues.insert(record(n), V2, true, max);
            queues.insert(record(100 + n), V1, true, max);
        }
        assert_eq!(queues.count(CloseClass::Delayed), 9);

        // Above twice the mark: the hint wins over global order
        for n in 1..=4 {
            let record = queues.remove_close(None, Some(V2), max, false).unwrap();
            assert_eq!(tag(&record), n);
        }

        // V2 is dry; fall back to global order
        assert_eq!(tag(&queues.remove_close(None, Some(V2), max, false).unwrap()), 100);
        assert!(queues.is_consistent());
    }

    #[test]
    fn test_escalation_clears_below_mark() {
        let mut queues = CloseQueues::new();
        let max = 2;

        queues.insert(record(0), V1, true, max);
        queues.insert(record(1), V2, true, max);
        for n in 2..=4 {
            queues.insert(record(n), V1, true, max);
        }

        // Five delayed closes: escalate onto V2
        assert_eq!(tag(&queues.remove_close(None, Some(V2), max, false).unwrap()), 1);

        // Drains do not touch the escalation state
        assert_eq!(tag(&queues.remove_close(Some(V1), None, max, false).unwrap()), 0);
        assert_eq!(tag(&queues.remove_close(Some(V1), None, max, false).unwrap()), 2);

        // Still at the mark: V2's delayed close beats V1's async close
        queues.insert(record(5), V2, true, max);
        queues.insert(record(6), V1, false, max);
        assert_eq!(tag(&queues.remove_close(None, Some(V2), max, false).unwrap()), 5);

        // Empty V1 out, leaving nothing delayed
        while queues.remove_close(Some(V1), None, max, false).is_some() {}
        assert_eq!(queues.count(CloseClass::Delayed), 0);

        // Below the mark: back to async first
        queues.insert(record(7), V2, true, max);
        queues.insert(record(8), V1, false, max);
        assert_eq!(tag(&queues.remove_close(None, Some(V2), max, false).unwrap()), 8);
        assert!(queues.is_consistent());
    }

    #[test]
    fn test_remove_volume_reports_leftovers() {
        let mut queues = CloseQueues::new();
        queues.insert(record(1), V1, true, 16);
        queues.insert(record(2), V1, false, 16);

        while queues.remove_close(Some(V1), None, 16, false).is_some() {}
        assert_eq!(queues.remove_volume(V1), 0);
        assert_eq!(queues.remove_volume(V2), 0);
        assert!(queues.is_consistent());
    }
}

//! Registry of neighbor records waiting for their remote chassis id to be
//! announced.
//!
//! The registry is a sentinel-headed circular doubly-linked list stored in a
//! slab, giving O(1) append at the tail and O(1) unlink from any position
//! during a sweep. The first-pass resolver appends, the sweep resolver
//! removes; both go through the single mutex owned by the registry, so the
//! two mutation paths always exclude each other.

use parking_lot::Mutex;
use topo_types::NeighborRecord;

/// Slab index of the sentinel head. Slot 0 never carries a record.
const SENTINEL: usize = 0;

#[derive(Debug)]
struct Slot {
    record: Option<NeighborRecord>,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
struct Inner {
    slots: Vec<Slot>,
    free: Vec<usize>,
    len: usize,
}

/// Order-preserving holding area for unresolved neighbor records.
#[derive(Debug)]
pub struct PendingNeighborRegistry {
    inner: Mutex<Inner>,
}

impl PendingNeighborRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: vec![Slot {
                    record: None,
                    prev: SENTINEL,
                    next: SENTINEL,
                }],
                free: Vec::new(),
                len: 0,
            }),
        }
    }

    /// Appends `record` at the tail, after every entry already pending.
    pub fn push(&self, record: NeighborRecord) {
        let mut inner = self.inner.lock();
        let tail = inner.slots[SENTINEL].prev;
        let idx = match inner.free.pop() {
            Some(idx) => {
                inner.slots[idx].record = Some(record);
                inner.slots[idx].prev = tail;
                inner.slots[idx].next = SENTINEL;
                idx
            }
            None => {
                inner.slots.push(Slot {
                    record: Some(record),
                    prev: tail,
                    next: SENTINEL,
                });
                inner.slots.len() - 1
            }
        };
        inner.slots[tail].next = idx;
        inner.slots[SENTINEL].prev = idx;
        inner.len += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One full walk from the head back to the sentinel.
    ///
    /// Every entry whose chassis id now resolves through `lookup` is
    /// unlinked, resolved in place, and returned in list order; everything
    /// else stays pending. The registry lock is held for the whole walk, so
    /// concurrent appends land after the walk completes.
    pub fn sweep<F>(&self, lookup: F) -> Vec<NeighborRecord>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut inner = self.inner.lock();
        let mut resolved = Vec::new();
        let mut current = inner.slots[SENTINEL].next;
        while current != SENTINEL {
            let next = inner.slots[current].next;
            let hit = inner.slots[current]
                .record
                .as_ref()
                .and_then(|record| record.chassis_id())
                .and_then(&lookup);
            if let Some(address) = hit {
                if let Some(mut record) = inner.slots[current].record.take() {
                    record.resolve(address);
                    resolved.push(record);
                }
                let (prev, next) = (inner.slots[current].prev, inner.slots[current].next);
                inner.slots[prev].next = next;
                inner.slots[next].prev = prev;
                inner.free.push(current);
                inner.len -= 1;
            }
            current = next;
        }
        resolved
    }
}

impl Default for PendingNeighborRegistry {
    fn default() -> Self {
        Self::new()
    }
}

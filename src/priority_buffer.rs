//! Primary staging buffer: timestamp-ordered, byte-budgeted, blocking reads.
//! Producers are rejected (never blocked) when the budget is exhausted;
//! rejection is the backpressure signal.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::{Condvar, Mutex};

use crate::record::Record;

/// Default byte budget (15 MiB).
pub const DEFAULT_CAPACITY_BYTES: usize = 15 * 1024 * 1024;

/// Used-bytes fraction above which the buffer reports itself overloaded.
pub const DEFAULT_OVERLOAD_THRESHOLD: f64 = 0.6;

/// Heap entry. Ordered so the binary max-heap yields the earliest
/// timestamp first; timestamp ties fall back to admission order.
struct Entry {
    record: Record,
    size: usize,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .timestamp()
            .cmp(&self.record.timestamp())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    used_bytes: usize,
    next_seq: u64,
    shutdown: bool,
}

/// Thread-safe priority buffer shared by the intake pool (many writers)
/// and the drain worker (single blocking reader).
pub struct PriorityBuffer {
    capacity_bytes: usize,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl PriorityBuffer {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                used_bytes: 0,
                next_seq: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Admit one record. Returns `false` when the record alone exceeds the
    /// budget or would push `used_bytes` past it; the caller decides what
    /// to do with the loss.
    pub fn enqueue(&self, record: Record) -> bool {
        let mut inner = self.inner.lock();
        let admitted = Self::admit(&mut inner, self.capacity_bytes, record);
        if admitted {
            self.available.notify_one();
        }
        admitted
    }

    /// Admit a batch under a single lock acquisition. Returns the number
    /// of records admitted; rejected records are dropped individually.
    pub fn enqueue_batch(&self, records: Vec<Record>) -> usize {
        let mut inner = self.inner.lock();
        let mut admitted = 0;
        for record in records {
            if Self::admit(&mut inner, self.capacity_bytes, record) {
                admitted += 1;
            }
        }
        if admitted > 0 {
            self.available.notify_all();
        }
        admitted
    }

    fn admit(inner: &mut Inner, capacity_bytes: usize, record: Record) -> bool {
        let size = record.accounted_size();
        if size > capacity_bytes {
            return false;
        }
        if inner.used_bytes + size > capacity_bytes {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Entry { record, size, seq });
        inner.used_bytes += size;
        true
    }

    /// Remove the earliest record, blocking until one is available or the
    /// buffer is shut down. `None` only after shutdown with nothing left.
    pub fn dequeue(&self) -> Option<Record> {
        let mut inner = self.inner.lock();
        self.available
            .wait_while(&mut inner, |inner| inner.heap.is_empty() && !inner.shutdown);
        let entry = inner.heap.pop()?;
        inner.used_bytes -= entry.size;
        Some(entry.record)
    }

    /// Remove up to `max` records in priority order. Blocks for at least
    /// one record; after shutdown drains whatever remains and then returns
    /// an empty batch. The lock is released exactly once.
    pub fn dequeue_batch(&self, max: usize) -> Vec<Record> {
        let mut inner = self.inner.lock();
        self.available
            .wait_while(&mut inner, |inner| inner.heap.is_empty() && !inner.shutdown);

        let mut batch = Vec::with_capacity(max.min(inner.heap.len()));
        while batch.len() < max {
            let Some(entry) = inner.heap.pop() else { break };
            inner.used_bytes -= entry.size;
            batch.push(entry.record);
        }
        batch
    }

    /// Wake every blocked reader. Records still held remain dequeueable;
    /// further admissions are not prevented.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.available.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Whether the used fraction of the budget exceeds `threshold`.
    /// A single field read under the lock; never waits on the condvar.
    pub fn is_overloaded(&self, threshold: f64) -> bool {
        let used = self.inner.lock().used_bytes;
        used as f64 / self.capacity_bytes as f64 > threshold
    }

    /// Discard all buffered records and reset the byte count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.heap.clear();
        inner.used_bytes = 0;
    }
}

impl Default for PriorityBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

//! Dead-letter buffer: FIFO overflow storage with size-bounded eviction.
//! Holds records demoted from the primary flow; consumed opportunistically
//! when the priority buffer is healthy.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::record::Record;

/// Default byte budget (10 MiB).
pub const DEFAULT_CAPACITY_BYTES: usize = 10 * 1024 * 1024;

/// Above this fraction of capacity, each admission first trickles out a
/// few of the oldest records.
pub const SOFT_EVICTION_THRESHOLD: f64 = 0.6;

/// Admissions that would land above this fraction trigger a hard drain.
pub const HARD_EVICTION_THRESHOLD: f64 = 0.9;

/// Hard drains evict down to this fraction. The gap below the hard
/// threshold is hysteresis: one admission cannot re-trigger the drain.
pub const HARD_EVICTION_FLOOR: f64 = 0.7;

/// Maximum records removed by one soft trickle.
pub const SOFT_EVICTION_BATCH: usize = 10;

struct Inner {
    queue: VecDeque<Record>,
    used_bytes: usize,
}

/// Thread-safe FIFO buffer with two-tier eviction. Unlike the priority
/// buffer, reads never block: `dequeue` returns `None` immediately when
/// nothing is available.
pub struct DeadLetterBuffer {
    capacity_bytes: usize,
    inner: Mutex<Inner>,
}

impl DeadLetterBuffer {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                used_bytes: 0,
            }),
        }
    }

    pub fn with_capacity_mb(capacity_mb: usize) -> Self {
        Self::new(capacity_mb * 1024 * 1024)
    }

    /// Admit one record, evicting the oldest as needed. Only a record
    /// larger than the entire budget is rejected.
    pub fn enqueue(&self, record: Record) -> bool {
        let mut inner = self.inner.lock();
        self.admit(&mut inner, record)
    }

    /// Admit a batch under one lock acquisition; per-record rejections do
    /// not abort the batch. Returns the number admitted.
    pub fn enqueue_batch(&self, records: Vec<Record>) -> usize {
        let mut inner = self.inner.lock();
        let mut admitted = 0;
        for record in records {
            if self.admit(&mut inner, record) {
                admitted += 1;
            }
        }
        admitted
    }

    fn admit(&self, inner: &mut Inner, record: Record) -> bool {
        let size = record.accounted_size();
        if size > self.capacity_bytes {
            return false;
        }

        // Soft trickle: above the soft watermark, shed a handful of the
        // oldest records before admitting more.
        let soft_limit = self.capacity_bytes as f64 * SOFT_EVICTION_THRESHOLD;
        if inner.used_bytes as f64 > soft_limit {
            for _ in 0..SOFT_EVICTION_BATCH {
                let Some(evicted) = inner.queue.pop_front() else { break };
                inner.used_bytes -= evicted.accounted_size();
            }
        }

        // Hard drain: an admission that would land above the hard
        // watermark evicts down to the floor (or empties the buffer).
        let hard_limit = self.capacity_bytes as f64 * HARD_EVICTION_THRESHOLD;
        if (inner.used_bytes + size) as f64 > hard_limit {
            let floor = (self.capacity_bytes as f64 * HARD_EVICTION_FLOOR) as usize;
            while inner.used_bytes > floor {
                let Some(evicted) = inner.queue.pop_front() else { break };
                inner.used_bytes -= evicted.accounted_size();
            }
        }

        inner.queue.push_back(record);
        inner.used_bytes += size;
        true
    }

    /// Remove the oldest record, or `None` immediately when empty.
    pub fn dequeue(&self) -> Option<Record> {
        let mut inner = self.inner.lock();
        let record = inner.queue.pop_front()?;
        inner.used_bytes -= record.accounted_size();
        Some(record)
    }

    /// Remove up to `max` records in admission order without blocking.
    pub fn dequeue_batch(&self, max: usize) -> Vec<Record> {
        let mut inner = self.inner.lock();
        let take = max.min(inner.queue.len());
        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(record) = inner.queue.pop_front() else { break };
            inner.used_bytes -= record.accounted_size();
            batch.push(record);
        }
        batch
    }

    pub fn size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Discard all buffered records and reset the byte count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.used_bytes = 0;
    }
}

impl Default for DeadLetterBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

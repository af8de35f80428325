//! Timestamp-ordered holding area for samples awaiting dispatch
//!
//! Samples arrive in network order and are kept in a min-heap keyed by
//! [`SortKey`]. The dispatcher periodically takes everything out at once and
//! sorts it, so each drained batch is in timestamp order.
//!
//! This is bounded-latency, approximate ordering: a sample that arrives
//! after the batch covering its timestamp was drained is written in the next
//! batch, i.e. out of order relative to rows already on disk. Nothing is
//! ever held back waiting for stragglers.
//!
//! The heap is capped at `capacity`. Past that, the sample with the oldest
//! key is evicted and counted as dropped. Samples without a usable client
//! timestamp sort by receive time and are counted separately.

use crate::core::{Sample, SortKey};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Log one warning per this many evictions
const DROP_LOG_EVERY: u64 = 1000;

#[derive(Debug)]
struct Entry(Sample);

impl Entry {
    fn key(&self) -> SortKey {
        self.0.sort_key()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
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
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Default)]
struct BufferInner {
    heap: BinaryHeap<Reverse<Entry>>,
    dropped: u64,
    receive_ordered: u64,
}

/// Bounded reorder buffer
///
/// Its queue lock is held only for a push or a drain and is never combined
/// with the session locks.
#[derive(Debug)]
pub struct ReorderBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Insert a sample, evicting the oldest one if over capacity
    ///
    /// Returns the evicted sample, if any.
    pub fn push(&self, sample: Sample) -> Option<Sample> {
        let mut inner = self.inner.lock();
        if !sample.is_client_ordered() {
            inner.receive_ordered += 1;
        }
        inner.heap.push(Reverse(Entry(sample)));
        if inner.heap.len() <= self.capacity {
            return None;
        }

        let evicted = inner.heap.pop().map(|Reverse(Entry(s))| s);
        inner.dropped += 1;
        if inner.dropped % DROP_LOG_EVERY == 1 {
            log::warn!(
                "Reorder buffer full ({} samples); dropped {} oldest so far",
                self.capacity,
                inner.dropped
            );
        }
        evicted
    }

    /// Take every buffered sample, sorted by timestamp then sequence
    pub fn drain_sorted(&self) -> Vec<Sample> {
        let heap = std::mem::take(&mut self.inner.lock().heap);
        let mut batch: Vec<Sample> = heap.into_vec().into_iter().map(|Reverse(e)| e.0).collect();
        batch.sort_by_key(Sample::sort_key);
        batch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples evicted because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Samples queued without a usable client timestamp
    pub fn receive_ordered(&self) -> u64 {
        self.inner.lock().receive_ordered
    }

    /// Discard everything without dispatching
    pub fn clear(&self) {
        self.inner.lock().heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Channel, ServerStamp};

    fn sample(ts: Option<&str>, seq: u64, server_ms: i64) -> Sample {
        Sample::new(
            Channel::Gsr,
            seq as f64,
            ts.map(str::to_string),
            ServerStamp {
                sequence: seq,
                epoch_ms: server_ms,
                text: String::new(),
            },
        )
    }

    #[test]
    fn test_drain_orders_by_client_time() {
        let buffer = ReorderBuffer::new(100);
        buffer.push(sample(Some("2025-01-28 14:30:25.100"), 0, 0));
        buffer.push(sample(Some("2025-01-28 14:30:25.050"), 1, 0));
        buffer.push(sample(Some("2025-01-28 14:30:25.075"), 2, 0));

        let batch = buffer.drain_sorted();
        let order: Vec<u64> = batch.iter().map(|s| s.sequence).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let buffer = ReorderBuffer::new(100);
        for seq in [5, 3, 4] {
            buffer.push(sample(Some("2025-01-28 14:30:25.100"), seq, 0));
        }
        let order: Vec<u64> = buffer.drain_sorted().iter().map(|s| s.sequence).collect();
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[test]
    fn test_drain_is_non_decreasing_for_mixed_input() {
        let buffer = ReorderBuffer::new(1000);
        // Deterministic scramble of millisecond offsets, some without client time
        for seq in 0..200u64 {
            let ms = (seq * 37) % 200;
            if seq % 7 == 0 {
                let now = chrono::Local::now().timestamp_millis();
                buffer.push(sample(None, seq, now));
            } else {
                let ts = format!("2025-01-28 14:30:25.{:03}", ms);
                buffer.push(sample(Some(&ts), seq, 0));
            }
        }
        let batch = buffer.drain_sorted();
        assert_eq!(batch.len(), 200);
        assert!(batch.windows(2).all(|w| w[0].sort_key() <= w[1].sort_key()));
        // seq 0, 7, ..., 196
        assert_eq!(buffer.receive_ordered(), 29);
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let buffer = ReorderBuffer::new(3);
        buffer.push(sample(Some("2025-01-28 14:30:25.300"), 0, 0));
        buffer.push(sample(Some("2025-01-28 14:30:25.100"), 1, 0));
        buffer.push(sample(Some("2025-01-28 14:30:25.200"), 2, 0));

        let evicted = buffer.push(sample(Some("2025-01-28 14:30:25.400"), 3, 0));
        assert_eq!(evicted.map(|s| s.sequence), Some(1));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 1);

        let order: Vec<u64> = buffer.drain_sorted().iter().map(|s| s.sequence).collect();
        assert_eq!(order, vec![2, 0, 3]);
    }

    #[test]
    fn test_empty_drain() {
        let buffer = ReorderBuffer::new(10);
        assert!(buffer.drain_sorted().is_empty());
        assert_eq!(buffer.capacity(), 10);
    }
}

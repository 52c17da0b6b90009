// SPDX-License-Identifier: Apache-2.0 OR MIT
// Bounded MPSC ring between log producers and the consumer thread.

use super::entry::LogEntry;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free log ring. Producers push from any thread; the consumer drains.
///
/// When the ring is full the entry is dropped and counted. Losing a log line
/// under pressure is acceptable; stalling a packet worker is not.
pub struct LogRing {
    queue: ArrayQueue<LogEntry>,
    dropped: AtomicU64,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn write(&self, entry: LogEntry) {
        if self.queue.push(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn pop(&self) -> Option<LogEntry> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Entries lost to a full ring since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

//! Bounded entry queue feeding the batch workers.
//!
//! The queue is a shaper, not a buffer: producers are never blocked. A push
//! against a full queue fails immediately with [`QueueError::Full`] and the
//! caller decides what to count. Consumer wakeups are driven by the
//! collector's signal channel, so the queue itself only guards the FIFO.

use std::collections::VecDeque;

use parking_lot::Mutex;
use thiserror::Error;

use crate::entry::LogEntry;

/// Errors reported when an entry cannot be enqueued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue holds `max_queue_size` entries already.
    #[error("queue full")]
    Full,
    /// The queue has been closed by shutdown.
    #[error("queue closed")]
    Closed,
}

struct Inner {
    items: VecDeque<LogEntry>,
    capacity: usize,
    closed: bool,
}

/// Thread-safe FIFO with a hard capacity.
///
/// Safe under any number of producers and consumers. Capacity changes never
/// evict entries that were already accepted; a queue holding more entries
/// than its new capacity simply rejects pushes until it drains below it.
pub struct BoundedQueue {
    inner: Mutex<Inner>,
}

impl BoundedQueue {
    /// Create a queue holding at most `capacity` entries.
    ///
    /// `prealloc` is a backing-storage hint; it never raises the capacity.
    pub fn new(capacity: usize, prealloc: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(prealloc.min(capacity)),
                capacity,
                closed: false,
            }),
        }
    }

    /// Append an entry, failing instead of waiting when the queue is full.
    pub fn push(&self, entry: LogEntry) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if inner.items.len() >= inner.capacity {
            return Err(QueueError::Full);
        }
        inner.items.push_back(entry);
        Ok(())
    }

    /// Remove and return up to `n` entries in FIFO order.
    ///
    /// After [`close`](Self::close) this keeps returning whatever remains
    /// until the queue is empty, then returns empty batches forever.
    pub fn drain_up_to(&self, n: usize) -> Vec<LogEntry> {
        let mut inner = self.inner.lock();
        let take = n.min(inner.items.len());
        inner.items.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Adjust the capacity without touching queued entries.
    pub fn set_capacity(&self, capacity: usize) {
        self.inner.lock().capacity = capacity;
    }

    /// Grow the backing storage ahead of time (entry-reuse hint).
    pub fn reserve(&self, additional: usize) {
        let mut inner = self.inner.lock();
        let want = additional.min(inner.capacity);
        let have = inner.items.capacity();
        if want > have {
            inner.items.reserve(want - have);
        }
    }

    /// Stop accepting entries. Draining continues until empty.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Accept entries again after a close (reconfiguration path).
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

//! Fixed-capacity blocking queue between the capture and processing threads.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use super::shutdown::Interruptible;

/// Blocking FIFO with a capacity fixed at construction.
///
/// `push` waits while full, `pop` waits while empty. Closing the queue wakes
/// every waiter: pushes are refused (the item is handed back) and pops
/// return `None`. Items still queued at that point stay put until
/// [`drain`](Self::drain) takes them, so nothing accepted is ever lost.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct QueueState<T> {
    ring: HeapRb<T>,
    closed: bool,
}

#[derive(Default)]
struct Stats {
    pushed: AtomicUsize,
    popped: AtomicUsize,
    high_water: AtomicUsize,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: usize,
    pub popped: usize,
    /// Largest length ever observed
    pub high_water: usize,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");
        Self {
            state: Mutex::new(QueueState {
                ring: HeapRb::new(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: insert at the tail, waiting while the queue is full.
    ///
    /// Returns the item if the queue is (or becomes) closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        while state.ring.is_full() && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(item);
        }

        state.ring.try_push(item)?;
        let len = state.ring.occupied_len();
        drop(state);

        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.stats.high_water.fetch_max(len, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Consumer: remove the head, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.ring.try_pop() {
                drop(state);
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_one();
                return Some(item);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Refuse further pushes and wake every blocked caller.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Take every item still queued, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let mut items = Vec::with_capacity(state.ring.occupied_len());
        while let Some(item) = state.ring.try_pop() {
            items.push(item);
        }
        drop(state);
        self.not_full.notify_all();
        items
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity().get()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            popped: self.stats.popped.load(Ordering::Relaxed),
            high_water: self.stats.high_water.load(Ordering::Relaxed),
        }
    }
}

impl<T: Send> Interruptible for BoundedQueue<T> {
    fn interrupt(&self) {
        self.close();
    }
}

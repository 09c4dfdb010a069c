//! Fixed pool of pre-allocated frame buffers.
//!
//! The driver owns the pool. Buffers cycle between the free list ("queued for
//! capture") and a lent-out [`Frame`] ("delivered to the callback"). The free
//! list is a bounded flume channel sized to the buffer count, so returning a
//! buffer never blocks and the pool can never hold more than it started with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{error, trace};

use super::frame::{Frame, FrameMetadata};

#[derive(Default)]
struct PoolStats {
    delivered: AtomicU64,
    requeued: AtomicU64,
}

pub(crate) struct PoolShared {
    free_tx: Sender<BytesMut>,
    free_rx: Receiver<BytesMut>,
    buffer_count: usize,
    stats: CachePadded<PoolStats>,
}

impl PoolShared {
    pub(crate) fn release(&self, buffer: BytesMut) {
        self.stats.requeued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_requeued").increment(1);

        // The channel holds at most `buffer_count` items and we hold its receiver.
        if let Err(e) = self.free_tx.try_send(buffer) {
            error!("Frame buffer could not rejoin the pool: {}", e);
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounters {
    pub delivered: u64,
    pub requeued: u64,
    pub available: usize,
}

/// Handle to a fixed set of reusable frame buffers. Cheap to clone.
#[derive(Clone)]
pub struct FrameBufferPool {
    shared: Arc<PoolShared>,
}

impl FrameBufferPool {
    /// Pre-allocate `buffer_count` buffers of `buffer_len` bytes.
    ///
    /// # Panics
    /// Panics if `buffer_count` is 0.
    pub fn new(buffer_count: usize, buffer_len: usize) -> Self {
        assert!(buffer_count > 0, "frame pool needs at least one buffer");

        let (free_tx, free_rx) = flume::bounded(buffer_count);
        for _ in 0..buffer_count {
            let mut buf = BytesMut::with_capacity(buffer_len);
            buf.resize(buffer_len, 0);
            // Fresh channel sized to `buffer_count`.
            let _ = free_tx.try_send(buf);
        }

        Self {
            shared: Arc::new(PoolShared {
                free_tx,
                free_rx,
                buffer_count,
                stats: CachePadded::new(PoolStats::default()),
            }),
        }
    }

    /// Take a free buffer and lend it out as a frame, waiting at most
    /// `timeout` for the consumer side to return one.
    ///
    /// The frame starts out [`Incomplete`](super::frame::FrameStatus::Incomplete);
    /// the driver fills it and sets the final status before delivery.
    pub fn acquire(&self, meta: FrameMetadata, timeout: Duration) -> Option<Frame> {
        let buffer = match self.shared.free_rx.recv_timeout(timeout) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => return None,
        };
        Some(self.lend(meta, buffer))
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self, meta: FrameMetadata) -> Option<Frame> {
        let buffer = self.shared.free_rx.try_recv().ok()?;
        Some(self.lend(meta, buffer))
    }

    fn lend(&self, meta: FrameMetadata, buffer: BytesMut) -> Frame {
        self.shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_delivered").increment(1);
        trace!(id = meta.id, "Lending frame buffer");
        Frame::new(meta, buffer, Arc::clone(&self.shared))
    }

    pub fn buffer_count(&self) -> usize {
        self.shared.buffer_count
    }

    /// Buffers currently queued for capture.
    pub fn available(&self) -> usize {
        self.shared.free_rx.len()
    }

    /// Buffers currently lent out to the callback/consumer path.
    pub fn in_flight(&self) -> usize {
        self.shared.buffer_count - self.available()
    }

    pub fn counters(&self) -> PoolCounters {
        PoolCounters {
            delivered: self.shared.stats.delivered.load(Ordering::Relaxed),
            requeued: self.shared.stats.requeued.load(Ordering::Relaxed),
            available: self.available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::format::PixelFormat;
    use crate::capture::frame::FrameStatus;

    fn meta(id: u64) -> FrameMetadata {
        FrameMetadata {
            id,
            width: 4,
            height: 4,
            format: PixelFormat::Mono8,
            exposure_us: None,
        }
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = FrameBufferPool::new(2, 16);
        let a = pool.acquire(meta(1), Duration::from_millis(5)).unwrap();
        let _b = pool.acquire(meta(2), Duration::from_millis(5)).unwrap();
        assert!(pool.acquire(meta(3), Duration::from_millis(5)).is_none());
        assert_eq!(pool.in_flight(), 2);

        a.requeue();
        assert!(pool.try_acquire(meta(3)).is_some());
    }

    #[test]
    fn every_delivery_is_returned_exactly_once() {
        let pool = FrameBufferPool::new(3, 16);
        let statuses = [
            FrameStatus::Complete,
            FrameStatus::Incomplete,
            FrameStatus::Aborted,
            FrameStatus::TimedOut,
        ];

        for i in 0..40u64 {
            let mut frame = pool.acquire(meta(i), Duration::from_millis(5)).unwrap();
            frame.status = statuses[i as usize % statuses.len()];
            match frame.status {
                FrameStatus::Complete => frame.requeue(),
                // Dropping on an early-exit path returns the buffer as well.
                _ => drop(frame),
            }
        }

        let counters = pool.counters();
        assert_eq!(counters.delivered, 40);
        assert_eq!(counters.requeued, 40);
        assert_eq!(counters.available, 3);
    }

    #[test]
    fn buffers_are_reused_not_reallocated() {
        let pool = FrameBufferPool::new(1, 16);
        let first = pool.try_acquire(meta(1)).unwrap();
        let ptr = first.data().as_ptr();
        first.requeue();

        let second = pool.try_acquire(meta(2)).unwrap();
        assert_eq!(second.data().as_ptr(), ptr);
    }

    #[test]
    fn frame_returns_while_unwinding() {
        let pool = FrameBufferPool::new(1, 16);
        let worker = pool.clone();
        let result = std::thread::spawn(move || {
            let _frame = worker.try_acquire(meta(1)).unwrap();
            panic!("consumer failed mid-frame");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.counters().requeued, 1);
    }
}

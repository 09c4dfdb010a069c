//! Capture-thread side of the hand-off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use tracing::{debug, trace, warn};

use super::camera::FrameHandler;
use super::format::PixelFormat;
use super::frame::{Frame, FrameStatus};
use crate::pipeline::{BoundedQueue, ShutdownSignal};

/// Whether a complete frame can be shown as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRoute {
    Direct,
    Convert,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    forwarded: AtomicU64,
    incomplete: AtomicU64,
    aborted: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of [`FrameForwarder`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub delivered: u64,
    pub forwarded: u64,
    pub incomplete: u64,
    pub aborted: u64,
    pub timed_out: u64,
    /// Complete frames returned to the pool because the pipeline was stopping
    pub rejected: u64,
}

impl ForwarderStats {
    pub fn discarded(&self) -> u64 {
        self.incomplete + self.aborted + self.timed_out
    }
}

/// Acquisition callback: forwards complete frames to the processing queue
/// and returns everything else to the pool.
///
/// Runs on the driver's capture thread, so it never converts anything. The
/// only blocking it can do is a `push` on a full queue, which is bounded by
/// the pool size.
#[derive(Clone)]
pub struct FrameForwarder {
    queue: Arc<BoundedQueue<Frame>>,
    shutdown: ShutdownSignal,
    target: PixelFormat,
    counters: Arc<CachePadded<Counters>>,
}

impl FrameForwarder {
    pub fn new(queue: Arc<BoundedQueue<Frame>>, shutdown: ShutdownSignal, target: PixelFormat) -> Self {
        Self {
            queue,
            shutdown,
            target,
            counters: Arc::new(CachePadded::new(Counters::default())),
        }
    }

    pub fn route(&self, frame: &Frame) -> FrameRoute {
        if frame.format() == self.target {
            FrameRoute::Direct
        } else {
            FrameRoute::Convert
        }
    }

    pub fn stats(&self) -> ForwarderStats {
        let c = &self.counters;
        ForwarderStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            forwarded: c.forwarded.load(Ordering::Relaxed),
            incomplete: c.incomplete.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    fn discard(&self, frame: Frame) {
        let counter = match frame.status {
            FrameStatus::Incomplete => &self.counters.incomplete,
            FrameStatus::Aborted => &self.counters.aborted,
            FrameStatus::TimedOut => &self.counters.timed_out,
            FrameStatus::Complete => &self.counters.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_discarded").increment(1);
        frame.requeue();
    }
}

impl FrameHandler for FrameForwarder {
    fn on_frame(&self, frame: Frame) {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);

        if self.shutdown.is_triggered() {
            trace!(id = frame.id(), "Stopping, returning frame unprocessed");
            return self.discard(frame);
        }

        if !frame.is_complete() {
            debug!("Dropping {}", frame);
            return self.discard(frame);
        }

        let route = self.route(&frame);
        trace!(id = frame.id(), ?route, "Forwarding {}", frame);

        match self.queue.push(frame) {
            Ok(()) => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(frame) => {
                warn!("Queue closed, returning {} to the pool", frame);
                self.discard(frame);
            }
        }
    }
}

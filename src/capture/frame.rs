use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;

use super::format::PixelFormat;
use super::pool::PoolShared;

/// Completion status reported by the driver for a frame event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Complete,
    Incomplete,
    Aborted,
    TimedOut,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    /// Driver-assigned, monotonic per stream
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Exposure the frame was taken with, when the driver knows it
    pub exposure_us: Option<f64>,
}

/// A frame lent out of a [`FrameBufferPool`](super::pool::FrameBufferPool).
///
/// The pixel buffer belongs to the pool. It goes back exactly once: through
/// [`Frame::requeue`], or when the frame is dropped on any other path. A
/// `Frame` cannot be cloned, so a buffer can never be returned twice.
pub struct Frame {
    pub meta: FrameMetadata,
    pub status: FrameStatus,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,

    buffer: Option<BytesMut>,
    pool: Arc<PoolShared>,
}

impl Frame {
    pub(crate) fn new(meta: FrameMetadata, mut buffer: BytesMut, pool: Arc<PoolShared>) -> Self {
        let len = meta.format.frame_len(meta.width, meta.height);
        buffer.clear();
        buffer.resize(len, 0);

        Self {
            meta,
            status: FrameStatus::Incomplete,
            timestamp: Instant::now(),
            buffer: Some(buffer),
            pool,
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn is_complete(&self) -> bool {
        self.status == FrameStatus::Complete
    }

    /// Raw pixel bytes as delivered by the driver.
    pub fn data(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }

    /// Writable pixel bytes, for the driver filling the frame.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }

    /// Truncate or extend the payload, e.g. when the transport delivered
    /// fewer bytes than the frame geometry calls for.
    pub fn set_payload_len(&mut self, len: usize) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.resize(len, 0);
        }
    }

    /// Mean and sum over every raw sample in the frame.
    ///
    /// Samples wider than 8 bits are read as little-endian 16-bit words; a
    /// trailing odd byte is ignored.
    pub fn sample_stats(&self) -> (f64, u64) {
        let data = self.data();
        let (sum, count) = if self.meta.format.bytes_per_sample() == 2 {
            data.chunks_exact(2)
                .fold((0u64, 0u64), |(s, n), w| {
                    (s + u64::from(u16::from_le_bytes([w[0], w[1]])), n + 1)
                })
        } else {
            (data.iter().map(|&b| u64::from(b)).sum(), data.len() as u64)
        };

        let mean = if count == 0 { 0.0 } else { sum as f64 / count as f64 };
        (mean, sum)
    }

    /// Hand the buffer back to the driver's pool.
    pub fn requeue(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.meta.id)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("status", &self.status)
            .field("len", &self.data().len())
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(id={}, status={:?}, {}x{} {})",
            self.meta.id, self.status, self.meta.width, self.meta.height, self.meta.format
        )
    }
}

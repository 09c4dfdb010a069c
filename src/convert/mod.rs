//! Consumer-side pixel transformation.
//!
//! Everything here produces a [`ConversionResult`] with its own storage, so
//! the source frame can be requeued while the result is still in use.

pub mod demosaic;
pub mod pixels;
pub mod raw;

pub use pixels::PixelConverter;
pub use raw::{reinterpret_u16, RawDemosaicer, SampleGrid};

use crate::capture::format::PixelFormat;
use crate::capture::frame::Frame;

/// Channel order of a converted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Rgb,
    Bgr,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Rgb | ChannelLayout::Bgr => 3,
        }
    }
}

/// Interleaved sample storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl ImageData {
    pub fn len(&self) -> usize {
        match self {
            ImageData::U8(v) => v.len(),
            ImageData::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An image derived from a frame. Never aliases the frame's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub width: u32,
    pub height: u32,
    pub layout: ChannelLayout,
    /// Significant bits per channel sample
    pub bit_depth: u32,
    pub data: ImageData,
}

impl ConversionResult {
    /// Independent copy of a frame delivered in a format that needs no
    /// conversion.
    pub fn copy_of(frame: &Frame) -> Self {
        let format = frame.format();
        let layout = match format {
            PixelFormat::Rgb8 => ChannelLayout::Rgb,
            PixelFormat::Bgr8 => ChannelLayout::Bgr,
            _ => ChannelLayout::Mono,
        };
        let data = if format.bytes_per_sample() == 2 {
            ImageData::U16(
                frame
                    .data()
                    .chunks_exact(2)
                    .map(|w| u16::from_le_bytes([w[0], w[1]]))
                    .collect(),
            )
        } else {
            ImageData::U8(frame.data().to_vec())
        };

        Self {
            width: frame.width(),
            height: frame.height(),
            layout,
            bit_depth: format.effective_bits(),
            data,
        }
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.data {
            ImageData::U8(v) => Some(v),
            ImageData::U16(_) => None,
        }
    }

    pub fn as_u16(&self) -> Option<&[u16]> {
        match &self.data {
            ImageData::U16(v) => Some(v),
            ImageData::U8(_) => None,
        }
    }

    /// Sample at `(x, y)` in channel `c`, widened to u32.
    pub fn sample(&self, x: u32, y: u32, c: usize) -> Option<u32> {
        if x >= self.width || y >= self.height || c >= self.channels() {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.channels() + c;
        match &self.data {
            ImageData::U8(v) => v.get(idx).map(|&s| u32::from(s)),
            ImageData::U16(v) => v.get(idx).map(|&s| u32::from(s)),
        }
    }
}

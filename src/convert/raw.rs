//! Raw sensor buffers as typed sample grids, and the archival demosaic path.

use tracing::debug;

use super::demosaic::{demosaic, Sample};
use super::{ChannelLayout, ConversionResult, ImageData};
use crate::capture::format::CfaPattern;
use crate::capture::frame::Frame;
use crate::error::ConversionError;

/// Row-major 2-D grid of sensor samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGrid<T> {
    width: usize,
    height: usize,
    samples: Vec<T>,
}

impl<T: Sample> SampleGrid<T> {
    /// Returns `None` unless `samples.len() == width * height`.
    pub fn new(width: usize, height: usize, samples: Vec<T>) -> Option<Self> {
        (samples.len() == width * height).then_some(Self {
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.samples[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[T] {
        &self.samples[y * self.width..(y + 1) * self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        self.samples.chunks_exact(self.width.max(1))
    }

    pub fn samples(&self) -> &[T] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<T> {
        self.samples
    }
}

impl SampleGrid<u16> {
    /// Move right-aligned samples up by `bits`, e.g. 4 for 12-bit data in
    /// 16-bit words.
    pub fn shift_left(&mut self, bits: u32) {
        if bits == 0 {
            return;
        }
        for s in &mut self.samples {
            *s <<= bits;
        }
    }
}

/// Reinterpret little-endian bytes as a `height` x `width` grid of u16
/// samples.
///
/// The buffer must be exactly `width * height * 2` bytes long.
pub fn reinterpret_u16(bytes: &[u8], width: u32, height: u32) -> Result<SampleGrid<u16>, ConversionError> {
    let (w, h) = (width as usize, height as usize);
    let expected = w * h * 2;
    if bytes.len() != expected {
        return Err(ConversionError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(SampleGrid {
        width: w,
        height: h,
        samples,
    })
}

/// Reinterpret bytes as a grid of 8-bit samples. Same length rule, one byte
/// per sample.
pub fn reinterpret_u8(bytes: &[u8], width: u32, height: u32) -> Result<SampleGrid<u8>, ConversionError> {
    let (w, h) = (width as usize, height as usize);
    if bytes.len() != w * h {
        return Err(ConversionError::SizeMismatch {
            expected: w * h,
            actual: bytes.len(),
        });
    }
    Ok(SampleGrid {
        width: w,
        height: h,
        samples: bytes.to_vec(),
    })
}

/// Demosaics unpacked 16-bit Bayer frames into 16-bit RGB for archival.
#[derive(Debug, Clone, Copy)]
pub struct RawDemosaicer {
    cfa_override: Option<CfaPattern>,
    scale_to_storage: bool,
}

impl RawDemosaicer {
    /// `cfa_override` replaces the phase named by the pixel format.
    /// With `scale_to_storage`, samples are shifted up to fill all 16 bits
    /// before interpolation.
    pub fn new(cfa_override: Option<CfaPattern>, scale_to_storage: bool) -> Self {
        Self {
            cfa_override,
            scale_to_storage,
        }
    }

    pub fn demosaic(&self, frame: &Frame) -> Result<ConversionResult, ConversionError> {
        let format = frame.format();
        let phase = match format.cfa_pattern() {
            Some(phase) if format.bytes_per_sample() == 2 => self.cfa_override.unwrap_or(phase),
            _ => return Err(ConversionError::NotRawBayer { format }),
        };

        let mut grid = reinterpret_u16(frame.data(), frame.width(), frame.height())?;

        let (shift, bit_depth) = if self.scale_to_storage {
            (16 - format.effective_bits(), 16)
        } else {
            (0, format.effective_bits())
        };
        grid.shift_left(shift);
        debug!(id = frame.id(), ?phase, shift, "Demosaicing raw frame");

        let rgb = demosaic(&grid, phase)?;
        Ok(ConversionResult {
            width: frame.width(),
            height: frame.height(),
            layout: ChannelLayout::Rgb,
            bit_depth,
            data: ImageData::U16(rgb),
        })
    }
}

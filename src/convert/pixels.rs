//! Direct format conversion to the display format.

use std::time::Instant;

use tracing::trace;

use super::demosaic::{demosaic, swap_red_blue};
use super::raw::{reinterpret_u16, reinterpret_u8};
use super::{ChannelLayout, ConversionResult, ImageData};
use crate::capture::format::{CfaPattern, PixelFormat};
use crate::capture::frame::Frame;
use crate::error::ConversionError;

/// Converts frames into a fixed target format chosen at construction.
#[derive(Debug, Clone, Copy)]
pub struct PixelConverter {
    target: PixelFormat,
    cfa_override: Option<CfaPattern>,
}

impl PixelConverter {
    pub fn new(target: PixelFormat, cfa_override: Option<CfaPattern>) -> Self {
        Self {
            target,
            cfa_override,
        }
    }

    pub fn target(&self) -> PixelFormat {
        self.target
    }

    pub fn convert(&self, frame: &Frame) -> Result<ConversionResult, ConversionError> {
        let started = Instant::now();
        let source = frame.format();
        let (width, height) = (frame.width(), frame.height());

        let expected = source.frame_len(width, height);
        if frame.data().len() != expected {
            return Err(ConversionError::SizeMismatch {
                expected,
                actual: frame.data().len(),
            });
        }
        if !source.is_convertible_to(self.target) {
            return Err(ConversionError::Unsupported {
                from: source,
                to: self.target,
            });
        }

        let result = match (source, self.target) {
            (s, t) if s == t => ConversionResult::copy_of(frame),
            (s, PixelFormat::Rgb8 | PixelFormat::Bgr8) if s.is_bayer() => self.debayer_8bit(frame)?,
            (PixelFormat::Rgb8, PixelFormat::Bgr8) | (PixelFormat::Bgr8, PixelFormat::Rgb8) => {
                let mut data = frame.data().to_vec();
                swap_red_blue(&mut data);
                self.rgb8(width, height, data)
            }
            (s, PixelFormat::Mono8) if s.is_mono() => {
                let shift = s.effective_bits() - 8;
                let samples = reinterpret_u16(frame.data(), width, height)?.into_samples();
                ConversionResult {
                    width,
                    height,
                    layout: ChannelLayout::Mono,
                    bit_depth: 8,
                    data: ImageData::U8(samples.into_iter().map(|v| narrow(v, shift)).collect()),
                }
            }
            (s, PixelFormat::Mono16) if s.is_mono() => {
                let mut grid = reinterpret_u16(frame.data(), width, height)?;
                grid.shift_left(16 - s.effective_bits());
                ConversionResult {
                    width,
                    height,
                    layout: ChannelLayout::Mono,
                    bit_depth: 16,
                    data: ImageData::U16(grid.into_samples()),
                }
            }
            (from, to) => return Err(ConversionError::Unsupported { from, to }),
        };

        let elapsed = started.elapsed();
        metrics::histogram!("conversion_time_us").record(elapsed.as_micros() as f64);
        trace!(id = frame.id(), ?elapsed, "Converted {} -> {}", source, self.target);
        Ok(result)
    }

    fn debayer_8bit(&self, frame: &Frame) -> Result<ConversionResult, ConversionError> {
        let source = frame.format();
        let phase = self
            .cfa_override
            .or(source.cfa_pattern())
            .ok_or(ConversionError::NotRawBayer { format: source })?;
        let (width, height) = (frame.width(), frame.height());

        let mut rgb = if source.bytes_per_sample() == 1 {
            demosaic(&reinterpret_u8(frame.data(), width, height)?, phase)?
        } else {
            let shift = source.effective_bits() - 8;
            demosaic(&reinterpret_u16(frame.data(), width, height)?, phase)?
                .into_iter()
                .map(|v| narrow(v, shift))
                .collect()
        };

        if self.target == PixelFormat::Bgr8 {
            swap_red_blue(&mut rgb);
        }
        Ok(self.rgb8(width, height, rgb))
    }

    fn rgb8(&self, width: u32, height: u32, data: Vec<u8>) -> ConversionResult {
        ConversionResult {
            width,
            height,
            layout: if self.target == PixelFormat::Bgr8 {
                ChannelLayout::Bgr
            } else {
                ChannelLayout::Rgb
            },
            bit_depth: 8,
            data: ImageData::U8(data),
        }
    }
}

/// Drop the low `shift` bits of a right-aligned sample for 8-bit display.
#[inline]
fn narrow(v: u16, shift: u32) -> u8 {
    (v >> shift).min(u16::from(u8::MAX)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, FrameStatus};
    use crate::capture::pool::FrameBufferPool;

    fn frame_with(pool: &FrameBufferPool, format: PixelFormat, w: u32, h: u32, bytes: &[u8]) -> Frame {
        let mut frame = pool
            .try_acquire(FrameMetadata {
                id: 1,
                width: w,
                height: h,
                format,
                exposure_us: None,
            })
            .unwrap();
        frame.data_mut().copy_from_slice(bytes);
        frame.status = FrameStatus::Complete;
        frame
    }

    fn le(samples: &[u16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn native_format_is_copied() {
        let pool = FrameBufferPool::new(1, 12);
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let frame = frame_with(&pool, PixelFormat::Bgr8, 2, 2, &bytes);

        let out = PixelConverter::new(PixelFormat::Bgr8, None).convert(&frame).unwrap();
        assert_eq!(out.layout, ChannelLayout::Bgr);
        assert_eq!(out.as_u8().unwrap(), &bytes);
        assert_ne!(out.as_u8().unwrap().as_ptr(), frame.data().as_ptr());
    }

    #[test]
    fn bayer12_to_bgr8() {
        let pool = FrameBufferPool::new(1, 8);
        // R=4095 G=2048 G=2048 B=16
        let frame = frame_with(&pool, PixelFormat::BayerRG12, 2, 2, &le(&[4095, 2048, 2048, 16]));

        let out = PixelConverter::new(PixelFormat::Bgr8, None).convert(&frame).unwrap();
        assert_eq!(out.layout, ChannelLayout::Bgr);
        assert_eq!(out.bit_depth, 8);
        // B G R order
        assert_eq!(&out.as_u8().unwrap()[0..3], &[1, 128, 255]);
    }

    #[test]
    fn phase_override_wins() {
        let pool = FrameBufferPool::new(1, 4);
        let frame = frame_with(&pool, PixelFormat::BayerRG8, 2, 2, &[10, 20, 30, 40]);

        let out = PixelConverter::new(PixelFormat::Rgb8, Some(CfaPattern::Bggr))
            .convert(&frame)
            .unwrap();
        assert_eq!(&out.as_u8().unwrap()[0..3], &[40, 25, 10]);
    }

    #[test]
    fn rgb_bgr_swap() {
        let pool = FrameBufferPool::new(1, 3);
        let frame = frame_with(&pool, PixelFormat::Rgb8, 1, 1, &[1, 2, 3]);
        let out = PixelConverter::new(PixelFormat::Bgr8, None).convert(&frame).unwrap();
        assert_eq!(out.as_u8().unwrap(), &[3, 2, 1]);
    }

    #[test]
    fn mono12_to_mono8_and_mono16() {
        let pool = FrameBufferPool::new(2, 4);
        let bytes = le(&[4095, 256]);

        let frame = frame_with(&pool, PixelFormat::Mono12, 2, 1, &bytes);
        let m8 = PixelConverter::new(PixelFormat::Mono8, None).convert(&frame).unwrap();
        assert_eq!(m8.as_u8().unwrap(), &[255, 16]);

        let m16 = PixelConverter::new(PixelFormat::Mono16, None).convert(&frame).unwrap();
        assert_eq!(m16.as_u16().unwrap(), &[65520, 4096]);
        assert_eq!(m16.bit_depth, 16);
    }

    #[test]
    fn unsupported_pair_is_reported() {
        let pool = FrameBufferPool::new(1, 4);
        let frame = frame_with(&pool, PixelFormat::Mono8, 2, 2, &[0; 4]);
        assert_eq!(
            PixelConverter::new(PixelFormat::Bgr8, None).convert(&frame),
            Err(ConversionError::Unsupported {
                from: PixelFormat::Mono8,
                to: PixelFormat::Bgr8
            })
        );
    }

    #[test]
    fn truncated_payload_is_a_size_mismatch() {
        let pool = FrameBufferPool::new(1, 8);
        let mut frame = frame_with(&pool, PixelFormat::BayerRG12, 2, 2, &[0; 8]);
        frame.set_payload_len(7);
        assert_eq!(
            PixelConverter::new(PixelFormat::Bgr8, None).convert(&frame),
            Err(ConversionError::SizeMismatch {
                expected: 8,
                actual: 7
            })
        );
    }
}

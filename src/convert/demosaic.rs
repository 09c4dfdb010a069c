//! Bilinear Bayer demosaic.

use super::raw::SampleGrid;
use crate::capture::format::{CfaPattern, Channel};
use crate::error::ConversionError;

/// Unsigned sample type a Bayer grid can hold.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    fn to_u32(self) -> u32;

    /// `v` never exceeds the largest value of `Self`.
    fn from_u32(v: u32) -> Self;
}

impl Sample for u8 {
    #[inline]
    fn to_u32(self) -> u32 {
        u32::from(self)
    }

    #[inline]
    fn from_u32(v: u32) -> Self {
        v as u8
    }
}

impl Sample for u16 {
    #[inline]
    fn to_u32(self) -> u32 {
        u32::from(self)
    }

    #[inline]
    fn from_u32(v: u32) -> Self {
        v as u16
    }
}

#[inline]
fn slot(channel: Channel) -> usize {
    match channel {
        Channel::Red => 0,
        Channel::Green => 1,
        Channel::Blue => 2,
    }
}

/// Interpolate a full RGB image (interleaved, R G B per pixel) from a single
/// channel Bayer grid.
///
/// Each pixel keeps its own sample for its photosite colour. The two missing
/// colours are the rounded mean of the same-coloured sites in its 3x3
/// neighbourhood, clipped to the image. A mean never leaves the range of its
/// inputs, so output samples stay within the input type and depth.
pub fn demosaic<T: Sample>(grid: &SampleGrid<T>, phase: CfaPattern) -> Result<Vec<T>, ConversionError> {
    let (w, h) = (grid.width(), grid.height());
    if w < 2 || h < 2 {
        return Err(ConversionError::ImageTooSmall {
            width: w as u32,
            height: h as u32,
        });
    }

    let mut out = vec![T::default(); w * h * 3];
    for y in 0..h {
        let y0 = y.saturating_sub(1);
        let y1 = (y + 1).min(h - 1);
        for x in 0..w {
            let x0 = x.saturating_sub(1);
            let x1 = (x + 1).min(w - 1);

            let mut sums = [0u32; 3];
            let mut counts = [0u32; 3];
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    let c = slot(phase.channel_at(nx, ny));
                    sums[c] += grid.get(nx, ny).to_u32();
                    counts[c] += 1;
                }
            }

            let own = slot(phase.channel_at(x, y));
            let px = &mut out[(y * w + x) * 3..(y * w + x) * 3 + 3];
            for (c, value) in px.iter_mut().enumerate() {
                *value = if c == own {
                    grid.get(x, y)
                } else {
                    // Any 2x2 block holds every colour, so counts[c] > 0.
                    T::from_u32((sums[c] + counts[c] / 2) / counts[c])
                };
            }
        }
    }
    Ok(out)
}

/// Swap the first and third sample of every 3-sample pixel (RGB <-> BGR).
pub fn swap_red_blue<T>(interleaved: &mut [T]) {
    for px in interleaved.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

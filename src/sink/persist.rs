//! Lossless image files and the per-frame statistics log.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use tracing::{debug, info};

use crate::convert::demosaic::swap_red_blue;
use crate::convert::{ChannelLayout, ConversionResult, ImageData};
use crate::error::SinkError;

/// Build an `image` buffer at the result's own bit depth. BGR data is
/// reordered to RGB, which is what image containers store.
pub fn to_dynamic_image(result: &ConversionResult) -> Result<DynamicImage, SinkError> {
    let (w, h) = (result.width, result.height);
    let layout_err = || SinkError::Layout { width: w, height: h };

    let image = match (&result.data, result.layout) {
        (ImageData::U8(v), ChannelLayout::Mono) => {
            DynamicImage::ImageLuma8(ImageBuffer::<Luma<u8>, _>::from_raw(w, h, v.clone()).ok_or_else(layout_err)?)
        }
        (ImageData::U16(v), ChannelLayout::Mono) => {
            DynamicImage::ImageLuma16(ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v.clone()).ok_or_else(layout_err)?)
        }
        (ImageData::U8(v), layout) => {
            let mut v = v.clone();
            if layout == ChannelLayout::Bgr {
                swap_red_blue(&mut v);
            }
            DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, v).ok_or_else(layout_err)?)
        }
        (ImageData::U16(v), layout) => {
            let mut v = v.clone();
            if layout == ChannelLayout::Bgr {
                swap_red_blue(&mut v);
            }
            DynamicImage::ImageRgb16(ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, v).ok_or_else(layout_err)?)
        }
    };
    Ok(image)
}

pub(crate) fn save(result: &ConversionResult, path: &Path, format: ImageFormat) -> Result<(), SinkError> {
    to_dynamic_image(result)?
        .save_with_format(path, format)
        .map_err(|source| SinkError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes each archived frame to `output_<frameId>.tiff`, uncompressed, at
/// full bit depth.
#[derive(Debug, Clone)]
pub struct TiffWriter {
    dir: PathBuf,
}

impl TiffWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, frame_id: u64) -> PathBuf {
        self.dir.join(format!("output_{frame_id}.tiff"))
    }

    pub fn write(&self, frame_id: u64, result: &ConversionResult) -> Result<PathBuf, SinkError> {
        let path = self.path_for(frame_id);
        save(result, &path, ImageFormat::Tiff)?;
        info!(
            "Saved {}-bit {:?} image to {}",
            result.bit_depth,
            result.layout,
            path.display()
        );
        Ok(path)
    }
}

/// Append-only text log, one comma separated record per line.
pub struct StatsLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl StatsLog {
    /// Create (or truncate) the log file.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        debug!("Opened stats log {}", path.display());
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `mean,sum` for one processed frame.
    pub fn append_stats(&mut self, mean: f64, sum: u64) -> Result<(), SinkError> {
        self.append_line(&format!("{mean},{sum}"))
    }

    pub fn append_line(&mut self, line: &str) -> Result<(), SinkError> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb16(w: u32, h: u32, fill: u16) -> ConversionResult {
        ConversionResult {
            width: w,
            height: h,
            layout: ChannelLayout::Rgb,
            bit_depth: 16,
            data: ImageData::U16(vec![fill; (w * h * 3) as usize]),
        }
    }

    #[test]
    fn tiff_keeps_16_bit_samples() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TiffWriter::new(dir.path()).unwrap();
        let path = writer.write(42, &rgb16(4, 3, 48000)).unwrap();

        assert_eq!(path.file_name().unwrap(), "output_42.tiff");
        let back = image::open(&path).unwrap();
        let back = back.as_rgb16().expect("16-bit RGB");
        assert_eq!(back.dimensions(), (4, 3));
        assert!(back.pixels().all(|p| p.0 == [48000, 48000, 48000]));
    }

    #[test]
    fn bgr_is_stored_as_rgb() {
        let result = ConversionResult {
            width: 1,
            height: 1,
            layout: ChannelLayout::Bgr,
            bit_depth: 8,
            data: ImageData::U8(vec![1, 2, 3]),
        };
        let image = to_dynamic_image(&result).unwrap();
        assert_eq!(image.as_rgb8().unwrap().get_pixel(0, 0).0, [3, 2, 1]);
    }

    #[test]
    fn wrong_sample_count_is_rejected() {
        let mut result = rgb16(2, 2, 0);
        result.data = ImageData::U16(vec![0; 5]);
        assert!(matches!(
            to_dynamic_image(&result),
            Err(SinkError::Layout { width: 2, height: 2 })
        ));
    }

    #[test]
    fn stats_log_writes_one_line_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("output.txt");
        let mut log = StatsLog::create(&path).unwrap();
        log.append_stats(2047.5, 16380).unwrap();
        log.append_stats(0.0, 0).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "2047.5,16380\n0,0\n");
    }
}

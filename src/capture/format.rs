use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Pixel formats a camera can deliver, named after their GenICam SFNC names.
///
/// Bayer and mono formats above 8 bits are unpacked: one sample per 16-bit
/// little-endian word, right aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Mono10,
    Mono12,
    Mono14,
    Mono16,
    BayerGR8,
    BayerRG8,
    BayerGB8,
    BayerBG8,
    BayerGR10,
    BayerRG10,
    BayerGB10,
    BayerBG10,
    BayerGR12,
    BayerRG12,
    BayerGB12,
    BayerBG12,
    Rgb8,
    Bgr8,
}

pub const MONO_PIXEL_FORMATS: &[PixelFormat] = &[
    PixelFormat::Mono8,
    PixelFormat::Mono10,
    PixelFormat::Mono12,
    PixelFormat::Mono14,
    PixelFormat::Mono16,
];

pub const COLOR_PIXEL_FORMATS: &[PixelFormat] = &[
    PixelFormat::BayerGR8,
    PixelFormat::BayerRG8,
    PixelFormat::BayerGB8,
    PixelFormat::BayerBG8,
    PixelFormat::BayerGR10,
    PixelFormat::BayerRG10,
    PixelFormat::BayerGB10,
    PixelFormat::BayerBG10,
    PixelFormat::BayerGR12,
    PixelFormat::BayerRG12,
    PixelFormat::BayerGB12,
    PixelFormat::BayerBG12,
    PixelFormat::Rgb8,
    PixelFormat::Bgr8,
];

/// Colour of a single photosite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

/// Phase of the 2x2 colour filter array, named by its top-left row pair
/// followed by the second row pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CfaPattern {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl CfaPattern {
    /// Colour of the photosite at `(x, y)`.
    #[inline]
    pub fn channel_at(self, x: usize, y: usize) -> Channel {
        use Channel::{Blue, Green, Red};
        let quad = match self {
            CfaPattern::Rggb => [Red, Green, Green, Blue],
            CfaPattern::Bggr => [Blue, Green, Green, Red],
            CfaPattern::Grbg => [Green, Red, Blue, Green],
            CfaPattern::Gbrg => [Green, Blue, Red, Green],
        };
        quad[(y & 1) * 2 + (x & 1)]
    }
}

impl PixelFormat {
    pub const ALL: &'static [PixelFormat] = &[
        PixelFormat::Mono8,
        PixelFormat::Mono10,
        PixelFormat::Mono12,
        PixelFormat::Mono14,
        PixelFormat::Mono16,
        PixelFormat::BayerGR8,
        PixelFormat::BayerRG8,
        PixelFormat::BayerGB8,
        PixelFormat::BayerBG8,
        PixelFormat::BayerGR10,
        PixelFormat::BayerRG10,
        PixelFormat::BayerGB10,
        PixelFormat::BayerBG10,
        PixelFormat::BayerGR12,
        PixelFormat::BayerRG12,
        PixelFormat::BayerGB12,
        PixelFormat::BayerBG12,
        PixelFormat::Rgb8,
        PixelFormat::Bgr8,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono10 => "Mono10",
            PixelFormat::Mono12 => "Mono12",
            PixelFormat::Mono14 => "Mono14",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::BayerGR8 => "BayerGR8",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::BayerGB8 => "BayerGB8",
            PixelFormat::BayerBG8 => "BayerBG8",
            PixelFormat::BayerGR10 => "BayerGR10",
            PixelFormat::BayerRG10 => "BayerRG10",
            PixelFormat::BayerGB10 => "BayerGB10",
            PixelFormat::BayerBG10 => "BayerBG10",
            PixelFormat::BayerGR12 => "BayerGR12",
            PixelFormat::BayerRG12 => "BayerRG12",
            PixelFormat::BayerGB12 => "BayerGB12",
            PixelFormat::BayerBG12 => "BayerBG12",
            PixelFormat::Rgb8 => "Rgb8",
            PixelFormat::Bgr8 => "Bgr8",
        }
    }

    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            _ => 1,
        }
    }

    /// Significant bits per sample.
    pub fn effective_bits(self) -> u32 {
        match self {
            PixelFormat::Mono10
            | PixelFormat::BayerGR10
            | PixelFormat::BayerRG10
            | PixelFormat::BayerGB10
            | PixelFormat::BayerBG10 => 10,
            PixelFormat::Mono12
            | PixelFormat::BayerGR12
            | PixelFormat::BayerRG12
            | PixelFormat::BayerGB12
            | PixelFormat::BayerBG12 => 12,
            PixelFormat::Mono14 => 14,
            PixelFormat::Mono16 => 16,
            _ => 8,
        }
    }

    /// Storage width of one sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        if self.effective_bits() > 8 {
            2
        } else {
            1
        }
    }

    /// Expected buffer length for a frame of this format.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.channels() * self.bytes_per_sample()
    }

    pub fn cfa_pattern(self) -> Option<CfaPattern> {
        match self {
            PixelFormat::BayerGR8 | PixelFormat::BayerGR10 | PixelFormat::BayerGR12 => {
                Some(CfaPattern::Grbg)
            }
            PixelFormat::BayerRG8 | PixelFormat::BayerRG10 | PixelFormat::BayerRG12 => {
                Some(CfaPattern::Rggb)
            }
            PixelFormat::BayerGB8 | PixelFormat::BayerGB10 | PixelFormat::BayerGB12 => {
                Some(CfaPattern::Gbrg)
            }
            PixelFormat::BayerBG8 | PixelFormat::BayerBG10 | PixelFormat::BayerBG12 => {
                Some(CfaPattern::Bggr)
            }
            _ => None,
        }
    }

    pub fn is_bayer(self) -> bool {
        self.cfa_pattern().is_some()
    }

    pub fn is_mono(self) -> bool {
        MONO_PIXEL_FORMATS.contains(&self)
    }

    pub fn is_color(self) -> bool {
        COLOR_PIXEL_FORMATS.contains(&self)
    }

    /// Formats this one can be converted into, itself included.
    pub fn convertible_formats(self) -> &'static [PixelFormat] {
        use PixelFormat::*;
        match self {
            Mono8 => &[Mono8],
            Mono10 => &[Mono10, Mono8, Mono16],
            Mono12 => &[Mono12, Mono8, Mono16],
            Mono14 => &[Mono14, Mono8, Mono16],
            Mono16 => &[Mono16, Mono8],
            BayerGR8 => &[BayerGR8, Rgb8, Bgr8],
            BayerRG8 => &[BayerRG8, Rgb8, Bgr8],
            BayerGB8 => &[BayerGB8, Rgb8, Bgr8],
            BayerBG8 => &[BayerBG8, Rgb8, Bgr8],
            BayerGR10 => &[BayerGR10, Rgb8, Bgr8],
            BayerRG10 => &[BayerRG10, Rgb8, Bgr8],
            BayerGB10 => &[BayerGB10, Rgb8, Bgr8],
            BayerBG10 => &[BayerBG10, Rgb8, Bgr8],
            BayerGR12 => &[BayerGR12, Rgb8, Bgr8],
            BayerRG12 => &[BayerRG12, Rgb8, Bgr8],
            BayerGB12 => &[BayerGB12, Rgb8, Bgr8],
            BayerBG12 => &[BayerBG12, Rgb8, Bgr8],
            Rgb8 => &[Rgb8, Bgr8],
            Bgr8 => &[Bgr8, Rgb8],
        }
    }

    pub fn is_convertible_to(self, target: PixelFormat) -> bool {
        self.convertible_formats().contains(&target)
    }
}

/// Formats present in both lists, in the order of `formats`.
pub fn intersect_pixel_formats(formats: &[PixelFormat], subset: &[PixelFormat]) -> Vec<PixelFormat> {
    formats
        .iter()
        .copied()
        .filter(|f| subset.contains(f))
        .collect()
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FormatError::Unknown(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_and_mono_sets_partition_all_formats() {
        for f in PixelFormat::ALL {
            assert!(f.is_color() ^ f.is_mono(), "{f} must be exactly one of color/mono");
        }
    }

    #[test]
    fn every_format_converts_to_itself() {
        for f in PixelFormat::ALL {
            assert!(f.is_convertible_to(*f), "{f}");
        }
    }

    #[test]
    fn mono8_cannot_become_bgr8() {
        assert!(!PixelFormat::Mono8.is_convertible_to(PixelFormat::Bgr8));
        assert!(PixelFormat::BayerRG12.is_convertible_to(PixelFormat::Bgr8));
    }

    #[test]
    fn storage_sizes() {
        assert_eq!(PixelFormat::BayerRG12.frame_len(4, 2), 16);
        assert_eq!(PixelFormat::Bgr8.frame_len(4, 2), 24);
        assert_eq!(PixelFormat::Mono8.frame_len(4, 2), 8);
    }

    #[test]
    fn cfa_phase_matches_name() {
        let rggb = PixelFormat::BayerRG12.cfa_pattern().unwrap();
        assert_eq!(rggb.channel_at(0, 0), Channel::Red);
        assert_eq!(rggb.channel_at(1, 0), Channel::Green);
        assert_eq!(rggb.channel_at(0, 1), Channel::Green);
        assert_eq!(rggb.channel_at(1, 1), Channel::Blue);
        assert_eq!(rggb.channel_at(2, 2), Channel::Red);

        let gbrg = PixelFormat::BayerGB8.cfa_pattern().unwrap();
        assert_eq!(gbrg.channel_at(1, 0), Channel::Blue);
        assert_eq!(gbrg.channel_at(0, 1), Channel::Red);
    }

    #[test]
    fn parses_genicam_names() {
        assert_eq!("BayerRG12".parse::<PixelFormat>().unwrap(), PixelFormat::BayerRG12);
        assert_eq!("bgr8".parse::<PixelFormat>().unwrap(), PixelFormat::Bgr8);
        assert!("YUV422".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn intersection_keeps_camera_order() {
        let cam = [PixelFormat::Mono8, PixelFormat::BayerGR8, PixelFormat::Mono12, PixelFormat::Rgb8];
        assert_eq!(
            intersect_pixel_formats(&cam, COLOR_PIXEL_FORMATS),
            vec![PixelFormat::BayerGR8, PixelFormat::Rgb8]
        );
        assert_eq!(
            intersect_pixel_formats(&cam, MONO_PIXEL_FORMATS),
            vec![PixelFormat::Mono8, PixelFormat::Mono12]
        );
    }
}

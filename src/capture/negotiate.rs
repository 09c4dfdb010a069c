//! One-time pixel format selection before streaming starts.

use tracing::{info, instrument};

use super::camera::Camera;
use super::format::{intersect_pixel_formats, PixelFormat, COLOR_PIXEL_FORMATS, MONO_PIXEL_FORMATS};
use crate::error::{Error, FormatError};

/// How the negotiated format reaches the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Camera delivers the target format itself.
    Native,
    /// Camera delivers a colour format the converter maps to the target.
    ConvertColor,
    /// Fallback: a mono format the converter maps to the target.
    ConvertMono,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub format: PixelFormat,
    pub strategy: Strategy,
}

/// Picks the camera format for a fixed downstream target.
///
/// Preference order: the target itself, then the first colour format that
/// converts to it, then the first mono format that does. The result depends
/// only on the candidate order and the target.
#[derive(Debug, Clone, Copy)]
pub struct FormatNegotiator {
    target: PixelFormat,
}

impl FormatNegotiator {
    pub fn new(target: PixelFormat) -> Self {
        Self { target }
    }

    pub fn target(&self) -> PixelFormat {
        self.target
    }

    pub fn negotiate(&self, available: &[PixelFormat]) -> Result<Negotiated, FormatError> {
        let convertible = |formats: Vec<PixelFormat>| {
            formats
                .into_iter()
                .find(|f| f.is_convertible_to(self.target))
        };

        if available.contains(&self.target) {
            return Ok(Negotiated {
                format: self.target,
                strategy: Strategy::Native,
            });
        }

        if let Some(format) = convertible(intersect_pixel_formats(available, COLOR_PIXEL_FORMATS)) {
            return Ok(Negotiated {
                format,
                strategy: Strategy::ConvertColor,
            });
        }

        if let Some(format) = convertible(intersect_pixel_formats(available, MONO_PIXEL_FORMATS)) {
            return Ok(Negotiated {
                format,
                strategy: Strategy::ConvertMono,
            });
        }

        Err(FormatError::NoCompatibleFormat {
            target: self.target,
            available: available.to_vec(),
        })
    }

    /// Query the camera, negotiate, and switch the camera to the result.
    #[instrument(skip(self, camera), fields(camera = %camera.info().id, target = %self.target))]
    pub fn apply(&self, camera: &mut dyn Camera) -> Result<Negotiated, Error> {
        let available = camera.pixel_formats();
        info!("Camera supports formats: {:?}", available);

        let negotiated = self.negotiate(&available)?;
        camera.set_pixel_format(negotiated.format)?;

        info!(
            "Set pixel format {} ({:?})",
            negotiated.format, negotiated.strategy
        );
        Ok(negotiated)
    }
}

//! Error types for the acquisition pipeline.
//!
//! Configuration-time failures ([`CameraError`], [`FormatError`]) abort the
//! run before any stream starts. [`ConversionError`] is scoped to a single
//! frame; the consumer logs it and moves on. [`SinkError`] covers display and
//! persistence I/O.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::capture::format::PixelFormat;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("no cameras accessible")]
    NoCameras,

    #[error("failed to access camera '{0}'")]
    NotFound(String),

    #[error("feature '{0}' is not supported by this camera")]
    FeatureNotSupported(String),

    #[error("invalid value for feature '{name}': {reason}")]
    InvalidFeatureValue { name: String, reason: String },

    #[error("pixel format {0} is not supported by this camera")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("camera is already streaming")]
    AlreadyStreaming,

    #[error("camera is not streaming")]
    NotStreaming,

    #[error("timed out after {0:?} waiting for a frame")]
    Timeout(Duration),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("camera does not support a format compatible with {target} (available: {available:?})")]
    NoCompatibleFormat {
        target: PixelFormat,
        available: Vec<PixelFormat>,
    },

    #[error("unknown pixel format '{0}'")]
    Unknown(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("raw buffer size does not match the frame dimensions: expected {expected} bytes, actual {actual} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("cannot convert {from} to {to}")]
    Unsupported { from: PixelFormat, to: PixelFormat },

    #[error("{format} is not a 16-bit Bayer format")]
    NotRawBayer { format: PixelFormat },

    #[error("image of {width}x{height} is too small to demosaic")]
    ImageTooSmall { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image buffer does not match {width}x{height}")]
    Layout { width: u32, height: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Umbrella error for setup code that touches several layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Narrow interface to the camera driver layer.
//!
//! Vendor SDKs are reached only through these traits. The pipeline never
//! looks behind them: discovery, feature trees and transport details belong
//! to the implementation.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::format::PixelFormat;
use super::frame::Frame;
use crate::error::CameraError;

/// Identity of an enumerated camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub model: String,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera(id={}, name={})", self.id, self.name)
    }
}

/// Value of a camera feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(String),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Int(v) => Some(*v as f64),
            FeatureValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(v) => Some(*v),
            FeatureValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Bool(v) => write!(f, "{v}"),
            FeatureValue::Int(v) => write!(f, "{v}"),
            FeatureValue::Float(v) => write!(f, "{v}"),
            FeatureValue::Enum(v) => f.write_str(v),
        }
    }
}

/// A feature assignment from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSetting {
    pub name: String,
    pub value: FeatureValue,
}

impl FeatureSetting {
    pub fn new(name: impl Into<String>, value: FeatureValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Receives frame events on the driver's capture thread.
///
/// Implementations must return quickly; heavy work belongs to the consumer.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, frame: Frame);
}

impl<F> FrameHandler for F
where
    F: Fn(Frame) + Send + Sync,
{
    fn on_frame(&self, frame: Frame) {
        self(frame)
    }
}

/// An opened camera.
pub trait Camera: Send {
    fn info(&self) -> &CameraInfo;

    fn pixel_formats(&self) -> Vec<PixelFormat>;

    fn pixel_format(&self) -> PixelFormat;

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError>;

    fn feature(&self, name: &str) -> Result<FeatureValue, CameraError>;

    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError>;

    /// Start asynchronous acquisition with `buffer_count` pool buffers,
    /// invoking `handler` once per frame event on the capture thread.
    fn start_streaming(
        &mut self,
        handler: Box<dyn FrameHandler>,
        buffer_count: usize,
    ) -> Result<(), CameraError>;

    /// Stop acquisition and join the capture thread. Idempotent.
    fn stop_streaming(&mut self) -> Result<(), CameraError>;

    fn is_streaming(&self) -> bool;

    /// Synchronously grab a single frame, waiting at most `timeout`.
    fn grab_frame(&mut self, timeout: Duration) -> Result<Frame, CameraError>;
}

/// Entry point of a driver: enumerates and opens cameras.
pub trait CameraSystem {
    fn cameras(&self) -> Vec<CameraInfo>;

    fn open(&self, id: &str) -> Result<Box<dyn Camera>, CameraError>;
}

/// Stops streaming when dropped, so every exit path of the caller tears the
/// stream down.
pub struct StreamGuard<'a> {
    camera: &'a mut dyn Camera,
}

impl<'a> StreamGuard<'a> {
    pub fn start(
        camera: &'a mut dyn Camera,
        handler: Box<dyn FrameHandler>,
        buffer_count: usize,
    ) -> Result<Self, CameraError> {
        camera.start_streaming(handler, buffer_count)?;
        Ok(Self { camera })
    }

    pub fn camera(&self) -> &dyn Camera {
        &*self.camera
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_streaming() {
            tracing::warn!("Failed to stop streaming: {}", e);
        }
    }
}

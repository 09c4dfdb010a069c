//! Simulated camera driver.
//!
//! Cameras are declared in configuration and produce a deterministic test
//! pattern on a dedicated capture thread, going through the same buffer pool
//! and handler path a vendor driver would. A dark-current model makes the
//! mean signal grow linearly with exposure time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use super::camera::{Camera, CameraInfo, CameraSystem, FeatureValue, FrameHandler};
use super::format::PixelFormat;
use super::frame::{Frame, FrameMetadata, FrameStatus};
use super::pool::FrameBufferPool;
use crate::error::CameraError;

/// Longest single wait for a free buffer, so a stop request is noticed
/// even while the frame timeout is long.
const ACQUIRE_SLICE: Duration = Duration::from_millis(50);

const EXPOSURE_AUTO_MODES: &[&str] = &["Off", "Once", "Continuous"];
const CORRECTION_SELECTORS: &[&str] = &[
    "DefectPixelCorrection",
    "FixedPatternNoiseCorrection",
    "DarkCurrentCorrection",
];
const CORRECTION_MODES: &[&str] = &["Off", "On"];

/// What the simulated sensor sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPattern {
    /// Diagonal gradient that moves one step per frame, on top of the dark signal
    #[default]
    Gradient,
    /// Lens cap on: dark signal only
    Dark,
}

/// One simulated camera, as declared under `[[simulator.cameras]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedCameraConfig {
    pub id: String,
    pub name: String,
    pub model: String,
    /// Full sensor size; the ROI starts out covering all of it
    pub width: u32,
    pub height: u32,
    /// Supported pixel formats; the first one is active after open
    pub formats: Vec<PixelFormat>,
    pub frame_interval_ms: u64,
    /// Every n-th frame is delivered incomplete; 0 disables
    pub incomplete_every: u64,
    pub pattern: TestPattern,
    /// Dark level at zero exposure, in ADU of the active format
    pub dark_offset: f64,
    /// Dark current, in ADU per second of exposure
    pub dark_rate: f64,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            id: String::from("SIM-0"),
            name: String::from("Simulated Camera"),
            model: String::from("Simulated"),
            width: 1292,
            height: 964,
            formats: vec![
                PixelFormat::Mono8,
                PixelFormat::Mono12,
                PixelFormat::BayerRG12,
                PixelFormat::BayerRG8,
            ],
            frame_interval_ms: 33,
            incomplete_every: 0,
            pattern: TestPattern::Gradient,
            dark_offset: 16.0,
            dark_rate: 40.0,
        }
    }
}

/// Feature state of an opened camera, shared with its capture thread.
#[derive(Debug, Clone)]
struct Sensor {
    format: PixelFormat,
    width: u32,
    height: u32,
    offset_x: u32,
    offset_y: u32,
    exposure_us: f64,
    exposure_auto: String,
    frame_rate: f64,
    correction_selector: String,
    correction_mode: String,
}

impl Sensor {
    fn new(config: &SimulatedCameraConfig, format: PixelFormat) -> Self {
        let interval = config.frame_interval_ms.max(1) as f64;
        Self {
            format,
            width: config.width,
            height: config.height,
            offset_x: 0,
            offset_y: 0,
            exposure_us: 10_000.0,
            exposure_auto: String::from("Continuous"),
            frame_rate: 1000.0 / interval,
            correction_selector: String::from(CORRECTION_SELECTORS[0]),
            correction_mode: String::from("On"),
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }

    fn frame_len(&self) -> usize {
        self.format.frame_len(self.width, self.height)
    }
}

/// Driver entry point over the configured simulated cameras.
pub struct SimulatedSystem {
    cameras: Vec<SimulatedCameraConfig>,
    frame_timeout: Duration,
    pin_core: Option<usize>,
}

impl SimulatedSystem {
    pub fn new(cameras: Vec<SimulatedCameraConfig>) -> Self {
        Self {
            cameras,
            frame_timeout: Duration::from_secs(20),
            pin_core: None,
        }
    }

    /// How long the capture thread waits for a free buffer before
    /// reporting a timeout.
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Pin capture threads to a CPU core.
    pub fn with_pin_core(mut self, core: Option<usize>) -> Self {
        self.pin_core = core;
        self
    }
}

impl CameraSystem for SimulatedSystem {
    fn cameras(&self) -> Vec<CameraInfo> {
        self.cameras.iter().map(info_of).collect()
    }

    fn open(&self, id: &str) -> Result<Box<dyn Camera>, CameraError> {
        let config = self
            .cameras
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CameraError::NotFound(id.to_string()))?;

        let camera = SimulatedCamera::new(config.clone())?
            .with_frame_timeout(self.frame_timeout)
            .with_pin_core(self.pin_core);
        Ok(Box::new(camera))
    }
}

fn info_of(config: &SimulatedCameraConfig) -> CameraInfo {
    CameraInfo {
        id: config.id.clone(),
        name: config.name.clone(),
        model: config.model.clone(),
    }
}

struct Stream {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    pool: FrameBufferPool,
}

pub struct SimulatedCamera {
    info: CameraInfo,
    config: SimulatedCameraConfig,
    sensor: Arc<Mutex<Sensor>>,
    next_id: Arc<AtomicU64>,
    frame_timeout: Duration,
    pin_core: Option<usize>,
    stream: Option<Stream>,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedCameraConfig) -> Result<Self, CameraError> {
        let format = *config.formats.first().ok_or_else(|| CameraError::InvalidFeatureValue {
            name: String::from("PixelFormat"),
            reason: format!("camera {} declares no pixel formats", config.id),
        })?;

        Ok(Self {
            info: info_of(&config),
            sensor: Arc::new(Mutex::new(Sensor::new(&config, format))),
            config,
            next_id: Arc::new(AtomicU64::new(0)),
            frame_timeout: Duration::from_secs(20),
            pin_core: None,
            stream: None,
        })
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn with_pin_core(mut self, core: Option<usize>) -> Self {
        self.pin_core = core;
        self
    }

    /// Pool backing the running stream, if any.
    pub fn stream_pool(&self) -> Option<&FrameBufferPool> {
        self.stream.as_ref().map(|s| &s.pool)
    }

    fn ensure_idle(&self, name: &str) -> Result<(), CameraError> {
        if self.stream.is_some() {
            return Err(CameraError::InvalidFeatureValue {
                name: name.to_string(),
                reason: String::from("not writable while streaming"),
            });
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> CameraError {
    CameraError::InvalidFeatureValue {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn positive_f64(name: &str, value: &FeatureValue) -> Result<f64, CameraError> {
    match value.as_f64() {
        Some(v) if v > 0.0 && v.is_finite() => Ok(v),
        Some(v) => Err(invalid(name, format!("{v} is not a positive number"))),
        None => Err(invalid(name, format!("expected a number, got {value}"))),
    }
}

fn u32_in(name: &str, value: &FeatureValue, min: u32, max: u32) -> Result<u32, CameraError> {
    let v = value
        .as_i64()
        .ok_or_else(|| invalid(name, format!("expected an integer, got {value}")))?;
    if v < i64::from(min) || v > i64::from(max) {
        return Err(invalid(name, format!("{v} is outside {min}..={max}")));
    }
    Ok(v as u32)
}

fn enum_of(name: &str, value: &FeatureValue, allowed: &[&str]) -> Result<String, CameraError> {
    match value {
        FeatureValue::Enum(v) if allowed.contains(&v.as_str()) => Ok(v.clone()),
        other => Err(invalid(
            name,
            format!("{other} is not one of {}", allowed.join(", ")),
        )),
    }
}

impl Camera for SimulatedCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn pixel_formats(&self) -> Vec<PixelFormat> {
        self.config.formats.clone()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.sensor.lock().format
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        if self.stream.is_some() {
            return Err(CameraError::AlreadyStreaming);
        }
        if !self.config.formats.contains(&format) {
            return Err(CameraError::UnsupportedPixelFormat(format));
        }
        self.sensor.lock().format = format;
        debug!("{}: pixel format set to {}", self.info.id, format);
        Ok(())
    }

    fn feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        let sensor = self.sensor.lock();
        let value = match name {
            "ExposureTime" => FeatureValue::Float(sensor.exposure_us),
            "ExposureAuto" => FeatureValue::Enum(sensor.exposure_auto.clone()),
            "Width" => FeatureValue::Int(i64::from(sensor.width)),
            "Height" => FeatureValue::Int(i64::from(sensor.height)),
            "OffsetX" => FeatureValue::Int(i64::from(sensor.offset_x)),
            "OffsetY" => FeatureValue::Int(i64::from(sensor.offset_y)),
            "AcquisitionFrameRate" => FeatureValue::Float(sensor.frame_rate),
            "CorrectionSelector" => FeatureValue::Enum(sensor.correction_selector.clone()),
            "CorrectionMode" => FeatureValue::Enum(sensor.correction_mode.clone()),
            "PixelFormat" => FeatureValue::Enum(sensor.format.name().to_string()),
            _ => return Err(CameraError::FeatureNotSupported(name.to_string())),
        };
        Ok(value)
    }

    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        let (sensor_w, sensor_h) = (self.config.width, self.config.height);
        match name {
            "Width" | "Height" | "OffsetX" | "OffsetY" => self.ensure_idle(name)?,
            _ => {}
        }

        let mut sensor = self.sensor.lock();
        match name {
            "ExposureTime" => sensor.exposure_us = positive_f64(name, &value)?,
            "ExposureAuto" => sensor.exposure_auto = enum_of(name, &value, EXPOSURE_AUTO_MODES)?,
            "Width" => sensor.width = u32_in(name, &value, 1, sensor_w - sensor.offset_x)?,
            "Height" => sensor.height = u32_in(name, &value, 1, sensor_h - sensor.offset_y)?,
            "OffsetX" => sensor.offset_x = u32_in(name, &value, 0, sensor_w - sensor.width)?,
            "OffsetY" => sensor.offset_y = u32_in(name, &value, 0, sensor_h - sensor.height)?,
            "AcquisitionFrameRate" => sensor.frame_rate = positive_f64(name, &value)?,
            "CorrectionSelector" => {
                sensor.correction_selector = enum_of(name, &value, CORRECTION_SELECTORS)?
            }
            "CorrectionMode" => sensor.correction_mode = enum_of(name, &value, CORRECTION_MODES)?,
            _ => return Err(CameraError::FeatureNotSupported(name.to_string())),
        }
        debug!("{}: {} = {}", self.info.id, name, value);
        Ok(())
    }

    #[instrument(skip(self, handler), fields(camera = %self.info.id))]
    fn start_streaming(
        &mut self,
        handler: Box<dyn FrameHandler>,
        buffer_count: usize,
    ) -> Result<(), CameraError> {
        if self.stream.is_some() {
            return Err(CameraError::AlreadyStreaming);
        }

        let pool = FrameBufferPool::new(buffer_count.max(1), self.sensor.lock().frame_len());
        let running = Arc::new(AtomicBool::new(true));

        let worker = CaptureWorker {
            sensor: Arc::clone(&self.sensor),
            config: self.config.clone(),
            pool: pool.clone(),
            running: Arc::clone(&running),
            next_id: Arc::clone(&self.next_id),
            frame_timeout: self.frame_timeout,
            pin_core: self.pin_core,
        };
        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.info.id))
            .spawn(move || worker.run(handler))
            .map_err(CameraError::Spawn)?;

        info!("Streaming started with {} buffers", pool.buffer_count());
        self.stream = Some(Stream {
            running,
            handle,
            pool,
        });
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        stream.running.store(false, Ordering::Release);
        stream.handle.thread().unpark();
        if stream.handle.join().is_err() {
            warn!("{}: capture thread panicked", self.info.id);
        }

        let counters = stream.pool.counters();
        info!(
            "Streaming stopped: {} delivered, {} requeued, {} in flight",
            counters.delivered,
            counters.requeued,
            stream.pool.in_flight()
        );
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn grab_frame(&mut self, timeout: Duration) -> Result<Frame, CameraError> {
        if self.stream.is_some() {
            return Err(CameraError::AlreadyStreaming);
        }

        let sensor = self.sensor.lock().clone();
        let exposure = Duration::from_secs_f64(sensor.exposure_us / 1e6);
        if exposure > timeout {
            thread::sleep(timeout);
            return Err(CameraError::Timeout(timeout));
        }
        thread::sleep(exposure);

        let pool = FrameBufferPool::new(1, sensor.frame_len());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut frame = pool
            .try_acquire(metadata(id, &sensor))
            .ok_or(CameraError::Timeout(timeout))?;
        render(&mut frame, &sensor, &self.config);
        frame.status = status_for(id, self.config.incomplete_every);
        Ok(frame)
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        let _ = self.stop_streaming();
    }
}

struct CaptureWorker {
    sensor: Arc<Mutex<Sensor>>,
    config: SimulatedCameraConfig,
    pool: FrameBufferPool,
    running: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    frame_timeout: Duration,
    pin_core: Option<usize>,
}

impl CaptureWorker {
    fn run(self, handler: Box<dyn FrameHandler>) {
        self.pin();
        debug!("Capture thread running");

        while self.running.load(Ordering::Acquire) {
            let sensor = self.sensor.lock().clone();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);

            let Some(mut frame) = self.acquire(metadata(id, &sensor)) else {
                if self.running.load(Ordering::Acquire) {
                    warn!(
                        "No frame buffer came back within {:?}, frame {} lost",
                        self.frame_timeout, id
                    );
                    metrics::counter!("frame_wait_timeouts").increment(1);
                }
                continue;
            };

            render(&mut frame, &sensor, &self.config);
            frame.status = status_for(id, self.config.incomplete_every);
            trace!("Delivering {}", frame);
            handler.on_frame(frame);

            thread::park_timeout(sensor.frame_interval());
        }
        debug!("Capture thread exiting");
    }

    /// Wait up to the frame timeout for a free buffer, giving up early
    /// when the stream is stopped.
    fn acquire(&self, meta: FrameMetadata) -> Option<Frame> {
        let deadline = Instant::now() + self.frame_timeout;
        while self.running.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if let Some(frame) = self.pool.acquire(meta, remaining.min(ACQUIRE_SLICE)) {
                return Some(frame);
            }
        }
        None
    }

    fn pin(&self) {
        let Some(core) = self.pin_core else {
            return;
        };
        let pinned = core_affinity::get_core_ids()
            .and_then(|ids| ids.into_iter().find(|c| c.id == core))
            .map(core_affinity::set_for_current)
            .unwrap_or(false);
        if pinned {
            info!("Capture thread pinned to core {}", core);
        } else {
            warn!("Could not pin capture thread to core {}", core);
        }
    }
}

fn metadata(id: u64, sensor: &Sensor) -> FrameMetadata {
    FrameMetadata {
        id,
        width: sensor.width,
        height: sensor.height,
        format: sensor.format,
        exposure_us: Some(sensor.exposure_us),
    }
}

fn status_for(id: u64, incomplete_every: u64) -> FrameStatus {
    if incomplete_every > 0 && (id + 1) % incomplete_every == 0 {
        FrameStatus::Incomplete
    } else {
        FrameStatus::Complete
    }
}

/// Dark signal in ADU for the sensor's current exposure.
fn dark_level(sensor: &Sensor, config: &SimulatedCameraConfig) -> f64 {
    config.dark_offset + config.dark_rate * sensor.exposure_us / 1e6
}

/// Fill a frame with the configured pattern, right-aligned in the format's
/// sample container (little-endian for 16-bit containers).
fn render(frame: &mut Frame, sensor: &Sensor, config: &SimulatedCameraConfig) {
    let format = sensor.format;
    let max = (1u32 << format.effective_bits()) - 1;
    let dark = dark_level(sensor, config);
    let channels = format.channels() as usize;
    let bytes = format.bytes_per_sample();
    let id = frame.id();

    let (w, h) = (sensor.width as usize, sensor.height as usize);
    let (ox, oy) = (sensor.offset_x as usize, sensor.offset_y as usize);
    let span = (config.width as usize + config.height as usize).max(1);

    let data = frame.data_mut();
    for y in 0..h {
        for x in 0..w {
            let signal = match config.pattern {
                TestPattern::Dark => 0.0,
                TestPattern::Gradient => {
                    let phase = (x + ox + y + oy + id as usize) % span;
                    (phase as f64 * f64::from(max) / span as f64).floor()
                }
            };
            let value = (signal + dark).round().clamp(0.0, f64::from(max)) as u16;

            let base = (y * w + x) * channels * bytes;
            for c in 0..channels {
                let at = base + c * bytes;
                if bytes == 2 {
                    data[at..at + 2].copy_from_slice(&value.to_le_bytes());
                } else {
                    data[at] = value as u8;
                }
            }
        }
    }
}

pub mod capture;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod sweep;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use capture::camera::FeatureSetting;
use capture::format::{CfaPattern, PixelFormat};
use capture::simulated::SimulatedCameraConfig;
pub use error::{Error, Result};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "framegrab";
/// Prefix of environment overrides, e.g. `FRAMEGRAB__PIPELINE__QUEUE_CAPACITY`.
pub const ENV_PREFIX: &str = "FRAMEGRAB";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub simulator: SimulatorConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera to open; the first enumerated one when unset
    pub camera_id: Option<String>,
    pub buffer_count: usize,
    /// Upper bound on any wait for a frame
    pub frame_timeout_ms: u64,
    /// CPU core for the capture thread
    pub pin_core: Option<usize>,
    /// Features applied in order after opening; failures are logged and skipped
    pub features: Vec<FeatureSetting>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// Display format the negotiator aims for
    pub target_format: PixelFormat,
    /// Bayer phase override; the pixel format's own phase when unset
    pub bayer_pattern: Option<CfaPattern>,
    /// Demosaic 16-bit Bayer frames and save them as TIFF
    pub archive_raw: bool,
    /// Left-shift archived samples to fill the 16-bit container
    pub scale_to_storage: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// `mean,sum` per processed frame
    pub stats_log: Option<PathBuf>,
    /// PNG refreshed with the displayed image
    pub preview: Option<PathBuf>,
    pub preview_every: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub cameras: Vec<SimulatedCameraConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub exposures_us: Vec<f64>,
    /// Pause after each exposure change
    pub settle_ms: u64,
    pub pixel_format: PixelFormat,
    /// `exposure_us,mean` records
    pub log: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_id: None,
            buffer_count: 10,
            frame_timeout_ms: 20_000,
            pin_core: None,
            features: Vec::new(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            target_format: PixelFormat::Bgr8,
            bayer_pattern: None,
            archive_raw: true,
            scale_to_storage: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            stats_log: Some(PathBuf::from("output.txt")),
            preview: None,
            preview_every: 10,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            cameras: vec![SimulatedCameraConfig::default()],
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        let exposures_ms = [
            1.0, 10.0, 20.0, 50.0, 75.0, 100.0, 125.0, 150.0, 175.0, 200.0, 300.0, 350.0, 400.0,
            500.0, 600.0, 700.0, 800.0, 900.0, 1000.0, 1250.0, 1500.0, 1700.0, 1800.0, 1900.0,
            2000.0, 2500.0, 3000.0, 3500.0, 4000.0, 4500.0, 5000.0, 5500.0, 6000.0, 6500.0,
            7000.0, 7500.0, 8000.0, 8500.0, 9000.0, 9500.0, 9900.0,
        ];
        Self {
            exposures_us: exposures_ms.iter().map(|ms| ms * 1000.0).collect(),
            settle_ms: 1000,
            pixel_format: PixelFormat::Mono12,
            log: PathBuf::from("dark_current.csv"),
        }
    }
}

impl CaptureConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl Config {
    /// Layer built-in defaults, the TOML file and `FRAMEGRAB__*` environment
    /// overrides, then validate.
    ///
    /// Without `path`, `framegrab.toml` in the working directory is used if
    /// present. An explicit `path` must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(CONFIG_FILE).required(false),
        };

        let loaded: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        debug!("Configuration loaded: {:?}", loaded);
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.queue_capacity == 0 {
            return Err(Error::Invalid("pipeline.queue_capacity must be positive".into()));
        }
        if self.capture.buffer_count == 0 {
            return Err(Error::Invalid("capture.buffer_count must be positive".into()));
        }
        if self.capture.frame_timeout_ms == 0 {
            return Err(Error::Invalid("capture.frame_timeout_ms must be positive".into()));
        }
        if self.sweep.exposures_us.iter().any(|e| e.is_nan() || *e <= 0.0) {
            return Err(Error::Invalid("sweep.exposures_us must all be positive".into()));
        }
        if self.pipeline.queue_capacity < self.capture.buffer_count {
            warn!(
                "Queue capacity {} is below the buffer count {}; frames will be discarded when the consumer falls behind",
                self.pipeline.queue_capacity, self.capture.buffer_count
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::camera::FeatureValue;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.capture.buffer_count, 10);
        assert_eq!(config.capture.frame_timeout(), Duration::from_secs(20));
        assert_eq!(config.pipeline.target_format, PixelFormat::Bgr8);
        assert_eq!(config.sweep.exposures_us.len(), 41);
        assert_eq!(config.sweep.exposures_us[0], 1000.0);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
camera_id = "DEV_000F31"
buffer_count = 4

[[capture.features]]
name = "ExposureAuto"
value = "Off"

[[capture.features]]
name = "ExposureTime"
value = 640

[[capture.features]]
name = "AcquisitionFrameRate"
value = 11.0

[pipeline]
queue_capacity = 4
target_format = "Rgb8"
bayer_pattern = "grbg"

[[simulator.cameras]]
id = "DEV_000F31"
width = 64
height = 64
formats = ["BayerRG12"]
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.camera_id.as_deref(), Some("DEV_000F31"));
        assert_eq!(config.capture.buffer_count, 4);
        assert_eq!(config.capture.frame_timeout_ms, 20_000);
        let features = &config.capture.features;
        assert_eq!(features.len(), 3);
        assert_eq!(features[0], FeatureSetting::new("ExposureAuto", FeatureValue::Enum("Off".into())));
        assert_eq!(features[1].name, "ExposureTime");
        assert_eq!(features[1].value.as_f64(), Some(640.0));
        assert_eq!(config.pipeline.target_format, PixelFormat::Rgb8);
        assert_eq!(config.pipeline.bayer_pattern, Some(CfaPattern::Grbg));
        assert_eq!(config.simulator.cameras.len(), 1);
        assert_eq!(config.simulator.cameras[0].formats, vec![PixelFormat::BayerRG12]);
        assert_eq!(config.simulator.cameras[0].name, "Simulated Camera");
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(Error::Config(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = Config::default();
        config.pipeline.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
    }
}

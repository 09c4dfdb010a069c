//! Exposure sweep for dark-current measurements.
//!
//! Steps the exposure time through a list, grabs one frame per step and
//! records the mean raw level. Frames that time out or arrive incomplete are
//! recorded as skipped and the sweep moves on.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::capture::camera::{Camera, FeatureValue};
use crate::capture::format::PixelFormat;
use crate::error::{CameraError, Error};
use crate::pipeline::ShutdownSignal;
use crate::sink::StatsLog;

pub const EXPOSURE_FEATURE: &str = "ExposureTime";
pub const LOG_HEADER: &str = "exposure_us,mean";

/// One step of the sweep. `mean` is `None` when no usable frame arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint {
    pub exposure_us: f64,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub points: Vec<SweepPoint>,
    /// Stopped by the shutdown signal before the last step
    pub interrupted: bool,
}

impl SweepReport {
    /// `(exposure_us, mean)` for every step that produced a frame.
    pub fn measured(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points
            .iter()
            .filter_map(|p| p.mean.map(|mean| (p.exposure_us, mean)))
    }

    pub fn skipped(&self) -> usize {
        self.points.iter().filter(|p| p.mean.is_none()).count()
    }
}

pub struct ExposureSweep {
    settle: Duration,
    frame_timeout: Duration,
    shutdown: ShutdownSignal,
}

impl ExposureSweep {
    pub fn new(settle: Duration, frame_timeout: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            settle,
            frame_timeout,
            shutdown,
        }
    }

    /// Switch the camera to the raw format the sweep averages over.
    pub fn prepare(&self, camera: &mut dyn Camera, format: PixelFormat) -> Result<(), Error> {
        info!("Camera supports {:?}", camera.pixel_formats());
        camera.set_pixel_format(format)?;
        info!("Sweeping in {}", format);
        Ok(())
    }

    /// Run every step, appending `exposure_us,mean` records to `log`.
    #[instrument(skip_all, fields(camera = %camera.info().id, steps = exposures_us.len()))]
    pub fn run(
        &self,
        camera: &mut dyn Camera,
        exposures_us: &[f64],
        log: &mut StatsLog,
    ) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        log.append_line(LOG_HEADER)?;

        for (step, &exposure_us) in exposures_us.iter().enumerate() {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            camera.set_feature(EXPOSURE_FEATURE, FeatureValue::Float(exposure_us))?;
            if self.shutdown.wait_timeout(self.settle) {
                report.interrupted = true;
                break;
            }

            let mean = self.measure(camera, step + 1, exposure_us)?;
            match mean {
                Some(mean) => log.append_line(&format!("{exposure_us},{mean}"))?,
                None => log.append_line(&format!("{exposure_us},"))?,
            }
            report.points.push(SweepPoint { exposure_us, mean });
        }

        info!(
            "Sweep finished: {} measured, {} skipped{}",
            report.points.len() - report.skipped(),
            report.skipped(),
            if report.interrupted { ", interrupted" } else { "" }
        );
        Ok(report)
    }

    fn measure(
        &self,
        camera: &mut dyn Camera,
        step: usize,
        exposure_us: f64,
    ) -> Result<Option<f64>, Error> {
        let frame = match camera.grab_frame(self.frame_timeout) {
            Ok(frame) => frame,
            Err(CameraError::Timeout(after)) => {
                warn!("Step {}: no frame within {:?}, skipped", step, after);
                metrics::counter!("frame_wait_timeouts").increment(1);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if !frame.is_complete() {
            warn!("Step {}: {} is {:?}, skipped", step, frame, frame.status);
            return Ok(None);
        }

        let (mean, _) = frame.sample_stats();
        let actual = camera
            .feature(EXPOSURE_FEATURE)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(exposure_us);
        info!(
            "Got frame {:5}, exposure: {:10.0}us, average: {:8.2}",
            step, actual, mean
        );
        Ok(Some(mean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::{SimulatedCamera, SimulatedCameraConfig, TestPattern};
    use std::fs;

    fn dark_camera(incomplete_every: u64) -> SimulatedCamera {
        SimulatedCamera::new(SimulatedCameraConfig {
            id: String::from("dark"),
            width: 8,
            height: 8,
            formats: vec![PixelFormat::Mono8, PixelFormat::Mono12],
            pattern: TestPattern::Dark,
            dark_offset: 10.0,
            dark_rate: 2000.0,
            incomplete_every,
            ..Default::default()
        })
        .unwrap()
    }

    fn sweep(timeout: Duration) -> ExposureSweep {
        ExposureSweep::new(Duration::ZERO, timeout, ShutdownSignal::new())
    }

    #[test]
    fn mean_grows_with_exposure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dark.csv");
        let mut log = StatsLog::create(&path).unwrap();
        let mut camera = dark_camera(0);
        let sweep = sweep(Duration::from_secs(1));

        sweep.prepare(&mut camera, PixelFormat::Mono12).unwrap();
        assert_eq!(camera.pixel_format(), PixelFormat::Mono12);

        let report = sweep.run(&mut camera, &[1_000.0, 5_000.0, 10_000.0], &mut log).unwrap();
        let measured: Vec<_> = report.measured().collect();
        assert_eq!(measured, vec![(1_000.0, 12.0), (5_000.0, 20.0), (10_000.0, 30.0)]);
        assert!(!report.interrupted);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "exposure_us,mean\n1000,12\n5000,20\n10000,30\n");
    }

    #[test]
    fn timeouts_and_incomplete_frames_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = StatsLog::create(dir.path().join("dark.csv")).unwrap();
        // Every second frame incomplete; the last step outlasts the timeout.
        let mut camera = dark_camera(2);
        let sweep = sweep(Duration::from_millis(20));

        let report = sweep.run(&mut camera, &[1_000.0, 2_000.0, 500_000.0], &mut log).unwrap();
        assert_eq!(report.points.len(), 3);
        assert_eq!(report.points[0].mean, Some(12.0));
        assert_eq!(report.points[1].mean, None);
        assert_eq!(report.points[2].mean, None);
        assert_eq!(report.skipped(), 2);
    }

    #[test]
    fn unsupported_format_is_fatal() {
        let mut camera = dark_camera(0);
        assert!(matches!(
            sweep(Duration::from_secs(1)).prepare(&mut camera, PixelFormat::Mono16),
            Err(Error::Camera(CameraError::UnsupportedPixelFormat(PixelFormat::Mono16)))
        ));
    }

    #[test]
    fn shutdown_stops_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = StatsLog::create(dir.path().join("dark.csv")).unwrap();
        let mut camera = dark_camera(0);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let report = ExposureSweep::new(Duration::ZERO, Duration::from_secs(1), shutdown)
            .run(&mut camera, &[1_000.0, 2_000.0], &mut log)
            .unwrap();
        assert!(report.interrupted);
        assert!(report.points.is_empty());
    }
}

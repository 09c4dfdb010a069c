//! Processing-thread side of the hand-off.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{BoundedQueue, ShutdownSignal};
use crate::capture::frame::Frame;
use crate::capture::format::PixelFormat;
use crate::convert::{ConversionResult, PixelConverter, RawDemosaicer};
use crate::error::{ConversionError, SinkError};
use crate::sink::{DisplaySink, StatsLog, TiffWriter, ENTER_KEY_CODE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    WaitingForFrame,
    Converting,
    Presenting,
    Requeuing,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Frames converted and presented
    pub processed: u64,
    /// Frames whose conversion failed
    pub failed: u64,
    /// Frames still queued at shutdown, returned unprocessed
    pub drained: usize,
}

type Converted = Result<ConversionResult, ConversionError>;

struct Archive {
    demosaicer: RawDemosaicer,
    writer: TiffWriter,
}

/// Pulls frames off the queue, converts them, presents and persists the
/// results, and hands each buffer back to the pool.
pub struct ConsumerLoop<D> {
    queue: Arc<BoundedQueue<Frame>>,
    shutdown: ShutdownSignal,
    converter: PixelConverter,
    display: D,
    archive: Option<Archive>,
    stats_log: Option<StatsLog>,
    camera_name: String,
    state: ConsumerState,
    report: ConsumerReport,
}

impl<D: DisplaySink> ConsumerLoop<D> {
    pub fn new(
        queue: Arc<BoundedQueue<Frame>>,
        shutdown: ShutdownSignal,
        converter: PixelConverter,
        display: D,
    ) -> Self {
        Self {
            queue,
            shutdown,
            converter,
            display,
            archive: None,
            stats_log: None,
            camera_name: String::from("camera"),
            state: ConsumerState::WaitingForFrame,
            report: ConsumerReport::default(),
        }
    }

    /// Demosaic raw 16-bit Bayer frames and save them as TIFF.
    pub fn with_archive(mut self, demosaicer: RawDemosaicer, writer: TiffWriter) -> Self {
        self.archive = Some(Archive { demosaicer, writer });
        self
    }

    pub fn with_stats_log(mut self, log: StatsLog) -> Self {
        self.stats_log = Some(log);
        self
    }

    pub fn with_camera_name(mut self, name: impl Into<String>) -> Self {
        self.camera_name = name.into();
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Run until shutdown. Whatever ends the loop, a panic included, the
    /// queue is closed and drained and every frame still in it goes back to
    /// the pool.
    pub fn run(&mut self) -> Result<ConsumerReport, SinkError> {
        info!("Consumer loop started");
        let mut exit = StopOnExit {
            queue: self.queue.clone(),
            shutdown: self.shutdown.clone(),
            stopped: false,
        };
        let result = self.run_until_stopped();
        self.report.drained = exit.stop();
        self.state = ConsumerState::Stopped;

        match &result {
            Ok(()) => info!(
                "Consumer loop stopped: {} processed, {} failed, {} drained",
                self.report.processed, self.report.failed, self.report.drained
            ),
            Err(e) => warn!("Consumer loop aborted: {}", e),
        }
        result.map(|()| self.report)
    }

    fn run_until_stopped(&mut self) -> Result<(), SinkError> {
        loop {
            if self.display.poll_key() == Some(ENTER_KEY_CODE) {
                info!("Enter pressed, stopping stream");
                self.shutdown.trigger();
            }
            if self.shutdown.is_triggered() {
                return Ok(());
            }

            self.state = ConsumerState::WaitingForFrame;
            let Some(frame) = self.queue.pop() else {
                return Ok(());
            };
            self.process(frame)?;
        }
    }

    fn process(&mut self, frame: Frame) -> Result<(), SinkError> {
        self.state = ConsumerState::Converting;
        let id = frame.id();
        let format = frame.format();

        let converted = self.converter.convert(&frame);
        let archived = match &self.archive {
            Some(archive) if format.is_bayer() && format.bytes_per_sample() == 2 => {
                Some(archive.demosaicer.demosaic(&frame))
            }
            _ => None,
        };
        let (mean, sum) = frame.sample_stats();

        let result = self.present(id, format, converted, archived, mean, sum);

        self.state = ConsumerState::Requeuing;
        frame.requeue();
        result
    }

    fn present(
        &mut self,
        id: u64,
        format: PixelFormat,
        converted: Converted,
        archived: Option<Converted>,
        mean: f64,
        sum: u64,
    ) -> Result<(), SinkError> {
        let converted = match converted {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping frame {}: {}", id, e);
                self.report.failed += 1;
                metrics::counter!("frames_failed").increment(1);
                return Ok(());
            }
        };

        self.state = ConsumerState::Presenting;
        let title = format!(
            "Stream from '{}' in format {}. Press <Enter> to stop stream.",
            self.camera_name, format
        );
        self.display.show(&title, &converted)?;

        if let (Some(archive), Some(archived)) = (&self.archive, archived) {
            match archived {
                Ok(image) => {
                    archive.writer.write(id, &image)?;
                }
                Err(e) => {
                    warn!("Frame {} not archived: {}", id, e);
                    self.report.failed += 1;
                }
            }
        }

        if let Some(log) = self.stats_log.as_mut() {
            log.append_stats(mean, sum)?;
        }
        debug!("Frame {} processed, mean {:.2}, sum {}", id, mean, sum);

        self.report.processed += 1;
        metrics::counter!("frames_processed").increment(1);
        Ok(())
    }
}

/// Stops the hand-off when the loop exits, also while unwinding, so the
/// capture thread is never left blocked on a full queue.
struct StopOnExit {
    queue: Arc<BoundedQueue<Frame>>,
    shutdown: ShutdownSignal,
    stopped: bool,
}

impl StopOnExit {
    /// Returns how many queued frames were handed back unprocessed.
    fn stop(&mut self) -> usize {
        self.stopped = true;
        self.shutdown.trigger();
        self.queue.close();

        let leftovers = self.queue.drain();
        let drained = leftovers.len();
        for frame in leftovers {
            frame.requeue();
        }
        drained
    }
}

impl Drop for StopOnExit {
    fn drop(&mut self) {
        if !self.stopped {
            warn!("Consumer loop unwinding, closing the queue");
            self.stop();
        }
    }
}

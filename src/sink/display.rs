//! Display sink
//! Presents converted frames and reports key presses back to the consumer.

use std::path::PathBuf;

use flume::Receiver;
use image::ImageFormat;
use tracing::{debug, info};

use super::persist;
use crate::convert::ConversionResult;
use crate::error::SinkError;

/// Key code that stops the stream.
pub const ENTER_KEY_CODE: i32 = 13;

pub trait DisplaySink: Send {
    /// Present an image in the window named `title`.
    fn show(&mut self, title: &str, image: &ConversionResult) -> Result<(), SinkError>;

    /// Key pressed since the last poll, if any. Called once per loop tick.
    fn poll_key(&mut self) -> Option<i32> {
        None
    }
}

/// Headless display: logs every frame and can keep a PNG preview of the
/// latest image on disk. Key codes arrive over a channel, typically fed by a
/// stdin watcher.
pub struct ConsoleDisplay {
    preview: Option<PathBuf>,
    preview_every: u64,
    keys: Option<Receiver<i32>>,
    shown: u64,
    last_title: String,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self {
            preview: None,
            preview_every: 1,
            keys: None,
            shown: 0,
            last_title: String::new(),
        }
    }

    /// Refresh `path` with the displayed image every `every` frames.
    pub fn with_preview(mut self, path: impl Into<PathBuf>, every: u64) -> Self {
        self.preview = Some(path.into());
        self.preview_every = every.max(1);
        self
    }

    pub fn with_keys(mut self, keys: Receiver<i32>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for ConsoleDisplay {
    fn show(&mut self, title: &str, image: &ConversionResult) -> Result<(), SinkError> {
        if title != self.last_title {
            info!("{}", title);
            self.last_title = title.to_string();
        }

        debug!(
            "Showing {}x{} {:?} ({}-bit)",
            image.width, image.height, image.layout, image.bit_depth
        );

        if let Some(path) = &self.preview {
            if self.shown % self.preview_every == 0 {
                persist::save(image, path, ImageFormat::Png)?;
            }
        }
        self.shown += 1;
        Ok(())
    }

    fn poll_key(&mut self) -> Option<i32> {
        self.keys.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

pub mod display;
pub mod persist;

pub use display::{ConsoleDisplay, DisplaySink, ENTER_KEY_CODE};
pub use persist::{StatsLog, TiffWriter};

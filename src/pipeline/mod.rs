pub mod consumer;
pub mod queue;
pub mod shutdown;

pub use consumer::{ConsumerLoop, ConsumerReport, ConsumerState};
pub use queue::{BoundedQueue, QueueStats};
pub use shutdown::{Interruptible, ShutdownSignal};

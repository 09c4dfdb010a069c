pub mod camera;
pub mod format;
pub mod frame;
pub mod handler;
pub mod negotiate;
pub mod pool;
pub mod simulated;

pub use camera::{Camera, CameraInfo, CameraSystem, FeatureSetting, FeatureValue, FrameHandler, StreamGuard};
pub use format::{CfaPattern, PixelFormat};
pub use frame::{Frame, FrameMetadata, FrameStatus};
pub use handler::{ForwarderStats, FrameForwarder, FrameRoute};
pub use negotiate::{FormatNegotiator, Negotiated, Strategy};
pub use pool::{FrameBufferPool, PoolCounters};
pub use simulated::{SimulatedCamera, SimulatedCameraConfig, SimulatedSystem, TestPattern};

//! Display subsystem module

pub mod buffer;
pub mod device;
pub mod render;

pub use buffer::{Frame, FrameRing, FrameRingStats, InsertOutcome, Rgb};
pub use device::{DeviceHealth, UpdateGuard};
pub use render::{FrameSink, RenderLoop, TraceSink};

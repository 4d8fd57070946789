//! Wall clock and network time synchronisation
//!
//! The clock is process-wide shared state: read by the ingestion path to
//! stamp acknowledgments and by the render loop to pick due frames, written
//! only by the clock service.

pub mod wall;
pub mod ntp;
pub mod service;
pub mod timestamp;

pub use wall::{Clock, Correction, ManualTimeSource, SystemTimeSource, TimeSource};
pub use service::{ClockService, ClockServiceStats, SyncOutcome};
pub use timestamp::Timestamp;

//! # LAN LED Receiver
//!
//! Receiving half of a networked LED display pipeline: a remote renderer
//! streams pre-rendered, timestamped frames and the controller plays each
//! one when its display time arrives.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              RENDER SERVER                                  │
//! │        renders frames ahead of time, stamps each with a display time        │
//! │             FRAME:     [cmd|mask|len|secs|micros|RGB...]                    │
//! │             TELEMETRY: [cmd|bands|len|secs|micros|f32...]                   │
//! │             optionally zlib-wrapped: [magic|csize|esize|rsvd|zlib...]       │
//! └─────────────────────────────────────┬───────────────────────────────────────┘
//!                                       │ TCP (one connection at a time)
//!                                       ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              DISPLAY CONTROLLER                             │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │   Packet Reader (network::reader) - preamble, classify, inflate     │    │
//! │  └──────────────────────────────┬──────────────────────────────────────┘    │
//! │                                 ▼                                           │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │   Ingestion Coordinator (network::ingest)                           │    │
//! │  │     FRAME ──► channel mask ──► rings      TELEMETRY ──► analyzer    │    │
//! │  │     ◄── 64-byte acknowledgment (clock, ring ages, depth, health)    │    │
//! │  └───────┬──────────────────┬──────────────────┬───────────────────────┘    │
//! │          ▼                  ▼                  ▼                            │
//! │     ┌─────────┐        ┌─────────┐        ┌─────────┐                       │
//! │     │  Ring 0 │        │  Ring 1 │   ...  │  Ring N │   (channels::manager) │
//! │     └────┬────┘        └────┬────┘        └────┬────┘                       │
//! │          ▼                  ▼                  ▼                            │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │   Render Loop (display::render) - select_due(now) per channel       │    │
//! │  └─────────────────────────────────────────────────────────────────────┘    │
//! │                                                                             │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │   Clock Service (clock::service) - UDP time sync, gated corrections │    │
//! │  └─────────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod clock;
pub mod codec;
pub mod config;
pub mod display;
pub mod error;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Size of a standard FRAME/TELEMETRY header, and of the classification preamble
    pub const STANDARD_HEADER_SIZE: usize = 24;

    /// Size of the header in front of a zlib payload
    pub const COMPRESSED_HEADER_SIZE: usize = 16;

    /// Bytes per pixel on the wire (RGB)
    pub const PIXEL_SIZE: usize = 3;

    /// Bytes per analyzer band on the wire (f32)
    pub const BAND_SIZE: usize = 4;

    /// Discriminator of a compressed packet
    pub const COMPRESSED_MAGIC: u32 = 0x4441_5645;

    /// Command carrying pixel data with a 64-bit timestamp
    pub const COMMAND_PIXELDATA64: u16 = 3;

    /// Command carrying audio-analyzer peaks
    pub const COMMAND_PEAKDATA: u16 = 4;

    /// Firmware version reported in acknowledgments
    pub const FIRMWARE_VERSION: u32 = 37;

    /// Default TCP port for frame ingestion
    pub const DEFAULT_INGEST_PORT: u16 = 49152;

    /// Default per-read timeout on ingestion connections
    pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 3000;

    /// Default pixels per output channel
    pub const DEFAULT_PIXEL_COUNT: usize = 144;

    /// Channel mask is 16 bits wide
    pub const MAX_CHANNELS: usize = 16;

    /// Fewest frame buffers per channel the controller will start with
    pub const MIN_BUFFERS: usize = 3;

    /// Upper bound on frame buffers per channel
    pub const MAX_BUFFERS: usize = 500;

    /// Memory held back from the frame buffer pool
    pub const DEFAULT_RESERVE_BYTES: usize = 180_000;

    /// Default analyzer band count
    pub const DEFAULT_BAND_COUNT: u16 = 16;

    /// Default render loop rate
    pub const DEFAULT_RENDER_FPS: u32 = 60;

    pub const MICROS_PER_SECOND: u64 = 1_000_000;
}

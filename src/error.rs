//! Error types for the LED frame receiver

use std::time::Duration;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that only end the current connection.
    ///
    /// Framing, size-policy, timeout and decompression failures are all
    /// scoped to a single connection; the server keeps accepting afterwards.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Codec(_) | Error::Network(_) | Error::Io(_)
        )
    }
}

/// Wire framing and size-policy errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command code: {0}")]
    UnknownCommand(u16),

    #[error("Unknown channel mask: {mask:#06x} (device has {channels} channels)")]
    UnknownChannel { mask: u16, channels: usize },

    #[error("Band count mismatch: expected {expected}, received {found}")]
    BandCountMismatch { expected: u16, found: u16 },

    #[error("Telemetry length {length} does not match {bands} bands")]
    TelemetryLength { length: u32, bands: u16 },

    #[error("Declared packet size {declared} exceeds maximum {max}")]
    PacketTooLarge { declared: usize, max: usize },

    #[error("Frame has {pixels} pixels but channel {channel} only drives {capacity}")]
    TooManyPixels {
        pixels: u32,
        channel: usize,
        capacity: usize,
    },

    #[error("Packet truncated: needed {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Expected {expected} expanded bytes but got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Compression failed: {0}")]
    CompressionFailed(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Read timed out after {0:?} with {1} bytes buffered")]
    Timeout(Duration, usize),

    #[error("Connection closed by peer with {0} bytes buffered")]
    ConnectionClosed(usize),

    #[error("Invalid response packet")]
    InvalidResponse,
}

/// Frame buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Not enough memory: could only afford {affordable} buffers, need at least {minimum}")]
    InsufficientMemory { affordable: usize, minimum: usize },

    #[error("No output channels configured")]
    NoChannels,
}

/// Time synchronisation errors
#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Time server did not reply within {0:?}")]
    Timeout(Duration),

    #[error("Bogus time reply (zero fraction)")]
    BogusReply,

    #[error("Short time reply: {0} bytes")]
    ShortReply(usize),

    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

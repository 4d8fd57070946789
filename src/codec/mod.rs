//! zlib codec wrapper
//!
//! Inflates compressed packets on the receiving side and produces them on
//! the sending side.

pub mod decoder;
pub mod encoder;

pub use decoder::{InflaterStats, PacketInflater};
pub use encoder::PacketCompressor;

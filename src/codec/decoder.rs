//! zlib decoder for compressed packets
//!
//! Inflates into one fixed buffer sized to the largest packet the receiver
//! accepts, so a hostile expanded-size claim can never grow memory.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::CodecError;

/// Packet inflater with a reusable output buffer
pub struct PacketInflater {
    /// Output buffer, one byte larger than the largest packet so overlong
    /// streams are detected instead of silently truncated
    output: Vec<u8>,
    max_output: usize,
    /// Inflate state, reset before each packet
    decompress: Decompress,
    packets_inflated: u64,
    bytes_in: u64,
    bytes_out: u64,
    failures: u64,
}

impl PacketInflater {
    /// Create an inflater for packets up to `max_output` bytes
    pub fn new(max_output: usize) -> Self {
        Self {
            output: vec![0u8; max_output + 1],
            max_output,
            decompress: Decompress::new(true),
            packets_inflated: 0,
            bytes_in: 0,
            bytes_out: 0,
            failures: 0,
        }
    }

    /// Inflate a complete zlib stream that must expand to exactly `expected` bytes
    ///
    /// Returns a view into the internal buffer, valid until the next call.
    pub fn inflate(&mut self, compressed: &[u8], expected: usize) -> Result<&[u8], CodecError> {
        if expected > self.max_output {
            self.failures += 1;
            return Err(CodecError::SizeMismatch {
                expected,
                actual: self.max_output,
            });
        }

        self.decompress.reset(true);
        let result = self.decompress.decompress(
            compressed,
            &mut self.output[..expected + 1],
            FlushDecompress::Finish,
        );
        let produced = self.decompress.total_out() as usize;

        match result {
            Ok(Status::StreamEnd) if produced == expected => {
                self.packets_inflated += 1;
                self.bytes_in += compressed.len() as u64;
                self.bytes_out += produced as u64;
                Ok(&self.output[..produced])
            }
            Ok(Status::StreamEnd) => {
                self.failures += 1;
                Err(CodecError::SizeMismatch {
                    expected,
                    actual: produced,
                })
            }
            Ok(_) if produced > expected => {
                self.failures += 1;
                Err(CodecError::SizeMismatch {
                    expected,
                    actual: produced,
                })
            }
            Ok(_) => {
                self.failures += 1;
                Err(CodecError::DecompressionFailed(format!(
                    "stream ended early after {} bytes",
                    produced
                )))
            }
            Err(e) => {
                self.failures += 1;
                Err(CodecError::DecompressionFailed(e.to_string()))
            }
        }
    }

    /// Get statistics
    pub fn stats(&self) -> InflaterStats {
        InflaterStats {
            packets_inflated: self.packets_inflated,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            failures: self.failures,
        }
    }
}

/// Inflater statistics
#[derive(Debug, Clone, Default)]
pub struct InflaterStats {
    pub packets_inflated: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub failures: u64,
}

impl InflaterStats {
    /// Fold another inflater's counts into these
    pub fn merge(&mut self, other: &InflaterStats) {
        self.packets_inflated += other.packets_inflated;
        self.bytes_in += other.bytes_in;
        self.bytes_out += other.bytes_out;
        self.failures += other.failures;
    }

    pub fn compression_ratio(&self) -> f32 {
        if self.bytes_in == 0 {
            0.0
        } else {
            self.bytes_out as f32 / self.bytes_in as f32
        }
    }
}

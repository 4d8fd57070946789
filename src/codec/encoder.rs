//! zlib encoder for outgoing packets
//!
//! Used by the sending side to wrap a standard packet in the compressed
//! framing.

use bytes::{Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use crate::error::CodecError;
use crate::protocol::CompressedHeader;

/// Packet compressor
pub struct PacketCompressor {
    level: Compression,
    /// Packets compressed
    packets_compressed: u64,
    /// Uncompressed bytes consumed
    bytes_in: u64,
    /// Compressed bytes produced, headers included
    bytes_out: u64,
}

impl PacketCompressor {
    /// Create a compressor at zlib level 0-9
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
            packets_compressed: 0,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Fastest setting, for senders streaming at frame rate
    pub fn fast() -> Self {
        Self::new(1)
    }

    /// Raw zlib stream for `data`
    pub fn deflate(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), self.level);
        encoder
            .write_all(data)
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))
    }

    /// Wrap a complete standard packet in a compressed header
    pub fn compress_packet(&mut self, packet: &[u8]) -> Result<Bytes, CodecError> {
        let compressed = self.deflate(packet)?;

        let mut out = BytesMut::with_capacity(CompressedHeader::SIZE + compressed.len());
        CompressedHeader {
            compressed_size: compressed.len() as u32,
            expanded_size: packet.len() as u32,
            reserved: 0,
        }
        .write(&mut out);
        out.extend_from_slice(&compressed);

        self.packets_compressed += 1;
        self.bytes_in += packet.len() as u64;
        self.bytes_out += out.len() as u64;

        Ok(out.freeze())
    }

    /// Get statistics
    pub fn stats(&self) -> CompressorStats {
        CompressorStats {
            packets_compressed: self.packets_compressed,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            average_packet_size: if self.packets_compressed > 0 {
                self.bytes_out as f32 / self.packets_compressed as f32
            } else {
                0.0
            },
        }
    }
}

/// Compressor statistics
#[derive(Debug, Clone)]
pub struct CompressorStats {
    pub packets_compressed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub average_packet_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{classify, Preamble};

    #[test]
    fn test_compress_packet_header() {
        let packet = vec![0u8; 24 + 300];
        let mut compressor = PacketCompressor::fast();
        let wrapped = compressor.compress_packet(&packet).unwrap();

        match classify(&wrapped).unwrap() {
            Preamble::Compressed(header) => {
                assert_eq!(header.expanded_size as usize, packet.len());
                assert_eq!(header.total_size(), wrapped.len());
                assert_eq!(header.reserved, 0);
            }
            other => panic!("expected compressed preamble, got {:?}", other),
        }

        let stats = compressor.stats();
        assert_eq!(stats.packets_compressed, 1);
        assert!(stats.bytes_out < stats.bytes_in);
    }
}

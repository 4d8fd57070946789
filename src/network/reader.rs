//! Packet reader for one ingestion connection
//!
//! Frames a byte stream into packets: a 24-byte preamble decides between a
//! compressed and a standard packet, the declared size is checked against
//! the configured maximum, and only then is the rest of the packet read.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{InflaterStats, PacketInflater};
use crate::constants::{COMPRESSED_HEADER_SIZE, STANDARD_HEADER_SIZE};
use crate::error::{NetworkError, Result};
use crate::protocol::{classify, Command, PacketLimits, Preamble};

/// A validated packet pulled off the wire
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub command: Command,
    /// Arrived wrapped in a compressed header
    pub compressed: bool,
    /// Bytes the packet occupied on the wire
    pub wire_size: usize,
}

/// Reader over one connection
///
/// Owns a fixed receive buffer the size of the largest allowed packet. Bytes
/// read past the end of a packet stay buffered for the next one.
pub struct PacketReader<R> {
    stream: R,
    buf: Vec<u8>,
    filled: usize,
    read_timeout: Duration,
    limits: PacketLimits,
    inflater: PacketInflater,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(stream: R, limits: PacketLimits, read_timeout: Duration) -> Self {
        let capacity = limits
            .max_compressed_size()
            .max(limits.max_packet_size)
            .max(STANDARD_HEADER_SIZE);
        Self {
            stream,
            buf: vec![0u8; capacity],
            filled: 0,
            read_timeout,
            inflater: PacketInflater::new(limits.max_packet_size),
            limits,
        }
    }

    /// Read the next packet
    ///
    /// Returns `Ok(None)` when the peer closes the connection cleanly between
    /// packets. Every error leaves the reader unusable; the caller drops the
    /// connection.
    pub async fn next_packet(&mut self) -> Result<Option<DecodedPacket>> {
        if !self.fill_to(STANDARD_HEADER_SIZE, true).await? {
            return Ok(None);
        }

        match classify(&self.buf[..self.filled])? {
            Preamble::Compressed(header) => {
                let total = COMPRESSED_HEADER_SIZE as u64 + header.compressed_size as u64;
                self.limits.check_compressed_size(total)?;
                self.limits.check_size(header.expanded_size as u64)?;
                let total = total as usize;

                self.fill_to(total, false).await?;

                let expanded = self.inflater.inflate(
                    &self.buf[COMPRESSED_HEADER_SIZE..total],
                    header.expanded_size as usize,
                )?;
                let command = Command::parse(expanded, &self.limits)?;

                tracing::trace!(
                    "Inflated {} bytes to {}",
                    header.compressed_size,
                    header.expanded_size
                );

                self.consume(total);
                Ok(Some(DecodedPacket {
                    command,
                    compressed: true,
                    wire_size: total,
                }))
            }
            Preamble::Standard(header) => {
                let total = self.limits.expected_len(&header)?;
                self.fill_to(total, false).await?;

                let command = Command::parse(&self.buf[..total], &self.limits)?;

                self.consume(total);
                Ok(Some(DecodedPacket {
                    command,
                    compressed: false,
                    wire_size: total,
                }))
            }
        }
    }

    /// Read until at least `target` bytes are buffered
    ///
    /// Returns false only for a clean close with nothing buffered, and only
    /// when `allow_eof` is set.
    async fn fill_to(&mut self, target: usize, allow_eof: bool) -> Result<bool> {
        while self.filled < target {
            let read = tokio::time::timeout(
                self.read_timeout,
                self.stream.read(&mut self.buf[self.filled..]),
            )
            .await
            .map_err(|_| NetworkError::Timeout(self.read_timeout, self.filled))??;

            if read == 0 {
                if allow_eof && self.filled == 0 {
                    return Ok(false);
                }
                return Err(NetworkError::ConnectionClosed(self.filled).into());
            }
            self.filled += read;
        }
        Ok(true)
    }

    /// Drop the first `len` buffered bytes, keeping whatever follows
    fn consume(&mut self, len: usize) {
        self.buf.copy_within(len..self.filled, 0);
        self.filled -= len;
    }

    /// Bytes received beyond the last complete packet
    pub fn buffered(&self) -> usize {
        self.filled
    }

    pub fn inflater_stats(&self) -> InflaterStats {
        self.inflater.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::codec::PacketCompressor;
    use crate::error::{CodecError, Error, ProtocolError};
    use crate::protocol::{ChannelMask, FrameCommand, TelemetryCommand};
    use bytes::Bytes;

    fn limits() -> PacketLimits {
        PacketLimits {
            max_packet_size: 128,
            pixel_counts: vec![8, 8],
            band_count: 2,
        }
    }

    fn frame(mask: u16, pixels: usize, secs: u64) -> FrameCommand {
        FrameCommand {
            channels: ChannelMask::from_wire(mask),
            timestamp: Timestamp::from_parts(secs, 250),
            pixels: Bytes::from((0..pixels * 3).map(|i| i as u8).collect::<Vec<_>>()),
        }
    }

    fn reader(bytes: Vec<u8>) -> PacketReader<&'static [u8]> {
        PacketReader::new(
            Box::leak(bytes.into_boxed_slice()),
            limits(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_reads_back_to_back_packets() {
        let first = frame(1, 8, 10);
        let second = TelemetryCommand {
            timestamp: Timestamp::from_parts(11, 5),
            bands: vec![0.5, 1.5],
        };

        let mut wire = first.encode().to_vec();
        wire.extend_from_slice(&second.encode());
        let mut reader = reader(wire);

        let packet = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.command, Command::Frame(first));
        assert!(!packet.compressed);
        assert_eq!(packet.wire_size, STANDARD_HEADER_SIZE + 24);

        let packet = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.command, Command::Telemetry(second));

        assert!(reader.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compressed_matches_plain() {
        let command = frame(0b10, 5, 42);
        let plain = command.encode();
        let wrapped = PacketCompressor::new(6).compress_packet(&plain).unwrap();

        let mut wire = wrapped.to_vec();
        wire.extend_from_slice(&plain);
        let mut reader = reader(wire);

        let inflated = reader.next_packet().await.unwrap().unwrap();
        let direct = reader.next_packet().await.unwrap().unwrap();
        assert!(inflated.compressed);
        assert_eq!(inflated.command, direct.command);

        let stats = reader.inflater_stats();
        assert_eq!(stats.packets_inflated, 1);
        assert_eq!(stats.bytes_out, plain.len() as u64);
    }

    #[tokio::test]
    async fn test_oversize_rejected_from_preamble() {
        // Declares 600 payload bytes against a 128 byte maximum; no payload follows
        let wire = frame(1, 200, 1).encode()[..STANDARD_HEADER_SIZE].to_vec();
        let mut reader = reader(wire);

        assert!(matches!(
            reader.next_packet().await,
            Err(Error::Protocol(ProtocolError::PacketTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_oversize_expanded_size_rejected() {
        let plain = frame(1, 8, 1).encode();
        let mut wrapped = PacketCompressor::new(6)
            .compress_packet(&plain)
            .unwrap()
            .to_vec();
        wrapped[8..12].copy_from_slice(&10_000u32.to_le_bytes());
        let mut reader = reader(wrapped);

        assert!(matches!(
            reader.next_packet().await,
            Err(Error::Protocol(ProtocolError::PacketTooLarge { declared: 10_000, .. }))
        ));
    }

    #[tokio::test]
    async fn test_expanded_size_must_match() {
        let plain = frame(1, 4, 1).encode();
        let mut wrapped = PacketCompressor::new(6)
            .compress_packet(&plain)
            .unwrap()
            .to_vec();
        let wrong = (plain.len() - 3) as u32;
        wrapped[8..12].copy_from_slice(&wrong.to_le_bytes());
        let mut reader = reader(wrapped);

        assert!(matches!(
            reader.next_packet().await,
            Err(Error::Codec(CodecError::SizeMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let mut wire = frame(1, 1, 1).encode().to_vec();
        wire[0] = 9;
        let mut reader = reader(wire);

        assert!(matches!(
            reader.next_packet().await,
            Err(Error::Protocol(ProtocolError::UnknownCommand(9)))
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_an_error() {
        let wire = frame(1, 8, 1).encode()[..STANDARD_HEADER_SIZE + 5].to_vec();
        let mut reader = reader(wire);

        assert!(matches!(
            reader.next_packet().await,
            Err(Error::Network(NetworkError::ConnectionClosed(29)))
        ));
    }

    #[tokio::test]
    async fn test_silence_after_preamble_times_out() {
        let (client, server) = tokio::io::duplex(256);
        let mut reader = PacketReader::new(server, limits(), Duration::from_millis(50));

        let mut client = client;
        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            &frame(1, 8, 1).encode()[..STANDARD_HEADER_SIZE],
        )
        .await
        .unwrap();

        assert!(matches!(
            reader.next_packet().await,
            Err(Error::Network(NetworkError::Timeout(_, STANDARD_HEADER_SIZE)))
        ));
    }
}

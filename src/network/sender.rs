//! Frame sender
//!
//! Client side of the ingestion protocol: streams frames and analyzer peaks
//! to a receiver and reads back its acknowledgments.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::PacketCompressor;
use crate::error::{NetworkError, Result};
use crate::protocol::{AckRecord, FrameCommand, TelemetryCommand};

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub acks_received: u64,
}

/// Connection to one receiver
pub struct FrameSender {
    stream: TcpStream,
    compressor: Option<PacketCompressor>,
    ack_timeout: Duration,
    stats: SenderStats,
}

impl FrameSender {
    pub async fn connect(addr: impl ToSocketAddrs, ack_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            compressor: None,
            ack_timeout,
            stats: SenderStats::default(),
        })
    }

    /// Wrap every packet in the compressed framing at zlib `level`
    pub fn with_compression(mut self, level: u32) -> Self {
        self.compressor = Some(PacketCompressor::new(level));
        self
    }

    pub fn is_compressing(&self) -> bool {
        self.compressor.is_some()
    }

    /// Send a frame and wait for its acknowledgment
    pub async fn send_frame(&mut self, frame: &FrameCommand) -> Result<AckRecord> {
        self.send_packet(&frame.encode()).await?;
        self.read_ack().await
    }

    /// Send analyzer peaks
    ///
    /// The receiver only acknowledges peaks that arrive compressed.
    pub async fn send_telemetry(&mut self, peaks: &TelemetryCommand) -> Result<Option<AckRecord>> {
        self.send_packet(&peaks.encode()).await?;
        if self.compressor.is_some() {
            Ok(Some(self.read_ack().await?))
        } else {
            Ok(None)
        }
    }

    async fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        match self.compressor.as_mut() {
            Some(compressor) => {
                let wrapped = compressor.compress_packet(packet)?;
                self.stream.write_all(&wrapped).await?;
                self.stats.bytes_sent += wrapped.len() as u64;
            }
            None => {
                self.stream.write_all(packet).await?;
                self.stats.bytes_sent += packet.len() as u64;
            }
        }
        self.stats.packets_sent += 1;
        Ok(())
    }

    async fn read_ack(&mut self) -> Result<AckRecord> {
        let mut buf = [0u8; AckRecord::SIZE];
        tokio::time::timeout(self.ack_timeout, self.stream.read_exact(&mut buf))
            .await
            .map_err(|_| NetworkError::Timeout(self.ack_timeout, 0))??;

        let ack = AckRecord::from_bytes(&buf).map_err(|_| NetworkError::InvalidResponse)?;
        self.stats.acks_received += 1;
        Ok(ack)
    }

    pub fn stats(&self) -> SenderStats {
        self.stats.clone()
    }
}

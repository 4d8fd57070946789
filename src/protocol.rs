//! Wire protocol definitions
//!
//! Packet formats (little-endian):
//!
//! Standard header (24 bytes):
//! - command:  u16  (3 = pixel data, 4 = analyzer peaks)
//! - selector: u16  (channel mask for pixel data, band count for peaks)
//! - length:   u32  (pixels for pixel data, payload bytes for peaks)
//! - seconds:  u64  (display time, Unix seconds)
//! - micros:   u64  (display time, sub-second microseconds)
//!
//! Compressed header (16 bytes), followed by a zlib stream that expands to a
//! complete standard packet:
//! - magic:           u32
//! - compressed_size: u32
//! - expanded_size:   u32
//! - reserved:        u32

use bytes::{BufMut, Bytes, BytesMut};

use crate::clock::Timestamp;
use crate::config::AppConfig;
use crate::constants::*;
use crate::error::ProtocolError;

/// Standard packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardHeader {
    pub command: u16,
    pub selector: u16,
    pub length: u32,
    pub seconds: u64,
    pub micros: u64,
}

impl StandardHeader {
    pub const SIZE: usize = STANDARD_HEADER_SIZE;

    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        Ok(Self {
            command: read_u16(buf, 0),
            selector: read_u16(buf, 2),
            length: read_u32(buf, 4),
            seconds: read_u64(buf, 8),
            micros: read_u64(buf, 16),
        })
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u16_le(self.command);
        out.put_u16_le(self.selector);
        out.put_u32_le(self.length);
        out.put_u64_le(self.seconds);
        out.put_u64_le(self.micros);
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp::from_parts(self.seconds, self.micros)
    }
}

/// Compressed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedHeader {
    pub compressed_size: u32,
    pub expanded_size: u32,
    pub reserved: u32,
}

impl CompressedHeader {
    pub const SIZE: usize = COMPRESSED_HEADER_SIZE;

    /// Parse a header whose magic has already been checked
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        Ok(Self {
            compressed_size: read_u32(buf, 4),
            expanded_size: read_u32(buf, 8),
            reserved: read_u32(buf, 12),
        })
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(COMPRESSED_MAGIC);
        out.put_u32_le(self.compressed_size);
        out.put_u32_le(self.expanded_size);
        out.put_u32_le(self.reserved);
    }

    /// Header plus payload
    pub fn total_size(&self) -> usize {
        Self::SIZE + self.compressed_size as usize
    }
}

/// First classification of a packet from its preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preamble {
    Compressed(CompressedHeader),
    Standard(StandardHeader),
}

/// Decide what kind of packet starts at `buf`
pub fn classify(buf: &[u8]) -> Result<Preamble, ProtocolError> {
    if buf.len() >= 4 && read_u32(buf, 0) == COMPRESSED_MAGIC {
        CompressedHeader::parse(buf).map(Preamble::Compressed)
    } else {
        StandardHeader::parse(buf).map(Preamble::Standard)
    }
}

/// Set of output channels addressed by a frame, one bit per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelMask(u16);

impl ChannelMask {
    /// Legacy senders address "channel 0"; that means the first channel
    pub fn from_wire(raw: u16) -> Self {
        Self(if raw == 0 { 1 } else { raw })
    }

    /// Mask selecting only `channel`; `None` past the last mask bit
    pub fn single(channel: usize) -> Option<Self> {
        (channel < MAX_CHANNELS).then(|| Self(1u16 << channel))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, channel: usize) -> bool {
        channel < MAX_CHANNELS && self.0 & (1 << channel) != 0
    }

    /// Channel indices selected by the mask
    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..MAX_CHANNELS).filter(move |&i| self.contains(i))
    }

    /// Reject masks naming channels beyond `channel_count`
    pub fn validate(self, channel_count: usize) -> Result<Self, ProtocolError> {
        let valid = if channel_count >= MAX_CHANNELS {
            u16::MAX
        } else {
            (1u16 << channel_count) - 1
        };

        if self.0 & !valid != 0 {
            return Err(ProtocolError::UnknownChannel {
                mask: self.0,
                channels: channel_count,
            });
        }
        Ok(self)
    }
}

/// Size and topology limits every packet is checked against before its
/// payload is read
#[derive(Debug, Clone)]
pub struct PacketLimits {
    pub max_packet_size: usize,
    /// Pixels per channel, in mask bit order
    pub pixel_counts: Vec<usize>,
    pub band_count: u16,
}

impl PacketLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_packet_size: config.max_packet_size(),
            pixel_counts: config.pixel_counts(),
            band_count: config.telemetry.band_count,
        }
    }

    /// Total packet size implied by a standard header, validated
    pub fn expected_len(&self, header: &StandardHeader) -> Result<usize, ProtocolError> {
        match header.command {
            COMMAND_PIXELDATA64 => {
                let total = STANDARD_HEADER_SIZE as u64 + header.length as u64 * PIXEL_SIZE as u64;
                self.check_size(total)?;

                let mask =
                    ChannelMask::from_wire(header.selector).validate(self.pixel_counts.len())?;
                for channel in mask.channels() {
                    let capacity = self.pixel_counts[channel];
                    if header.length as usize > capacity {
                        return Err(ProtocolError::TooManyPixels {
                            pixels: header.length,
                            channel,
                            capacity,
                        });
                    }
                }
                Ok(total as usize)
            }
            COMMAND_PEAKDATA => {
                if header.selector != self.band_count {
                    return Err(ProtocolError::BandCountMismatch {
                        expected: self.band_count,
                        found: header.selector,
                    });
                }
                if header.length as usize != header.selector as usize * BAND_SIZE {
                    return Err(ProtocolError::TelemetryLength {
                        length: header.length,
                        bands: header.selector,
                    });
                }
                let total = STANDARD_HEADER_SIZE as u64 + header.length as u64;
                self.check_size(total)?;
                Ok(total as usize)
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    /// Reject a declared size before anything is read for it
    pub fn check_size(&self, declared: u64) -> Result<(), ProtocolError> {
        if declared > self.max_packet_size as u64 {
            return Err(ProtocolError::PacketTooLarge {
                declared: declared.min(usize::MAX as u64) as usize,
                max: self.max_packet_size,
            });
        }
        Ok(())
    }

    /// Largest compressed packet accepted: its header plus the worst-case
    /// zlib stream for a maximal packet (stored blocks, no compression)
    pub fn max_compressed_size(&self) -> usize {
        let n = self.max_packet_size;
        COMPRESSED_HEADER_SIZE + n + 5 * (n / 16_383 + 1) + 6
    }

    /// Reject a compressed packet's declared wire size before reading it
    pub fn check_compressed_size(&self, declared: u64) -> Result<(), ProtocolError> {
        let max = self.max_compressed_size();
        if declared > max as u64 {
            return Err(ProtocolError::PacketTooLarge {
                declared: declared.min(usize::MAX as u64) as usize,
                max,
            });
        }
        Ok(())
    }
}

/// Pixel data for one or more channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCommand {
    pub channels: ChannelMask,
    pub timestamp: Timestamp,
    /// Packed RGB, `pixel_count * 3` bytes
    pub pixels: Bytes,
}

impl FrameCommand {
    pub fn pixel_count(&self) -> usize {
        self.pixels.len() / PIXEL_SIZE
    }

    /// Serialise as a standard packet
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(STANDARD_HEADER_SIZE + self.pixels.len());
        StandardHeader {
            command: COMMAND_PIXELDATA64,
            selector: self.channels.bits(),
            length: self.pixel_count() as u32,
            seconds: self.timestamp.seconds(),
            micros: self.timestamp.subsec_micros(),
        }
        .write(&mut out);
        out.extend_from_slice(&self.pixels[..self.pixel_count() * PIXEL_SIZE]);
        out.freeze()
    }
}

/// Audio-analyzer band peaks
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryCommand {
    pub timestamp: Timestamp,
    pub bands: Vec<f32>,
}

impl TelemetryCommand {
    /// Serialise as a standard packet
    pub fn encode(&self) -> Bytes {
        let payload = self.bands.len() * BAND_SIZE;
        let mut out = BytesMut::with_capacity(STANDARD_HEADER_SIZE + payload);
        StandardHeader {
            command: COMMAND_PEAKDATA,
            selector: self.bands.len() as u16,
            length: payload as u32,
            seconds: self.timestamp.seconds(),
            micros: self.timestamp.subsec_micros(),
        }
        .write(&mut out);
        for band in &self.bands {
            out.put_f32_le(*band);
        }
        out.freeze()
    }
}

/// A fully decoded standard packet
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Frame(FrameCommand),
    Telemetry(TelemetryCommand),
}

impl Command {
    /// Parse and validate a complete standard packet
    ///
    /// Bytes beyond the declared length are ignored.
    pub fn parse(buf: &[u8], limits: &PacketLimits) -> Result<Self, ProtocolError> {
        let header = StandardHeader::parse(buf)?;
        let total = limits.expected_len(&header)?;
        if buf.len() < total {
            return Err(ProtocolError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let payload = &buf[STANDARD_HEADER_SIZE..total];
        let command = match header.command {
            COMMAND_PIXELDATA64 => Command::Frame(FrameCommand {
                channels: ChannelMask::from_wire(header.selector),
                timestamp: header.timestamp(),
                pixels: Bytes::copy_from_slice(payload),
            }),
            _ => Command::Telemetry(TelemetryCommand {
                timestamp: header.timestamp(),
                bands: payload
                    .chunks_exact(BAND_SIZE)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            }),
        };
        Ok(command)
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Command::Frame(frame) => frame.encode(),
            Command::Telemetry(peaks) => peaks.encode(),
        }
    }
}

/// Status record returned for every acknowledged packet
///
/// Layout (64 bytes, little-endian, doubles 8-byte aligned):
/// size u32 | version u32 | clock f64 | oldest f64 | newest f64 |
/// brightness f64 | signal f64 | capacity u32 | depth u32 | fps u32 | watts u32
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckRecord {
    pub firmware_version: u32,
    /// Device wall clock, Unix seconds
    pub current_clock: f64,
    /// Seconds from now to the oldest buffered frame's display time
    pub oldest_age: f64,
    /// Seconds from now to the newest buffered frame's display time
    pub newest_age: f64,
    pub brightness: f64,
    pub signal_strength: f64,
    pub buffer_capacity: u32,
    pub buffer_depth: u32,
    pub fps: u32,
    pub watts: u32,
}

impl AckRecord {
    pub const SIZE: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = BytesMut::with_capacity(Self::SIZE);
        out.put_u32_le(Self::SIZE as u32);
        out.put_u32_le(self.firmware_version);
        out.put_f64_le(self.current_clock);
        out.put_f64_le(self.oldest_age);
        out.put_f64_le(self.newest_age);
        out.put_f64_le(self.brightness);
        out.put_f64_le(self.signal_strength);
        out.put_u32_le(self.buffer_capacity);
        out.put_u32_le(self.buffer_depth);
        out.put_u32_le(self.fps);
        out.put_u32_le(self.watts);

        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }
        let size = read_u32(buf, 0) as usize;
        if size != Self::SIZE {
            return Err(ProtocolError::PacketTooLarge {
                declared: size,
                max: Self::SIZE,
            });
        }

        Ok(Self {
            firmware_version: read_u32(buf, 4),
            current_clock: read_f64(buf, 8),
            oldest_age: read_f64(buf, 16),
            newest_age: read_f64(buf, 24),
            brightness: read_f64(buf, 32),
            signal_strength: read_f64(buf, 40),
            buffer_capacity: read_u32(buf, 48),
            buffer_depth: read_u32(buf, 52),
            fps: read_u32(buf, 56),
            watts: read_u32(buf, 60),
        })
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_f64(buf: &[u8], offset: usize) -> f64 {
    f64::from_bits(read_u64(buf, offset))
}

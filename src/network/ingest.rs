//! Ingestion coordinator
//!
//! Routes decoded packets: frames into the channel rings, analyzer peaks to
//! the telemetry consumer. Builds the acknowledgment for each packet that
//! gets one.

use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::channels::ChannelManager;
use crate::clock::Clock;
use crate::display::{DeviceHealth, Frame, InsertOutcome};
use crate::error::Result;
use crate::network::reader::DecodedPacket;
use crate::protocol::{AckRecord, Command, TelemetryCommand};

/// Ingestion statistics
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub frames: u64,
    pub frames_replaced: u64,
    pub frames_evicted: u64,
    pub frames_discarded: u64,
    pub telemetry: u64,
    pub telemetry_dropped: u64,
    pub acks: u64,
}

/// Glue between the packet reader and the rest of the device
pub struct IngestionCoordinator {
    channels: Arc<ChannelManager>,
    clock: Arc<Clock>,
    health: Arc<DeviceHealth>,
    telemetry: Option<Sender<TelemetryCommand>>,
    firmware_version: u32,
    frames: AtomicU64,
    frames_replaced: AtomicU64,
    frames_evicted: AtomicU64,
    frames_discarded: AtomicU64,
    telemetry_received: AtomicU64,
    telemetry_dropped: AtomicU64,
    acks: AtomicU64,
}

impl IngestionCoordinator {
    pub fn new(
        channels: Arc<ChannelManager>,
        clock: Arc<Clock>,
        health: Arc<DeviceHealth>,
        firmware_version: u32,
    ) -> Self {
        Self {
            channels,
            clock,
            health,
            telemetry: None,
            firmware_version,
            frames: AtomicU64::new(0),
            frames_replaced: AtomicU64::new(0),
            frames_evicted: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            telemetry_received: AtomicU64::new(0),
            telemetry_dropped: AtomicU64::new(0),
            acks: AtomicU64::new(0),
        }
    }

    /// Forward analyzer peaks to `sender`
    ///
    /// Without a consumer, peaks are counted and dropped.
    pub fn with_telemetry(mut self, sender: Sender<TelemetryCommand>) -> Self {
        self.telemetry = Some(sender);
        self
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// Route one packet; returns the acknowledgment to send, if any
    ///
    /// Frames are always acknowledged. Peaks are acknowledged only when they
    /// arrived compressed.
    pub fn dispatch(&self, packet: DecodedPacket) -> Result<Option<AckRecord>> {
        match packet.command {
            Command::Frame(command) => {
                let frame = Frame::new(command.timestamp, self.clock.now(), command.pixels);
                let outcomes = self.channels.insert(command.channels, frame)?;

                self.frames.fetch_add(1, Ordering::Relaxed);
                for (_, outcome) in &outcomes {
                    match outcome {
                        InsertOutcome::Added => {}
                        InsertOutcome::Replaced => {
                            self.frames_replaced.fetch_add(1, Ordering::Relaxed);
                        }
                        InsertOutcome::Evicted(_) => {
                            self.frames_evicted.fetch_add(1, Ordering::Relaxed);
                        }
                        InsertOutcome::Discarded => {
                            self.frames_discarded.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }

                Ok(Some(self.build_ack()))
            }
            Command::Telemetry(peaks) => {
                self.telemetry_received.fetch_add(1, Ordering::Relaxed);
                self.forward_telemetry(peaks);

                Ok(packet.compressed.then(|| self.build_ack()))
            }
        }
    }

    fn forward_telemetry(&self, peaks: TelemetryCommand) {
        let Some(sender) = &self.telemetry else {
            self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match sender.try_send(peaks) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Analyzer queue full, dropping peaks");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Analyzer gone, dropping peaks");
            }
        }
    }

    /// Snapshot of clock, primary ring and device health
    pub fn build_ack(&self) -> AckRecord {
        let now = self.clock.now();
        let ring = self.channels.primary().ring();
        self.acks.fetch_add(1, Ordering::Relaxed);

        AckRecord {
            firmware_version: self.firmware_version,
            current_clock: now.as_secs_f64(),
            oldest_age: ring.age_of_oldest(now),
            newest_age: ring.age_of_newest(now),
            brightness: self.health.brightness(),
            signal_strength: self.health.signal_strength(),
            buffer_capacity: ring.capacity() as u32,
            buffer_depth: ring.depth() as u32,
            fps: self.health.fps(),
            watts: self.health.watts(),
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            frames: self.frames.load(Ordering::Relaxed),
            frames_replaced: self.frames_replaced.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            telemetry: self.telemetry_received.load(Ordering::Relaxed),
            telemetry_dropped: self.telemetry_dropped.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
        }
    }
}

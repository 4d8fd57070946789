//! Render loop
//!
//! Pulls the due frame from every channel on a fixed cadence and hands it to
//! the LED driver. Runs independently of ingestion; the rings are the only
//! shared state.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::channels::ChannelManager;
use crate::clock::Clock;
use crate::display::buffer::Frame;
use crate::display::device::DeviceHealth;

/// Destination for frames that are due (the LED driver)
pub trait FrameSink: Send {
    fn show(&mut self, channel: usize, frame: &Frame);
}

/// Sink that only logs what would be drawn
#[derive(Debug, Default)]
pub struct TraceSink;

impl FrameSink for TraceSink {
    fn show(&mut self, channel: usize, frame: &Frame) {
        tracing::trace!(
            "Channel {} showing {} pixels due at {}",
            channel,
            frame.pixel_count(),
            frame.timestamp
        );
    }
}

/// Render loop instance
pub struct RenderLoop<S: FrameSink> {
    channels: Arc<ChannelManager>,
    clock: Arc<Clock>,
    health: Arc<DeviceHealth>,
    sink: S,
    frame_interval: Duration,
    frames_shown: u64,
    window_start: Instant,
    window_frames: u32,
}

impl<S: FrameSink> RenderLoop<S> {
    pub fn new(
        channels: Arc<ChannelManager>,
        clock: Arc<Clock>,
        health: Arc<DeviceHealth>,
        sink: S,
        fps: u32,
    ) -> Self {
        Self {
            channels,
            clock,
            health,
            sink,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            frames_shown: 0,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    /// Draw whatever is due on every channel; returns the number of channels drawn
    pub fn render_once(&mut self) -> usize {
        let now = self.clock.now();
        let synced = self.clock.is_synced();
        let mut drawn = 0;

        for channel in self.channels.iter() {
            if let Some(frame) = channel.ring().select_due(now, synced) {
                self.sink.show(channel.index(), &frame);
                drawn += 1;
            }
        }

        if drawn > 0 {
            self.frames_shown += 1;
            self.window_frames += 1;
        }

        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = (self.window_frames as f64 / elapsed.as_secs_f64()).round() as u32;
            self.health.set_fps(fps);
            self.window_start = Instant::now();
            self.window_frames = 0;
        }

        drawn
    }

    /// Frames in which at least one channel was drawn
    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Render loop started at {:.1} fps",
            1.0 / self.frame_interval.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.render_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Render loop stopped after {} frames", self.frames_shown);
    }
}

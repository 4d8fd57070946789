//! LED Frame Sender Application
//!
//! Streams a moving test pattern to a receiver, stamping each frame a fixed
//! lead ahead of now, and reports the receiver's buffer health.
//!
//! Usage: sender [target] [channel-mask] [pixels] [fps] [lead-ms] [--compress]

use anyhow::{Context, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_led_receiver::{
    clock::Timestamp,
    constants::*,
    network::FrameSender,
    protocol::{ChannelMask, FrameCommand},
};

/// Rainbow with a moving offset
fn test_pattern(pixels: usize, step: usize) -> Bytes {
    let mut out = Vec::with_capacity(pixels * PIXEL_SIZE);
    for i in 0..pixels {
        let hue = ((i + step) * 256 / pixels.max(1)) % 256;
        let (r, g, b) = match hue / 86 {
            0 => (255 - hue * 3, hue * 3, 0),
            1 => (0, 255 - (hue - 86) * 3, (hue - 86) * 3),
            _ => ((hue - 172) * 3, 0, 255 - (hue - 172) * 3),
        };
        out.extend_from_slice(&[r.min(255) as u8, g.min(255) as u8, b.min(255) as u8]);
    }
    Bytes::from(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN LED Sender");

    let compress = std::env::args().any(|a| a == "--compress");
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|a| !a.starts_with("--"))
        .collect();

    let target: SocketAddr = args
        .first()
        .cloned()
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_INGEST_PORT))
        .parse()
        .context("Invalid target address")?;
    let mask: u16 = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(1);
    let pixels: usize = args
        .get(2)
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(DEFAULT_PIXEL_COUNT);
    let fps: u32 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(30);
    let lead_ms: u64 = args.get(4).map(|s| s.parse()).transpose()?.unwrap_or(500);

    let mut sender = FrameSender::connect(target, Duration::from_secs(3)).await?;
    if compress {
        sender = sender.with_compression(6);
    }

    tracing::info!(
        "Target receiver: {} (mask {:#06x}, {} pixels, {} fps, {} ms lead{})",
        target,
        mask,
        pixels,
        fps,
        lead_ms,
        if sender.is_compressing() { ", compressed" } else { "" }
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps.max(1));
    let mut last_stats_time = Instant::now();
    let mut step = 0usize;

    loop {
        ticker.tick().await;

        let due = Timestamp::from_system_time(SystemTime::now())
            .offset_by(lead_ms as i64 * 1_000);
        let frame = FrameCommand {
            channels: ChannelMask::from_wire(mask),
            timestamp: due,
            pixels: test_pattern(pixels, step),
        };
        step = step.wrapping_add(1);

        let ack = sender.send_frame(&frame).await?;

        // Periodic stats
        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            last_stats_time = Instant::now();
            let stats = sender.stats();
            tracing::info!(
                "Sent {} frames ({} bytes); receiver v{} buffer {}/{}, ages {:+.3}s..{:+.3}s, {} fps",
                stats.packets_sent,
                stats.bytes_sent,
                ack.firmware_version,
                ack.buffer_depth,
                ack.buffer_capacity,
                ack.oldest_age,
                ack.newest_age,
                ack.fps
            );
        }
    }
}

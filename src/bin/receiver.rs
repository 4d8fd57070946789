//! LED Frame Receiver Application
//!
//! Accepts timestamped frames over TCP, buffers them per channel and plays
//! each one when its display time arrives.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_led_receiver::{
    channels::ChannelManager,
    clock::{Clock, ClockService},
    config::AppConfig,
    display::{DeviceHealth, RenderLoop, TraceSink},
    network::{create_listener, IngestServer, IngestionCoordinator},
    protocol::{PacketLimits, TelemetryCommand},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN LED Receiver");

    // Config path from args, else the platform default
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::load_or_default()?,
    };
    config.validate()?;

    println!("\n=== Output Channels ===");
    for (index, device) in config.devices.iter().enumerate() {
        println!("  {} [bit {}]: {} pixels", device.name, index, device.pixel_count);
    }

    // Fatal if the minimum buffer count cannot be afforded
    let channels = Arc::new(
        ChannelManager::from_config(&config).context("Cannot reserve frame buffers")?,
    );
    let plan = channels.plan();
    println!(
        "  {} frames per channel, {} of {} usable bytes ({} affordable)\n",
        plan.capacity,
        plan.total_bytes(),
        plan.usable_bytes,
        plan.affordable
    );
    let clock = Arc::new(Clock::system());
    let health = Arc::new(DeviceHealth::new());

    // Analyzer consumer
    let (telemetry_tx, telemetry_rx) = bounded::<TelemetryCommand>(config.telemetry.queue_depth);
    std::thread::Builder::new()
        .name("analyzer".into())
        .spawn(move || {
            for peaks in telemetry_rx.iter() {
                let loudest = peaks.bands.iter().cloned().fold(0.0f32, f32::max);
                tracing::trace!(
                    "Peaks for {}: {} bands, loudest {:.3}",
                    peaks.timestamp,
                    peaks.bands.len(),
                    loudest
                );
            }
        })?;

    let ingest = Arc::new(
        IngestionCoordinator::new(
            channels.clone(),
            clock.clone(),
            health.clone(),
            config.firmware_version,
        )
        .with_telemetry(telemetry_tx),
    );

    let server = Arc::new(IngestServer::new(
        config.network.clone(),
        PacketLimits::from_config(&config),
        ingest.clone(),
    ));
    let listener = create_listener(&config.network).context("Cannot open ingestion socket")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_task = {
        let server = server.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { server.serve(listener, shutdown).await })
    };

    let clock_service = Arc::new(ClockService::new(
        clock.clone(),
        config.clock.clone(),
        health.clone(),
    ));
    let clock_task = tokio::spawn(clock_service.clone().run(shutdown_rx.clone()));

    let render = RenderLoop::new(
        channels.clone(),
        clock.clone(),
        health.clone(),
        TraceSink,
        config.render.fps,
    );
    let render_task = tokio::spawn(render.run(shutdown_rx.clone()));

    tracing::info!("Waiting for frames on port {}", config.network.port);

    // Periodic stats until ctrl-c
    let mut stats_ticker = tokio::time::interval(Duration::from_secs(5));
    stats_ticker.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = stats_ticker.tick() => {
                let now = clock.now();
                let server_stats = server.stats();
                let ingest_stats = ingest.stats();
                let sync_stats = clock_service.stats();

                tracing::info!(
                    "Receiver stats: {} connections ({} failed), {} packets ({} compressed), {} bytes, {} acks",
                    server_stats.connections,
                    server_stats.connections_failed,
                    server_stats.packets_received,
                    server_stats.compressed_packets,
                    server_stats.bytes_received,
                    server_stats.acks_sent
                );
                tracing::info!(
                    "Inflate stats: {} packets, {} -> {} bytes ({:.1}x), {} failed",
                    server_stats.inflate.packets_inflated,
                    server_stats.inflate.bytes_in,
                    server_stats.inflate.bytes_out,
                    server_stats.inflate.compression_ratio(),
                    server_stats.inflate.failures
                );
                tracing::info!(
                    "Ingest stats: {} frames ({} replaced, {} evicted, {} discarded), {} peaks ({} dropped)",
                    ingest_stats.frames,
                    ingest_stats.frames_replaced,
                    ingest_stats.frames_evicted,
                    ingest_stats.frames_discarded,
                    ingest_stats.telemetry,
                    ingest_stats.telemetry_dropped
                );

                for channel in channels.iter() {
                    let ring = channel.ring().stats(now);
                    tracing::info!(
                        "Channel {} ({}): {}/{} frames ({:.0}% full), ages {:+.3}s..{:+.3}s, {} shown, {} skipped",
                        channel.index(),
                        channel.name(),
                        ring.depth,
                        ring.capacity,
                        ring.fill_level() * 100.0,
                        ring.oldest_age,
                        ring.newest_age,
                        ring.consumed,
                        ring.skipped
                    );
                }

                tracing::info!(
                    "Clock {} ({}), {} fps, sync {}/{} ok",
                    now,
                    if clock.is_synced() { "synced" } else { "unsynced" },
                    health.fps(),
                    sync_stats.successes,
                    sync_stats.attempts
                );
            }
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    server_task.await??;
    clock_task.await?;
    render_task.await?;

    Ok(())
}

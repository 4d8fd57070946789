//! Clock synchronisation service
//!
//! Queries a network time server over UDP and corrects the shared clock
//! when it is off by more than the configured threshold.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};

use crate::config::ClockConfig;
use crate::display::DeviceHealth;
use crate::error::ClockError;

use super::ntp::{build_request, parse_reply};
use super::wall::{Clock, Correction};

/// Result of one sync attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    /// An update was in progress; nothing was sent
    Suppressed,
    /// Server time was within the threshold; clock left alone
    Unchanged { delta: f64 },
    /// Clock was moved by `delta` seconds
    Corrected { delta: f64 },
}

/// Sync attempt counters
#[derive(Debug, Clone, Default)]
pub struct ClockServiceStats {
    pub attempts: u64,
    /// Attempts skipped because an update was running
    pub suppressed: u64,
    pub successes: u64,
    pub corrections: u64,
    pub failures: u64,
}

/// Network time client bound to the shared clock
pub struct ClockService {
    clock: Arc<Clock>,
    config: ClockConfig,
    health: Arc<DeviceHealth>,
    /// Held for a whole attempt so attempts never overlap
    socket: Mutex<Option<UdpSocket>>,
    attempts: AtomicU64,
    suppressed: AtomicU64,
    successes: AtomicU64,
    corrections: AtomicU64,
    failures: AtomicU64,
}

impl ClockService {
    pub fn new(clock: Arc<Clock>, config: ClockConfig, health: Arc<DeviceHealth>) -> Self {
        Self {
            clock,
            config,
            health,
            socket: Mutex::new(None),
            attempts: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            corrections: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    /// Perform one synchronisation attempt
    ///
    /// Skipped entirely while a device update is in progress. Concurrent
    /// callers queue behind the attempt already running.
    pub async fn sync_once(&self) -> Result<SyncOutcome, ClockError> {
        if self.health.update_in_progress() {
            tracing::debug!("Update in progress, skipping clock sync");
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return Ok(SyncOutcome::Suppressed);
        }

        let mut slot = self.socket.lock().await;
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let socket = match slot.take() {
            Some(socket) => socket,
            None => UdpSocket::bind(("0.0.0.0", 0)).await?,
        };

        let result = self.exchange(&socket).await;

        // A socket that failed at the OS level is rebuilt next time
        if !matches!(result, Err(ClockError::Socket(_))) {
            *slot = Some(socket);
        }

        match result {
            Ok(outcome) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                if matches!(outcome, SyncOutcome::Corrected { .. }) {
                    self.corrections.fetch_add(1, Ordering::Relaxed);
                }
                Ok(outcome)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn exchange(&self, socket: &UdpSocket) -> Result<SyncOutcome, ClockError> {
        let server = self.resolve().await;
        let mut buf = [0u8; 512];

        // Late replies from an earlier attempt must not be taken for this one
        while let Ok((stale, from)) = socket.try_recv_from(&mut buf) {
            tracing::debug!("Discarding {} stale bytes from {}", stale, from);
        }

        tracing::debug!("Sending time request to {}", server);
        socket.send_to(&build_request(), server).await?;

        let timeout = self.config.reply_timeout();
        let poll = self.config.poll_increment();
        let started = Instant::now();

        let received = loop {
            match tokio::time::timeout(poll, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, _))) => break len,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) if started.elapsed() >= timeout => {
                    tracing::warn!("No time reply from {} after {:?}", server, timeout);
                    return Err(ClockError::Timeout(timeout));
                }
                Err(_) => {}
            }
        };

        let candidate = parse_reply(&buf[..received])?;
        let correction = self.clock.try_correct(candidate, self.config.threshold());

        Ok(match correction {
            Correction::Applied { delta } => {
                tracing::info!(
                    "Adjusted clock by {:+.3}s, now {}",
                    delta,
                    self.clock.now()
                );
                SyncOutcome::Corrected { delta }
            }
            Correction::WithinThreshold { delta } => {
                tracing::debug!(
                    "Clock within threshold ({:+.3}s), leaving it at {}",
                    delta,
                    self.clock.now()
                );
                SyncOutcome::Unchanged { delta }
            }
        })
    }

    /// Configured server, or the fallback address when it cannot be resolved
    async fn resolve(&self) -> SocketAddr {
        let lookup = tokio::net::lookup_host((self.config.server.as_str(), self.config.port)).await;
        match lookup {
            Ok(mut addrs) => match addrs.find(SocketAddr::is_ipv4) {
                Some(addr) => addr,
                None => self.config.fallback,
            },
            Err(e) => {
                tracing::warn!(
                    "Could not resolve {} ({}), using {}",
                    self.config.server,
                    e,
                    self.config.fallback
                );
                self.config.fallback
            }
        }
    }

    pub fn stats(&self) -> ClockServiceStats {
        ClockServiceStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Pause before the next attempt
    fn next_wait(&self) -> Duration {
        if self.clock.is_synced() {
            self.config.resync_interval()
        } else {
            self.config.retry_interval()
        }
    }

    /// Sync periodically until `shutdown` flips to true
    ///
    /// Retries on the short interval until the first success, then settles
    /// to the resync interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Clock sync disabled");
            return;
        }

        tracing::info!(
            "Clock service started against {}:{}",
            self.config.server,
            self.config.port
        );

        loop {
            if let Err(e) = self.sync_once().await {
                tracing::warn!("Clock sync failed: {}", e);
            }

            let wait = self.next_wait();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Clock service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ntp::{build_reply, NTP_PACKET_LENGTH};
    use crate::clock::{ManualTimeSource, Timestamp};

    /// Answer every request with `reply`
    async fn fake_server(reply: [u8; NTP_PACKET_LENGTH]) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((_, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&reply, from).await;
            }
        });
        addr
    }

    fn config_for(addr: SocketAddr) -> ClockConfig {
        ClockConfig {
            server: addr.ip().to_string(),
            port: addr.port(),
            fallback: addr,
            reply_timeout_ms: 500,
            poll_increment_ms: 20,
            ..ClockConfig::default()
        }
    }

    fn manual_clock(secs: u64) -> Arc<Clock> {
        Arc::new(Clock::with_source(ManualTimeSource::new(Timestamp::from_parts(
            secs, 0,
        ))))
    }

    #[tokio::test]
    async fn test_large_offset_is_corrected() {
        let server_time = Timestamp::from_parts(2_000, 500_000);
        let addr = fake_server(build_reply(server_time)).await;
        let clock = manual_clock(1_000);
        let service =
            ClockService::new(clock.clone(), config_for(addr), Arc::new(DeviceHealth::new()));

        let outcome = service.sync_once().await.unwrap();
        match outcome {
            SyncOutcome::Corrected { delta } => assert!((delta - 1_000.5).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(clock.now(), server_time);
        assert!(clock.is_synced());
        assert_eq!(service.stats().corrections, 1);
    }

    #[tokio::test]
    async fn test_small_offset_marks_synced_without_change() {
        let addr = fake_server(build_reply(Timestamp::from_parts(1_000, 100_000))).await;
        let clock = manual_clock(1_000);
        let service =
            ClockService::new(clock.clone(), config_for(addr), Arc::new(DeviceHealth::new()));

        assert!(matches!(
            service.sync_once().await.unwrap(),
            SyncOutcome::Unchanged { .. }
        ));
        assert_eq!(clock.now(), Timestamp::from_parts(1_000, 0));
        assert!(clock.is_synced());
    }

    #[tokio::test]
    async fn test_bogus_reply_leaves_clock_alone() {
        let addr = fake_server(build_reply(Timestamp::from_parts(5_000, 0))).await;
        let clock = manual_clock(1_000);
        let service =
            ClockService::new(clock.clone(), config_for(addr), Arc::new(DeviceHealth::new()));

        assert!(matches!(
            service.sync_once().await,
            Err(ClockError::BogusReply)
        ));
        assert!(!clock.is_synced());
        assert_eq!(service.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_suppressed_during_update() {
        let addr = fake_server(build_reply(Timestamp::from_parts(2_000, 1))).await;
        let clock = manual_clock(1_000);
        let health = Arc::new(DeviceHealth::new());
        let service = ClockService::new(clock.clone(), config_for(addr), health.clone());

        let guard = health.begin_update();
        assert_eq!(service.sync_once().await.unwrap(), SyncOutcome::Suppressed);
        assert_eq!(service.stats().attempts, 0);
        drop(guard);

        assert!(matches!(
            service.sync_once().await.unwrap(),
            SyncOutcome::Corrected { .. }
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let clock = manual_clock(1_000);
        let mut config = config_for(addr);
        config.reply_timeout_ms = 100;
        let service = ClockService::new(clock.clone(), config, Arc::new(DeviceHealth::new()));

        let started = Instant::now();
        assert!(matches!(
            service.sync_once().await,
            Err(ClockError::Timeout(_))
        ));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!clock.is_synced());
    }

    #[tokio::test]
    async fn test_unresolvable_server_uses_fallback() {
        let server_time = Timestamp::from_parts(2_000, 500_000);
        let addr = fake_server(build_reply(server_time)).await;
        let clock = manual_clock(1_000);
        let config = ClockConfig {
            server: "no-such-host.invalid".to_string(),
            ..config_for(addr)
        };
        let service = ClockService::new(clock.clone(), config, Arc::new(DeviceHealth::new()));

        assert!(matches!(
            service.sync_once().await.unwrap(),
            SyncOutcome::Corrected { .. }
        ));
        assert_eq!(clock.now(), server_time);
    }

    #[tokio::test]
    async fn test_stale_reply_is_discarded() {
        let server_time = Timestamp::from_parts(2_000, 500_000);
        let addr = fake_server(build_reply(server_time)).await;
        let clock = manual_clock(1_000);
        let service =
            ClockService::new(clock.clone(), config_for(addr), Arc::new(DeviceHealth::new()));
        service.sync_once().await.unwrap();

        // A late reply carrying a very different time lands between attempts
        let local = service
            .socket
            .lock()
            .await
            .as_ref()
            .unwrap()
            .local_addr()
            .unwrap();
        let late = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        late.send_to(&build_reply(Timestamp::from_parts(9_000, 1)), local)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            service.sync_once().await.unwrap(),
            SyncOutcome::Unchanged { .. }
        ));
        assert_eq!(clock.now(), server_time);
    }

    /// Let the spawned service loop run up to its next sleep
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_quickly_until_synced() {
        let clock = manual_clock(1_000);
        let health = Arc::new(DeviceHealth::new());
        let config = ClockConfig {
            retry_interval_secs: 30,
            resync_interval_secs: 3_600,
            ..ClockConfig::default()
        };
        let service = Arc::new(ClockService::new(clock, config, health.clone()));
        // Keeps every attempt off the network
        let _guard = health.begin_update();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(service.clone().run(shutdown_rx));
        settle().await;
        assert_eq!(service.stats().suppressed, 1);

        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert_eq!(service.stats().suppressed, 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(service.stats().suppressed, 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resyncs_slowly_once_synced() {
        let clock = manual_clock(1_000);
        clock.try_correct(Timestamp::from_parts(1_000, 0), Duration::from_millis(250));
        assert!(clock.is_synced());

        let health = Arc::new(DeviceHealth::new());
        let config = ClockConfig {
            retry_interval_secs: 30,
            resync_interval_secs: 3_600,
            ..ClockConfig::default()
        };
        let service = Arc::new(ClockService::new(clock, config, health.clone()));
        let _guard = health.begin_update();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(service.clone().run(shutdown_rx));
        settle().await;
        assert_eq!(service.stats().suppressed, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(service.stats().suppressed, 1);

        tokio::time::advance(Duration::from_secs(3_570)).await;
        settle().await;
        assert_eq!(service.stats().suppressed, 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}

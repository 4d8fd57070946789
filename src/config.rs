//! Application configuration
//!
//! Loaded from TOML. Every section has defaults so a missing or partial
//! file still produces a runnable receiver.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Version reported back to the sender in every acknowledgment
    pub firmware_version: u32,
    pub network: NetworkConfig,
    /// Output channels, in channel-mask bit order
    pub devices: Vec<DeviceConfig>,
    pub buffers: BufferConfig,
    pub clock: ClockConfig,
    pub telemetry: TelemetryConfig,
    pub render: RenderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            firmware_version: FIRMWARE_VERSION,
            network: NetworkConfig::default(),
            devices: vec![DeviceConfig::default()],
            buffers: BufferConfig::default(),
            clock: ClockConfig::default(),
            telemetry: TelemetryConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults if no file exists
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform config path, e.g. `~/.config/lan-led-receiver/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-led-receiver")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(Error::Config("at least one device is required".into()));
        }
        if self.devices.len() > MAX_CHANNELS {
            return Err(Error::Config(format!(
                "{} devices configured, channel mask supports at most {}",
                self.devices.len(),
                MAX_CHANNELS
            )));
        }
        if let Some(device) = self.devices.iter().find(|d| d.pixel_count == 0) {
            return Err(Error::Config(format!("device '{}' has no pixels", device.name)));
        }
        if self.buffers.min_buffers == 0 || self.buffers.min_buffers > self.buffers.max_buffers {
            return Err(Error::Config(format!(
                "invalid buffer range [{}, {}]",
                self.buffers.min_buffers, self.buffers.max_buffers
            )));
        }
        if let Some(max) = self.buffers.max_packet_size {
            if max < STANDARD_HEADER_SIZE {
                return Err(Error::Config(format!(
                    "max_packet_size {} is smaller than the {} byte header",
                    max, STANDARD_HEADER_SIZE
                )));
            }
        }
        if self.network.receive_timeout_ms == 0 || self.clock.reply_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.telemetry.band_count == 0 {
            return Err(Error::Config("band_count must be non-zero".into()));
        }
        if self.render.fps == 0 {
            return Err(Error::Config("render fps must be non-zero".into()));
        }
        Ok(())
    }

    /// Largest packet accepted on the wire
    ///
    /// Defaults to a full frame for the largest device.
    pub fn max_packet_size(&self) -> usize {
        self.buffers.max_packet_size.unwrap_or_else(|| {
            let largest = self
                .devices
                .iter()
                .map(|d| d.pixel_count)
                .max()
                .unwrap_or(0);
            STANDARD_HEADER_SIZE + largest * PIXEL_SIZE
        })
    }

    /// Pixel counts per channel, in mask bit order
    pub fn pixel_counts(&self) -> Vec<usize> {
        self.devices.iter().map(|d| d.pixel_count).collect()
    }
}

/// Ingestion socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
    /// Per-read timeout on an accepted connection
    pub receive_timeout_ms: u64,
    pub listen_backlog: i32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_INGEST_PORT,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            listen_backlog: 6,
        }
    }
}

impl NetworkConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// One physical output channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub pixel_count: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "strip0".to_string(),
            pixel_count: DEFAULT_PIXEL_COUNT,
        }
    }
}

/// Frame buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Memory available for frame buffers before the reserve is taken off
    pub pool_bytes: usize,
    /// Memory kept back for everything else
    pub reserve_bytes: usize,
    pub min_buffers: usize,
    pub max_buffers: usize,
    /// Overrides the derived maximum packet size
    pub max_packet_size: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pool_bytes: 4 * 1024 * 1024,
            reserve_bytes: DEFAULT_RESERVE_BYTES,
            min_buffers: MIN_BUFFERS,
            max_buffers: MAX_BUFFERS,
            max_packet_size: None,
        }
    }
}

/// Network time settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub enabled: bool,
    pub server: String,
    pub port: u16,
    /// Used when the server name cannot be resolved
    pub fallback: SocketAddr,
    /// Corrections smaller than this are not applied
    pub threshold_ms: u64,
    pub reply_timeout_ms: u64,
    pub poll_increment_ms: u64,
    pub resync_interval_secs: u64,
    /// Interval between attempts until the first successful sync
    pub retry_interval_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server: "pool.ntp.org".to_string(),
            port: crate::clock::ntp::NTP_PORT,
            fallback: SocketAddr::from(([216, 239, 35, 12], crate::clock::ntp::NTP_PORT)),
            threshold_ms: 250,
            reply_timeout_ms: 10_000,
            poll_increment_ms: 100,
            resync_interval_secs: 3600,
            retry_interval_secs: 30,
        }
    }
}

impl ClockConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn poll_increment(&self) -> Duration {
        Duration::from_millis(self.poll_increment_ms.max(1))
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Audio-analyzer telemetry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub band_count: u16,
    /// Bounded queue between ingestion and the analyzer
    pub queue_depth: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            band_count: DEFAULT_BAND_COUNT,
            queue_depth: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { fps: DEFAULT_RENDER_FPS }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.max_packet_size(),
            STANDARD_HEADER_SIZE + DEFAULT_PIXEL_COUNT * PIXEL_SIZE
        );
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            firmware_version = 40

            [[devices]]
            name = "left"
            pixel_count = 300

            [[devices]]
            name = "right"
            pixel_count = 120

            [network]
            port = 50000
            "#,
        )
        .unwrap();

        assert_eq!(config.firmware_version, 40);
        assert_eq!(config.network.port, 50000);
        assert_eq!(config.network.receive_timeout_ms, DEFAULT_RECEIVE_TIMEOUT_MS);
        assert_eq!(config.pixel_counts(), vec![300, 120]);
        assert_eq!(config.max_packet_size(), STANDARD_HEADER_SIZE + 300 * PIXEL_SIZE);
    }

    #[test]
    fn test_rejects_bad_buffer_range() {
        let mut config = AppConfig::default();
        config.buffers.min_buffers = 10;
        config.buffers.max_buffers = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_too_many_devices() {
        let mut config = AppConfig::default();
        config.devices = vec![DeviceConfig::default(); MAX_CHANNELS + 1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_max_packet_size() {
        let mut config = AppConfig::default();
        config.buffers.max_packet_size = Some(1000);
        assert_eq!(config.max_packet_size(), 1000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("lan-led-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.clock.server = "time.example.net".into();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.clock.server, "time.example.net");
        assert_eq!(loaded.devices.len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}

//! Live device health reported back to the sender

use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Values owned by collaborators (LED driver, radio, power monitor) and read
/// when building acknowledgments
#[derive(Debug)]
pub struct DeviceHealth {
    brightness: AtomicCell<f64>,
    signal_strength: AtomicCell<f64>,
    fps: AtomicU32,
    watts: AtomicU32,
    updates: AtomicUsize,
}

impl DeviceHealth {
    pub fn new() -> Self {
        Self {
            brightness: AtomicCell::new(255.0),
            signal_strength: AtomicCell::new(0.0),
            fps: AtomicU32::new(0),
            watts: AtomicU32::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn brightness(&self) -> f64 {
        self.brightness.load()
    }

    pub fn set_brightness(&self, value: f64) {
        self.brightness.store(value);
    }

    /// Wireless signal strength in dBm
    pub fn signal_strength(&self) -> f64 {
        self.signal_strength.load()
    }

    pub fn set_signal_strength(&self, dbm: f64) {
        self.signal_strength.store(dbm);
    }

    /// Measured render frames per second
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    pub fn set_fps(&self, fps: u32) {
        self.fps.store(fps, Ordering::Relaxed);
    }

    /// Measured power draw
    pub fn watts(&self) -> u32 {
        self.watts.load(Ordering::Relaxed)
    }

    pub fn set_watts(&self, watts: u32) {
        self.watts.store(watts, Ordering::Relaxed);
    }

    /// Whether a firmware/content update is running
    pub fn update_in_progress(&self) -> bool {
        self.updates.load(Ordering::SeqCst) > 0
    }

    /// Mark an update as running until the guard drops
    ///
    /// Clock synchronisation is suppressed while any guard is alive.
    pub fn begin_update(self: &Arc<Self>) -> UpdateGuard {
        self.updates.fetch_add(1, Ordering::SeqCst);
        UpdateGuard {
            health: Arc::clone(self),
        }
    }
}

impl Default for DeviceHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Ends one running update on drop
#[derive(Debug)]
pub struct UpdateGuard {
    health: Arc<DeviceHealth>,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.health.updates.fetch_sub(1, Ordering::SeqCst);
    }
}

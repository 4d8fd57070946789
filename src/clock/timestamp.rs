//! Absolute wall-clock timestamps with microsecond resolution

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constants::MICROS_PER_SECOND;

/// Microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Build from the wire's split seconds + microseconds fields
    ///
    /// Saturates rather than wrapping on absurd values.
    pub fn from_parts(seconds: u64, micros: u64) -> Self {
        Self(
            seconds
                .saturating_mul(MICROS_PER_SECOND)
                .saturating_add(micros),
        )
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        if secs <= 0.0 {
            Self::ZERO
        } else {
            Self((secs * MICROS_PER_SECOND as f64).round() as u64)
        }
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self(since_epoch.as_micros().min(u64::MAX as u128) as u64)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    pub fn seconds(self) -> u64 {
        self.0 / MICROS_PER_SECOND
    }

    pub fn subsec_micros(self) -> u64 {
        self.0 % MICROS_PER_SECOND
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_SECOND as f64
    }

    /// Signed seconds from `other` to `self` (positive when `self` is later)
    pub fn secs_since(self, other: Timestamp) -> f64 {
        self.micros_since(other) as f64 / MICROS_PER_SECOND as f64
    }

    /// Signed microseconds from `other` to `self`
    pub fn micros_since(self, other: Timestamp) -> i64 {
        let diff = self.0 as i128 - other.0 as i128;
        diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Shift by a signed number of microseconds, clamping at the epoch
    pub fn offset_by(self, micros: i64) -> Self {
        let shifted = self.0 as i128 + micros as i128;
        Self(shifted.clamp(0, u64::MAX as i128) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = (self.subsec_micros() * 1000) as u32;
        match chrono::DateTime::from_timestamp(self.seconds() as i64, nanos) {
            Some(dt) => write!(f, "{}", dt.format("%d %b %Y %H:%M:%S%.6f")),
            None => write!(f, "{}.{:06}", self.seconds(), self.subsec_micros()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts() {
        let ts = Timestamp::from_parts(1_700_000_000, 250_000);
        assert_eq!(ts.seconds(), 1_700_000_000);
        assert_eq!(ts.subsec_micros(), 250_000);
        assert!((ts.as_secs_f64() - 1_700_000_000.25).abs() < 1e-6);
    }

    #[test]
    fn test_parts_saturate() {
        let ts = Timestamp::from_parts(u64::MAX, 5);
        assert_eq!(ts.as_micros(), u64::MAX);
    }

    #[test]
    fn test_signed_difference() {
        let a = Timestamp::from_parts(100, 0);
        let b = Timestamp::from_parts(101, 500_000);
        assert_eq!(b.micros_since(a), 1_500_000);
        assert_eq!(a.micros_since(b), -1_500_000);
        assert!((a.secs_since(b) + 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_offset_clamps() {
        let ts = Timestamp::from_micros(10);
        assert_eq!(ts.offset_by(-20), Timestamp::ZERO);
        assert_eq!(ts.offset_by(5).as_micros(), 15);
    }

    #[test]
    fn test_display() {
        let ts = Timestamp::from_parts(0, 1);
        assert_eq!(ts.to_string(), "01 Jan 1970 00:00:00.000001");
    }
}

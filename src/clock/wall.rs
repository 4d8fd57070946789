//! Process-wide wall clock
//!
//! The clock is an offset over a base time source. Corrections replace the
//! offset under a write lock, so readers never observe a half-applied change.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use super::timestamp::Timestamp;

/// Base time the clock offsets from
pub trait TimeSource: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// The operating system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_system_time(SystemTime::now())
    }
}

/// A time source that only moves when told to
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    micros: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicU64::new(start.as_micros()),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.micros.store(time.as_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

impl<T: TimeSource> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ClockState {
    offset_micros: i64,
    synced: bool,
}

/// Result of offering the clock a candidate time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Candidate was close enough; the clock was left alone
    WithinThreshold { delta: f64 },
    /// Clock now reads the candidate time
    Applied { delta: f64 },
}

impl Correction {
    /// Signed seconds between the candidate and the clock before correction
    pub fn delta(&self) -> f64 {
        match *self {
            Correction::WithinThreshold { delta } | Correction::Applied { delta } => delta,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, Correction::Applied { .. })
    }
}

/// Shared wall clock
pub struct Clock {
    source: Box<dyn TimeSource>,
    state: RwLock<ClockState>,
}

impl Clock {
    /// Clock backed by the operating system time
    pub fn system() -> Self {
        Self::with_source(SystemTimeSource)
    }

    pub fn with_source(source: impl TimeSource) -> Self {
        Self {
            source: Box::new(source),
            state: RwLock::new(ClockState::default()),
        }
    }

    /// Current corrected wall time
    pub fn now(&self) -> Timestamp {
        let state = self.state.read();
        self.source.now().offset_by(state.offset_micros)
    }

    /// Whether a sync has succeeded at least once
    pub fn is_synced(&self) -> bool {
        self.state.read().synced
    }

    /// Apply `candidate` if it differs from the current time by at least `threshold`
    ///
    /// Either outcome marks the clock as synced: a candidate inside the
    /// threshold confirms the clock is already accurate.
    pub fn try_correct(&self, candidate: Timestamp, threshold: Duration) -> Correction {
        let mut state = self.state.write();
        let base = self.source.now();
        let current = base.offset_by(state.offset_micros);
        let delta_micros = candidate.micros_since(current);
        let delta = delta_micros as f64 / 1_000_000.0;

        state.synced = true;

        if delta_micros.unsigned_abs() < threshold.as_micros() as u64 {
            Correction::WithinThreshold { delta }
        } else {
            state.offset_micros = candidate.micros_since(base);
            Correction::Applied { delta }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.state.read();
        f.debug_struct("Clock")
            .field("offset_micros", &state.offset_micros)
            .field("synced", &state.synced)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const THRESHOLD: Duration = Duration::from_millis(250);

    fn manual_clock(start: Timestamp) -> (Arc<ManualTimeSource>, Clock) {
        let source = Arc::new(ManualTimeSource::new(start));
        let clock = Clock::with_source(source.clone());
        (source, clock)
    }

    #[test]
    fn test_small_delta_leaves_clock_unchanged() {
        let start = Timestamp::from_parts(1_700_000_000, 0);
        let (_, clock) = manual_clock(start);

        let candidate = Timestamp::from_parts(1_700_000_000, 200_000);
        let correction = clock.try_correct(candidate, THRESHOLD);

        assert!(!correction.applied());
        assert!((correction.delta() - 0.2).abs() < 1e-9);
        assert_eq!(clock.now(), start);
        assert!(clock.is_synced());
    }

    #[test]
    fn test_large_delta_applies_exact_value() {
        let start = Timestamp::from_parts(1_700_000_000, 0);
        let (source, clock) = manual_clock(start);

        let candidate = Timestamp::from_parts(1_700_000_005, 123_456);
        let correction = clock.try_correct(candidate, THRESHOLD);

        assert!(correction.applied());
        assert_eq!(clock.now(), candidate);

        // Corrected clock keeps ticking with the base source
        source.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), Timestamp::from_parts(1_700_000_006, 123_456));
    }

    #[test]
    fn test_threshold_boundary_applies() {
        let start = Timestamp::from_parts(1_700_000_000, 0);
        let (_, clock) = manual_clock(start);

        let candidate = Timestamp::from_parts(1_699_999_999, 750_000);
        let correction = clock.try_correct(candidate, THRESHOLD);

        assert!(correction.applied());
        assert!((correction.delta() + 0.25).abs() < 1e-9);
        assert_eq!(clock.now(), candidate);
    }

    #[test]
    fn test_unsynced_by_default() {
        let clock = Clock::system();
        assert!(!clock.is_synced());
        assert!(clock.now().seconds() > 0);
    }
}

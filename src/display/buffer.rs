//! Timestamp-ordered frame ring
//!
//! Each output channel owns one ring. Ingestion inserts, the render loop
//! pops whatever is due. Critical sections are a handful of `VecDeque`
//! operations under a `parking_lot` mutex; counters and depth are atomics so
//! telemetry reads never take the lock.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::clock::Timestamp;
use crate::constants::PIXEL_SIZE;

/// One RGB pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A decoded frame for one channel
///
/// Pixel data is reference-counted so a frame addressed to several channels
/// shares one copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// When the frame should be shown
    pub timestamp: Timestamp,
    /// When the frame arrived
    pub received_at: Timestamp,
    pixels: Bytes,
}

impl Frame {
    /// `pixels` is packed RGB; a trailing partial pixel is ignored
    pub fn new(timestamp: Timestamp, received_at: Timestamp, pixels: Bytes) -> Self {
        let whole = pixels.len() - pixels.len() % PIXEL_SIZE;
        Self {
            timestamp,
            received_at,
            pixels: pixels.slice(..whole),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len() / PIXEL_SIZE
    }

    pub fn pixel(&self, index: usize) -> Option<Rgb> {
        let start = index.checked_mul(PIXEL_SIZE)?;
        let px = self.pixels.get(start..start + PIXEL_SIZE)?;
        Some(Rgb::new(px[0], px[1], px[2]))
    }

    pub fn pixels(&self) -> impl Iterator<Item = Rgb> + '_ {
        self.pixels
            .chunks_exact(PIXEL_SIZE)
            .map(|px| Rgb::new(px[0], px[1], px[2]))
    }

    /// Packed RGB bytes
    pub fn raw(&self) -> &Bytes {
        &self.pixels
    }

    /// Seconds from `now` until this frame is due (negative once past)
    pub fn time_till_due(&self, now: Timestamp) -> f64 {
        self.timestamp.secs_since(now)
    }
}

/// What `FrameRing::insert` did with a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored in a free slot
    Added,
    /// Overwrote the newest frame, which had the same display time
    Replaced,
    /// Ring was full; the oldest frame was dropped to make room
    Evicted(Frame),
    /// Ring was full and the incoming frame was older than everything in it
    Discarded,
}

/// Bounded, display-time-ordered queue of frames
pub struct FrameRing {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    depth: AtomicUsize,
    inserted: AtomicU64,
    replaced: AtomicU64,
    evicted: AtomicU64,
    discarded: AtomicU64,
    skipped: AtomicU64,
    consumed: AtomicU64,
}

impl FrameRing {
    /// Create a ring holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");

        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            depth: AtomicUsize::new(0),
            inserted: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        }
    }

    /// Insert a frame, evicting the oldest if the ring is full
    ///
    /// A frame carrying exactly the newest frame's display time replaces it,
    /// unless that time has no sub-second part (senders use whole-second or
    /// zero stamps for "show immediately" frames, which must not collapse).
    pub fn insert(&self, frame: Frame) -> InsertOutcome {
        let mut frames = self.frames.lock();

        if let Some(newest) = frames.back_mut() {
            if newest.timestamp == frame.timestamp && frame.timestamp.subsec_micros() != 0 {
                *newest = frame;
                self.replaced.fetch_add(1, Ordering::Relaxed);
                return InsertOutcome::Replaced;
            }
        }

        let mut position = frames.partition_point(|f| f.timestamp <= frame.timestamp);

        let outcome = if frames.len() >= self.capacity {
            if position == 0 {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                return InsertOutcome::Discarded;
            }
            let oldest = frames.pop_front();
            position -= 1;
            self.evicted.fetch_add(1, Ordering::Relaxed);
            frames.insert(position, frame);
            oldest.map_or(InsertOutcome::Added, InsertOutcome::Evicted)
        } else {
            frames.insert(position, frame);
            InsertOutcome::Added
        };

        self.inserted.fetch_add(1, Ordering::Relaxed);
        self.depth.store(frames.len(), Ordering::Release);
        outcome
    }

    /// Take the frame that should be showing at `now`
    ///
    /// With a synced clock: returns the latest frame not in the future and
    /// drops everything older than it. Without one, timestamps mean nothing,
    /// so the oldest frame is returned regardless of its time.
    pub fn select_due(&self, now: Timestamp, clock_synced: bool) -> Option<Frame> {
        let mut frames = self.frames.lock();

        let due = if clock_synced {
            let mut due = None;
            while frames.front().is_some_and(|f| f.timestamp <= now) {
                if due.is_some() {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
                due = frames.pop_front();
            }
            due
        } else {
            frames.pop_front()
        };

        if due.is_some() {
            self.consumed.fetch_add(1, Ordering::Relaxed);
        }
        self.depth.store(frames.len(), Ordering::Release);
        due
    }

    /// Seconds from `now` to the oldest frame's display time, 0.0 when empty
    pub fn age_of_oldest(&self, now: Timestamp) -> f64 {
        self.frames
            .lock()
            .front()
            .map_or(0.0, |f| f.time_till_due(now))
    }

    /// Seconds from `now` to the newest frame's display time, 0.0 when empty
    pub fn age_of_newest(&self, now: Timestamp) -> f64 {
        self.frames
            .lock()
            .back()
            .map_or(0.0, |f| f.time_till_due(now))
    }

    pub fn peek_newest(&self) -> Option<Frame> {
        self.frames.lock().back().cloned()
    }

    /// Fixed number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently held
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Display times of buffered frames, oldest first
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.frames.lock().iter().map(|f| f.timestamp).collect()
    }

    /// Get statistics
    pub fn stats(&self, now: Timestamp) -> FrameRingStats {
        let frames = self.frames.lock();
        FrameRingStats {
            depth: frames.len(),
            capacity: self.capacity,
            oldest_age: frames.front().map_or(0.0, |f| f.time_till_due(now)),
            newest_age: frames.back().map_or(0.0, |f| f.time_till_due(now)),
            inserted: self.inserted.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
        }
    }
}

/// Frame ring statistics
#[derive(Debug, Clone)]
pub struct FrameRingStats {
    pub depth: usize,
    pub capacity: usize,
    pub oldest_age: f64,
    pub newest_age: f64,
    pub inserted: u64,
    pub replaced: u64,
    /// Oldest frames pushed out by a newer arrival
    pub evicted: u64,
    /// Arrivals older than everything in a full ring
    pub discarded: u64,
    pub skipped: u64,
    pub consumed: u64,
}

impl FrameRingStats {
    pub fn fill_level(&self) -> f32 {
        self.depth as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame_at(micros: u64) -> Frame {
        Frame::new(
            Timestamp::from_micros(micros),
            Timestamp::ZERO,
            Bytes::from(vec![1, 2, 3, 4, 5, 6]),
        )
    }

    #[test]
    fn test_frame_pixels() {
        let frame = Frame::new(
            Timestamp::ZERO,
            Timestamp::ZERO,
            Bytes::from_static(&[255, 0, 0, 0, 255, 0, 9]),
        );
        assert_eq!(frame.pixel_count(), 2);
        assert_eq!(frame.pixel(1), Some(Rgb::new(0, 255, 0)));
        assert_eq!(frame.pixel(2), None);
        assert_eq!(frame.pixels().count(), 2);
    }

    #[test]
    fn test_ring_basic() {
        let ring = FrameRing::new(4);

        assert_eq!(ring.insert(frame_at(1_000_001)), InsertOutcome::Added);
        assert_eq!(ring.insert(frame_at(2_000_001)), InsertOutcome::Added);
        assert_eq!(ring.depth(), 2);
        assert_eq!(ring.capacity(), 4);

        let popped = ring.select_due(Timestamp::ZERO, false).unwrap();
        assert_eq!(popped.timestamp.as_micros(), 1_000_001);
        assert_eq!(ring.depth(), 1);
    }

    #[test]
    fn test_out_of_order_insert_is_sorted() {
        let ring = FrameRing::new(8);
        ring.insert(frame_at(30));
        ring.insert(frame_at(10));
        ring.insert(frame_at(20));

        let times: Vec<u64> = ring.timestamps().iter().map(|t| t.as_micros()).collect();
        assert_eq!(times, vec![10, 20, 30]);
    }

    #[test]
    fn test_full_ring_evicts_oldest() {
        let ring = FrameRing::new(2);
        ring.insert(frame_at(10));
        ring.insert(frame_at(20));

        match ring.insert(frame_at(30)) {
            InsertOutcome::Evicted(old) => assert_eq!(old.timestamp.as_micros(), 10),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(ring.depth(), 2);

        // Older than everything retained: the newcomer is the one dropped
        assert_eq!(ring.insert(frame_at(5)), InsertOutcome::Discarded);
        let times: Vec<u64> = ring.timestamps().iter().map(|t| t.as_micros()).collect();
        assert_eq!(times, vec![20, 30]);

        let stats = ring.stats(Timestamp::ZERO);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_same_timestamp_replaces_newest() {
        let ring = FrameRing::new(4);
        ring.insert(frame_at(1_500_000));

        let replacement = Frame::new(
            Timestamp::from_micros(1_500_000),
            Timestamp::ZERO,
            Bytes::from_static(&[9, 9, 9]),
        );
        assert_eq!(ring.insert(replacement), InsertOutcome::Replaced);
        assert_eq!(ring.depth(), 1);
        assert_eq!(ring.peek_newest().unwrap().pixel_count(), 1);
    }

    #[test]
    fn test_whole_second_timestamps_do_not_replace() {
        let ring = FrameRing::new(4);
        ring.insert(frame_at(0));
        assert_eq!(ring.insert(frame_at(0)), InsertOutcome::Added);
        assert_eq!(ring.depth(), 2);
    }

    #[test]
    fn test_select_due_skips_stale() {
        let ring = FrameRing::new(8);
        for t in [10, 20, 30, 40] {
            ring.insert(frame_at(t));
        }

        let due = ring.select_due(Timestamp::from_micros(30), true).unwrap();
        assert_eq!(due.timestamp.as_micros(), 30);
        assert_eq!(ring.depth(), 1);

        let stats = ring.stats(Timestamp::ZERO);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.consumed, 1);

        // Nothing else is due yet
        assert!(ring.select_due(Timestamp::from_micros(35), true).is_none());
        assert_eq!(ring.depth(), 1);
    }

    #[test]
    fn test_select_due_unsynced_is_fifo() {
        let ring = FrameRing::new(8);
        ring.insert(frame_at(5_000_000));
        ring.insert(frame_at(6_000_000));

        let due = ring.select_due(Timestamp::ZERO, false).unwrap();
        assert_eq!(due.timestamp.as_micros(), 5_000_000);
    }

    #[test]
    fn test_ages() {
        let ring = FrameRing::new(8);
        let now = Timestamp::from_parts(100, 0);
        assert_eq!(ring.age_of_oldest(now), 0.0);
        assert_eq!(ring.age_of_newest(now), 0.0);

        ring.insert(Frame::new(Timestamp::from_parts(99, 500_000), now, Bytes::new()));
        ring.insert(Frame::new(Timestamp::from_parts(102, 0), now, Bytes::new()));

        assert!((ring.age_of_oldest(now) + 0.5).abs() < 1e-9);
        assert!((ring.age_of_newest(now) - 2.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_ring_keeps_most_recent(
            capacity in 1usize..16,
            times in proptest::collection::vec(0u64..10_000, 1..64),
        ) {
            let ring = FrameRing::new(capacity);
            for &t in &times {
                // Whole seconds so equal stamps never collapse into replacements
                ring.insert(frame_at(t * 1_000_000));
                prop_assert!(ring.depth() <= capacity);
            }

            let mut expected: Vec<u64> = times.iter().map(|t| t * 1_000_000).collect();
            expected.sort_unstable();
            let expected: Vec<u64> = expected[expected.len().saturating_sub(capacity)..].to_vec();

            let retained: Vec<u64> = ring.timestamps().iter().map(|t| t.as_micros()).collect();
            prop_assert_eq!(ring.depth(), times.len().min(capacity));
            prop_assert_eq!(retained, expected);
        }

        #[test]
        fn prop_oldest_age_not_after_newest(
            times in proptest::collection::vec(0u64..1_000_000_000, 1..32),
            now in 0u64..1_000_000_000,
        ) {
            let ring = FrameRing::new(64);
            for &t in &times {
                ring.insert(frame_at(t));
            }
            let now = Timestamp::from_micros(now);
            prop_assert!(ring.age_of_oldest(now) <= ring.age_of_newest(now));
        }
    }
}

//! A single output channel

use crate::display::FrameRing;

/// One physical LED output and its frame ring
pub struct Channel {
    index: usize,
    name: String,
    pixel_count: usize,
    ring: FrameRing,
}

impl Channel {
    pub fn new(index: usize, name: impl Into<String>, pixel_count: usize, capacity: usize) -> Self {
        Self {
            index,
            name: name.into(),
            pixel_count,
            ring: FrameRing::new(capacity),
        }
    }

    /// Bit position in the channel mask
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("pixel_count", &self.pixel_count)
            .field("depth", &self.ring.depth())
            .field("capacity", &self.ring.capacity())
            .finish()
    }
}

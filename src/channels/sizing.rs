//! Startup sizing of frame rings from available memory

use crate::constants::PIXEL_SIZE;
use crate::display::Frame;
use crate::error::BufferError;

/// Memory one frame slot costs for a channel of `pixel_count` pixels
pub fn slot_cost(pixel_count: usize) -> usize {
    std::mem::size_of::<Frame>() + pixel_count * PIXEL_SIZE
}

/// Result of sizing the rings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingPlan {
    /// Slots per channel
    pub capacity: usize,
    /// Cost of one slot in every channel
    pub slot_cost: usize,
    /// Pool after the reserve is taken off
    pub usable_bytes: usize,
    /// Slots the pool could hold before clamping to the maximum
    pub affordable: usize,
}

impl RingPlan {
    pub fn total_bytes(&self) -> usize {
        self.capacity * self.slot_cost
    }
}

/// Work out how many frames each channel can buffer
///
/// Every channel gets the same count. The count is clamped to
/// `max_buffers`; falling short of `min_buffers` is an error, never clamped
/// upwards.
pub fn plan_capacity(
    pool_bytes: usize,
    reserve_bytes: usize,
    pixel_counts: &[usize],
    min_buffers: usize,
    max_buffers: usize,
) -> Result<RingPlan, BufferError> {
    if pixel_counts.is_empty() {
        return Err(BufferError::NoChannels);
    }

    let usable_bytes = pool_bytes.saturating_sub(reserve_bytes);
    let slot_cost: usize = pixel_counts.iter().map(|&p| slot_cost(p)).sum();
    let affordable = usable_bytes / slot_cost;

    if affordable < min_buffers {
        return Err(BufferError::InsufficientMemory {
            affordable,
            minimum: min_buffers,
        });
    }

    let capacity = affordable.min(max_buffers);
    if capacity < affordable {
        tracing::debug!(
            "Could allocate {} buffers but limiting to {}",
            affordable,
            max_buffers
        );
    }

    Ok(RingPlan {
        capacity,
        slot_cost,
        usable_bytes,
        affordable,
    })
}

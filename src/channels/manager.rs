//! Channel manager
//!
//! Owns every channel's ring for the life of the process and routes frames
//! to the channels a packet's mask selects.

use crate::channels::channel::Channel;
use crate::channels::sizing::{plan_capacity, RingPlan};
use crate::config::AppConfig;
use crate::display::{Frame, InsertOutcome};
use crate::error::{BufferError, ProtocolError};
use crate::protocol::ChannelMask;

/// All output channels
pub struct ChannelManager {
    channels: Vec<Channel>,
    plan: RingPlan,
}

impl ChannelManager {
    /// Size the rings from the configured memory pool and create the channels
    ///
    /// Fails when even the minimum buffer count cannot be afforded; the
    /// receiver must not start in that state.
    pub fn from_config(config: &AppConfig) -> Result<Self, BufferError> {
        let pixel_counts = config.pixel_counts();
        let plan = plan_capacity(
            config.buffers.pool_bytes,
            config.buffers.reserve_bytes,
            &pixel_counts,
            config.buffers.min_buffers,
            config.buffers.max_buffers,
        )?;

        let channels = config
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                Channel::new(index, &device.name, device.pixel_count, plan.capacity)
            })
            .collect();

        tracing::info!(
            "Reserving {} frame buffers per channel across {} channels ({} bytes)",
            plan.capacity,
            pixel_counts.len(),
            plan.total_bytes()
        );

        Ok(Self { channels, plan })
    }

    pub fn plan(&self) -> RingPlan {
        self.plan
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Channel whose ring statistics go into acknowledgments
    pub fn primary(&self) -> &Channel {
        &self.channels[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Insert `frame` into every channel selected by `mask`
    ///
    /// Validates the whole mask before touching any ring, so a bad packet
    /// leaves every ring unchanged.
    pub fn insert(
        &self,
        mask: ChannelMask,
        frame: Frame,
    ) -> Result<Vec<(usize, InsertOutcome)>, ProtocolError> {
        let mask = mask.validate(self.channels.len())?;

        for index in mask.channels() {
            let channel = &self.channels[index];
            if frame.pixel_count() > channel.pixel_count() {
                return Err(ProtocolError::TooManyPixels {
                    pixels: frame.pixel_count() as u32,
                    channel: index,
                    capacity: channel.pixel_count(),
                });
            }
        }

        let outcomes = mask
            .channels()
            .map(|index| {
                let outcome = self.channels[index].ring().insert(frame.clone());
                if let InsertOutcome::Evicted(ref old) = outcome {
                    tracing::trace!(
                        "Channel {} full, dropped frame due at {}",
                        index,
                        old.timestamp
                    );
                }
                (index, outcome)
            })
            .collect();

        Ok(outcomes)
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.channels)
            .field("plan", &self.plan)
            .finish()
    }
}

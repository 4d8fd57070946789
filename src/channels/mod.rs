//! Output channel management module

pub mod channel;
pub mod manager;
pub mod sizing;

pub use channel::Channel;
pub use manager::ChannelManager;
pub use sizing::{plan_capacity, slot_cost, RingPlan};

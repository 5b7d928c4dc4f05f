//! Priority tiers with per-tier polling, retries and acknowledgement timeouts.

mod manager;
mod queue;

pub use manager::{PriorityManager, PriorityProcessor};
pub use queue::{QueuedItem, TierQueues};

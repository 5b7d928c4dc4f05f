//! Batched publish/subscribe fan-out with retries, history and per-subscriber stats.

mod history;
#[allow(clippy::module_inception)]
mod pubsub;
mod stats;
mod subscription;

pub use history::{DeliveryAttempt, DeliveryHistory};
pub use pubsub::{DeliveryOutcome, PubSub};
pub use stats::{SubscriberStats, SubscriberStatsSnapshot};
pub use subscription::{ChannelCallback, DeliveryCallback, Subscription, SubscriptionFilter};

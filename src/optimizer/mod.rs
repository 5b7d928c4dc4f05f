//! Load-driven batch sizing, throttling and priority adjustment.

mod metrics_source;
#[allow(clippy::module_inception)]
mod optimizer;

pub use metrics_source::{DeliveryLoadSource, MetricsSource, ResourceMetrics};
pub use optimizer::{LoadLevel, Optimizer};

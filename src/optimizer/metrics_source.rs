use std::sync::Arc;

use serde::Serialize;

use crate::priority::PriorityManager;
use crate::pubsub::PubSub;

/// Load snapshot the optimizer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceMetrics {
    /// 0.0 ..= 1.0
    pub utilization: f64,
    pub queue_length: usize,
    pub avg_processing_ms: f64,
}

impl ResourceMetrics {
    pub fn idle() -> Self {
        Self {
            utilization: 0.0,
            queue_length: 0,
            avg_processing_ms: 0.0,
        }
    }
}

pub trait MetricsSource: Send + Sync {
    fn sample(&self) -> ResourceMetrics;
}

/// Utilization is the share of wall time the pub/sub worker spent
/// delivering since the previous sample. It drops while deliveries are
/// held back, so throttling always lifts again.
pub struct DeliveryLoadSource {
    pubsub: Arc<PubSub>,
    priority: Option<Arc<PriorityManager>>,
}

impl DeliveryLoadSource {
    pub fn new(pubsub: Arc<PubSub>, priority: Option<Arc<PriorityManager>>) -> Self {
        Self { pubsub, priority }
    }
}

impl MetricsSource for DeliveryLoadSource {
    fn sample(&self) -> ResourceMetrics {
        let queue_length = self.pubsub.queue_len()
            + self
                .priority
                .as_ref()
                .map(|p| p.total_queued())
                .unwrap_or(0);
        ResourceMetrics {
            utilization: self.pubsub.take_busy_ratio(),
            queue_length,
            avg_processing_ms: self.pubsub.average_latency_ms(),
        }
    }
}

use std::collections::VecDeque;

use serde::Serialize;

/// Deliveries considered for the rolling latency average.
pub const LATENCY_WINDOW: usize = 100;
/// Minimum deliveries before the failure ratio counts toward backpressure.
pub const MIN_DELIVERIES_FOR_RATIO: u64 = 10;
pub const MAX_FAILURE_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct SubscriberStats {
    pub received: u64,
    pub success: u64,
    pub failure: u64,
    latencies_ms: VecDeque<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriberStatsSnapshot {
    pub received: u64,
    pub success: u64,
    pub failure: u64,
    pub avg_latency_ms: f64,
}

impl SubscriberStats {
    pub fn record(&mut self, success: bool, latency_ms: u64) {
        self.received += 1;
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<u64>() as f64 / self.latencies_ms.len() as f64
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.received == 0 {
            return 0.0;
        }
        self.failure as f64 / self.received as f64
    }

    pub fn is_backpressured(&self, slow_threshold_ms: u64) -> bool {
        let failing =
            self.received >= MIN_DELIVERIES_FOR_RATIO && self.failure_ratio() > MAX_FAILURE_RATIO;
        failing || self.avg_latency_ms() > slow_threshold_ms as f64
    }

    pub fn snapshot(&self) -> SubscriberStatsSnapshot {
        SubscriberStatsSnapshot {
            received: self.received,
            success: self.success,
            failure: self.failure,
            avg_latency_ms: self.avg_latency_ms(),
        }
    }
}

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics_source::{MetricsSource, ResourceMetrics};
use crate::config::OptimizerSettings;
use crate::notifications::{Notification, NotificationType, Priority};
use crate::server::metrics;

/// Load band derived from the last metrics sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadLevel {
    High,
    Low,
}

struct OptimizerState {
    throttled: bool,
    batch_size: usize,
    last_metrics: Option<ResourceMetrics>,
    pending: VecDeque<Notification>,
    /// Notification id -> priority chosen by `optimize`.
    decisions: LruCache<String, Priority>,
}

/// Adapts batch size, throttling and notification priority to current load.
pub struct Optimizer {
    settings: OptimizerSettings,
    state: Mutex<OptimizerState>,
    source: Arc<dyn MetricsSource>,
    shutdown_token: CancellationToken,
}

impl Optimizer {
    pub fn new(
        settings: OptimizerSettings,
        source: Arc<dyn MetricsSource>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let cache_size = NonZeroUsize::new(settings.cache_size).unwrap_or(NonZeroUsize::MIN);
        let batch_size = settings
            .initial_batch_size
            .clamp(settings.min_batch_size, settings.max_batch_size);
        Self {
            state: Mutex::new(OptimizerState {
                throttled: false,
                batch_size,
                last_metrics: None,
                pending: VecDeque::new(),
                decisions: LruCache::new(cache_size),
            }),
            settings,
            source,
            shutdown_token,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.state.lock().unwrap().throttled
    }

    pub fn batch_size(&self) -> usize {
        self.state.lock().unwrap().batch_size
    }

    pub fn last_metrics(&self) -> Option<ResourceMetrics> {
        self.state.lock().unwrap().last_metrics
    }

    pub fn load_level(&self) -> Option<LoadLevel> {
        self.state
            .lock()
            .unwrap()
            .last_metrics
            .map(|m| self.classify(&m))
    }

    fn classify(&self, metrics: &ResourceMetrics) -> LoadLevel {
        if metrics.utilization >= self.settings.high_load_threshold {
            LoadLevel::High
        } else {
            LoadLevel::Low
        }
    }

    /// Pull one sample from the source and adapt.
    pub fn sample(&self) -> ResourceMetrics {
        let metrics = self.source.sample();
        self.apply_metrics(metrics);
        metrics
    }

    pub fn apply_metrics(&self, metrics: ResourceMetrics) {
        let mut state = self.state.lock().unwrap();

        if metrics.utilization > self.settings.throttle_threshold {
            if !state.throttled {
                warn!(
                    "Throttling: utilization {:.2} above {:.2}",
                    metrics.utilization, self.settings.throttle_threshold
                );
            }
            state.throttled = true;
        } else if metrics.utilization < self.settings.throttle_threshold && state.throttled {
            info!("Throttling lifted at utilization {:.2}", metrics.utilization);
            state.throttled = false;
        }

        let target = self.settings.target_processing_ms as f64;
        let previous = state.batch_size;
        if metrics.avg_processing_ms > target {
            state.batch_size = (state.batch_size / 2).max(self.settings.min_batch_size);
        } else if metrics.avg_processing_ms < target / 2.0 {
            let grown = (state.batch_size as f64 * 1.25).ceil() as usize;
            state.batch_size = grown.min(self.settings.max_batch_size);
        }
        if state.batch_size != previous {
            debug!("Batch size {} -> {}", previous, state.batch_size);
        }

        state.last_metrics = Some(metrics);
    }

    /// Priority the notification should be delivered at, moved at most one
    /// tier from its original. Decisions are cached per notification id.
    pub fn optimize(&self, notification: &Notification, now: i64) -> Priority {
        let mut state = self.state.lock().unwrap();
        if let Some(priority) = state.decisions.get(&notification.id) {
            return *priority;
        }
        let original = notification.priority;
        let adjusted = match state.last_metrics.map(|m| self.classify(&m)) {
            Some(LoadLevel::High)
                if original <= Priority::Medium
                    && notification.notification_type != NotificationType::Security =>
            {
                original.demote()
            }
            Some(LoadLevel::Low)
                if notification
                    .expires_at
                    .map(|at| at - now <= self.settings.expiry_boost_window_ms)
                    .unwrap_or(false) =>
            {
                original.promote()
            }
            _ => original,
        };
        if adjusted != original {
            debug!(
                "Priority of {} adjusted {} -> {}",
                notification.id,
                original.as_str(),
                adjusted.as_str()
            );
        }
        state.decisions.put(notification.id.clone(), adjusted);
        adjusted
    }

    pub fn cached_decisions(&self) -> usize {
        self.state.lock().unwrap().decisions.len()
    }

    pub fn enqueue(&self, notification: Notification) {
        let len = {
            let mut state = self.state.lock().unwrap();
            state.pending.push_back(notification);
            state.pending.len()
        };
        metrics::set_queue_length("optimizer", len);
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Next batch in priority order, FIFO within a priority. Empty while throttled.
    pub fn get_next_batch(&self) -> Vec<Notification> {
        let mut state = self.state.lock().unwrap();
        if state.throttled {
            return Vec::new();
        }
        let take = state.batch_size.min(state.pending.len());
        state
            .pending
            .make_contiguous()
            .sort_by_key(|n| std::cmp::Reverse(n.priority.rank()));
        let batch: Vec<Notification> = state.pending.drain(..take).collect();
        metrics::set_queue_length("optimizer", state.pending.len());
        batch
    }

    /// Sample the source periodically until shutdown.
    pub async fn run(&self) {
        let period = Duration::from_millis(self.settings.sample_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        info!("Optimizer sampling every {:?}", period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sample();
                }
                _ = self.shutdown_token.cancelled() => {
                    debug!("Optimizer stopped");
                    break;
                }
            }
        }
    }
}

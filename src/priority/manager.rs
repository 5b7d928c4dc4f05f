use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{QueuedItem, TierQueues};
use crate::config::{PrioritySettings, TierSettings};
use crate::notifications::{now_millis, Notification, NotificationResult, Priority};
use crate::server::metrics;

/// Handles one queued notification.
#[async_trait]
pub trait PriorityProcessor: Send + Sync {
    async fn process(&self, notification: &Notification) -> NotificationResult<()>;
}

#[derive(Debug)]
struct PendingAck {
    priority: Priority,
    delivered_at: i64,
    timeout: CancellationToken,
}

fn queue_label(priority: Priority) -> String {
    format!("priority_{}", priority.as_str().to_lowercase())
}

/// Four FIFO tiers, each drained by its own timer.
///
/// All tiers share one processor. A steady stream of URGENT work therefore
/// delays the lower tiers; nothing rebalances that.
pub struct PriorityManager {
    settings: PrioritySettings,
    queues: Mutex<TierQueues>,
    pending_acks: Mutex<HashMap<String, PendingAck>>,
    processor: Arc<dyn PriorityProcessor>,
    shutdown_token: CancellationToken,
}

impl PriorityManager {
    pub fn new(
        settings: PrioritySettings,
        processor: Arc<dyn PriorityProcessor>,
        shutdown_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            queues: Mutex::new(TierQueues::default()),
            pending_acks: Mutex::new(HashMap::new()),
            processor,
            shutdown_token,
        })
    }

    pub fn settings(&self) -> &PrioritySettings {
        &self.settings
    }

    pub fn enqueue(&self, notification: Notification) {
        self.push(QueuedItem::new(notification, now_millis()));
    }

    fn push(&self, item: QueuedItem) {
        let priority = item.priority();
        let len = self.queues.lock().unwrap().push(item);
        metrics::set_queue_length(&queue_label(priority), len);
    }

    pub fn queue_len(&self, priority: Priority) -> usize {
        self.queues.lock().unwrap().len(priority)
    }

    pub fn total_queued(&self) -> usize {
        self.queues.lock().unwrap().total()
    }

    /// Ids waiting in a tier, head first.
    pub fn queued_ids(&self, priority: Priority) -> Vec<String> {
        self.queues.lock().unwrap().ids(priority)
    }

    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.lock().unwrap().len()
    }

    pub fn is_pending_ack(&self, notification_id: &str) -> bool {
        self.pending_acks
            .lock()
            .unwrap()
            .contains_key(notification_id)
    }

    /// Clear the pending acknowledgement of a delivered notification.
    pub fn acknowledge(&self, notification_id: &str) -> bool {
        match self.pending_acks.lock().unwrap().remove(notification_id) {
            Some(pending) => {
                pending.timeout.cancel();
                debug!(
                    "Acknowledged {} ({}) after {}ms",
                    notification_id,
                    pending.priority.as_str(),
                    now_millis() - pending.delivered_at
                );
                true
            }
            None => false,
        }
    }

    /// Process everything currently queued in one tier. Returns the number of
    /// items handed to the processor.
    pub async fn process_tier(self: &Arc<Self>, priority: Priority) -> usize {
        let items = {
            let mut queues = self.queues.lock().unwrap();
            let items = queues.take_all(priority);
            metrics::set_queue_length(&queue_label(priority), queues.len(priority));
            items
        };
        let processed = items.len();
        let tier = self.settings.tier(priority).clone();
        for item in items {
            match self.processor.process(&item.notification).await {
                Ok(()) => {
                    if tier.require_ack {
                        self.await_ack(&item.notification.id, priority, &tier);
                    }
                }
                Err(err) => self.retry_later(item, &tier, err.to_string()),
            }
        }
        processed
    }

    /// One pass over all tiers in strict priority order.
    pub async fn drain_once(self: &Arc<Self>) -> usize {
        let mut processed = 0;
        for priority in Priority::BY_URGENCY {
            processed += self.process_tier(priority).await;
        }
        processed
    }

    fn retry_later(self: &Arc<Self>, mut item: QueuedItem, tier: &TierSettings, reason: String) {
        if item.retries >= tier.max_retries {
            error!(
                "Dropping {} ({}) after {} retries: {}",
                item.notification.id,
                item.priority().as_str(),
                item.retries,
                reason
            );
            return;
        }
        item.retries += 1;
        warn!(
            "Processing {} failed, retry {}/{} in {}ms: {}",
            item.notification.id, item.retries, tier.max_retries, tier.retry_delay_ms, reason
        );
        let delay = Duration::from_millis(tier.retry_delay_ms);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                // requeue right away so shutdown never loses an item
                _ = this.shutdown_token.cancelled() => {}
            }
            this.push(item);
        });
    }

    fn await_ack(self: &Arc<Self>, notification_id: &str, priority: Priority, tier: &TierSettings) {
        let timeout = self.shutdown_token.child_token();
        let previous = self.pending_acks.lock().unwrap().insert(
            notification_id.to_string(),
            PendingAck {
                priority,
                delivered_at: now_millis(),
                timeout: timeout.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!("Redelivered {} before it was acknowledged", notification_id);
            previous.timeout.cancel();
        }

        let this = self.clone();
        let id = notification_id.to_string();
        let ack_timeout = Duration::from_millis(tier.ack_timeout_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(ack_timeout) => {
                    let mut pending = this.pending_acks.lock().unwrap();
                    // a redelivery cancels this token under the same lock
                    if !timeout.is_cancelled() && pending.remove(&id).is_some() {
                        warn!("No acknowledgement for {} within {:?}", id, ack_timeout);
                    }
                }
                _ = timeout.cancelled() => {}
            }
        });
    }

    /// Spawn one polling task per tier.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        Priority::BY_URGENCY
            .iter()
            .map(|priority| {
                let this = self.clone();
                let priority = *priority;
                tokio::spawn(async move { this.poll_tier(priority).await })
            })
            .collect()
    }

    async fn poll_tier(self: Arc<Self>, priority: Priority) {
        let period = Duration::from_millis(self.settings.tier(priority).poll_interval_ms.max(1));
        info!("Polling {} tier every {:?}", priority.as_str(), period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.process_tier(priority).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    debug!("{} tier poller stopped", priority.as_str());
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

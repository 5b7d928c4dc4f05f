use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::history::{DeliveryAttempt, DeliveryHistory};
use super::stats::{SubscriberStats, SubscriberStatsSnapshot};
use super::subscription::{DeliveryCallback, Subscription, SubscriptionFilter};
use crate::config::PubSubSettings;
use crate::notifications::{now_millis, Notification, NotificationError, NotificationResult};
use crate::optimizer::Optimizer;
use crate::priority::PriorityProcessor;
use crate::retry_policy::RetryPolicy;
use crate::scheduler::DeliverySink;
use crate::server::metrics;

/// How often a throttled worker looks again at held back notifications.
const THROTTLE_RECHECK: Duration = Duration::from_millis(100);

/// Final result of delivering one notification to one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub subscriber_id: String,
    pub attempts: u32,
    pub success: bool,
    /// Code of the surfaced error, e.g. `MAX_RETRIES_EXCEEDED`.
    pub error_code: Option<String>,
    pub error: Option<String>,
}

struct Pending {
    notification: Notification,
    responder: Option<oneshot::Sender<Vec<DeliveryOutcome>>>,
}

/// Time spent delivering since the last reading.
struct BusyMeter {
    window_start: Instant,
    busy: Duration,
}

/// Batching fan-out of notifications to subscriber callbacks.
///
/// `publish` queues a notification and wakes the worker, which waits
/// `batch_delay_ms` so that bursts are handled in one pass. Deliveries to the
/// subscribers of one notification run concurrently; failures are retried with
/// exponential backoff. With an attached optimizer, batches follow its
/// adaptive batch size and nothing is taken while it is throttled.
pub struct PubSub {
    settings: PubSubSettings,
    retry_policy: RetryPolicy,
    subscriptions: RwLock<Vec<Subscription>>,
    queue: Mutex<VecDeque<Pending>>,
    history: Mutex<DeliveryHistory>,
    stats: Mutex<HashMap<String, SubscriberStats>>,
    busy: Mutex<BusyMeter>,
    optimizer: RwLock<Weak<Optimizer>>,
    wakeup: Notify,
    running: AtomicBool,
    shutdown_token: CancellationToken,
}

impl PubSub {
    pub fn new(settings: PubSubSettings, shutdown_token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            retry_policy: RetryPolicy::new(&settings),
            history: Mutex::new(DeliveryHistory::new(settings.history_size)),
            settings,
            subscriptions: RwLock::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            stats: Mutex::new(HashMap::new()),
            busy: Mutex::new(BusyMeter {
                window_start: Instant::now(),
                busy: Duration::ZERO,
            }),
            optimizer: RwLock::new(Weak::new()),
            wakeup: Notify::new(),
            running: AtomicBool::new(false),
            shutdown_token,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Let `optimizer` gate batches and choose their size. Held weakly since
    /// the optimizer usually samples this instance.
    pub fn attach_optimizer(&self, optimizer: &Arc<Optimizer>) {
        *self.optimizer.write().unwrap() = Arc::downgrade(optimizer);
    }

    fn optimizer(&self) -> Option<Arc<Optimizer>> {
        self.optimizer.read().unwrap().upgrade()
    }

    pub fn is_throttled(&self) -> bool {
        self.optimizer().is_some_and(|o| o.is_throttled())
    }

    /// Queued work the optimizer is holding back.
    fn is_held_back(&self) -> bool {
        self.queue_len() > 0 && self.is_throttled()
    }

    /// Fraction of the time since the previous call spent delivering.
    pub fn take_busy_ratio(&self) -> f64 {
        let mut meter = self.busy.lock().unwrap();
        let window = meter.window_start.elapsed();
        let ratio = if window.is_zero() {
            0.0
        } else {
            (meter.busy.as_secs_f64() / window.as_secs_f64()).min(1.0)
        };
        meter.window_start = Instant::now();
        meter.busy = Duration::ZERO;
        ratio
    }

    /// Spawn the batch worker.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    async fn run(&self) {
        info!("PubSub worker started");
        let batch_delay = Duration::from_millis(self.settings.batch_delay_ms);
        loop {
            let held_back = self.is_held_back();
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(THROTTLE_RECHECK), if held_back => {}
                _ = self.shutdown_token.cancelled() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(batch_delay) => {}
                _ = self.shutdown_token.cancelled() => break,
            }
            while self.process_batch().await > 0 {
                if self.shutdown_token.is_cancelled() {
                    break;
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("PubSub worker stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub fn subscribe(
        &self,
        callback: Arc<dyn DeliveryCallback>,
        filter: Option<SubscriptionFilter>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.subscriptions.write().unwrap().push(Subscription {
            id: id.clone(),
            filter,
            callback,
        });
        debug!("Subscriber {} registered", id);
        id
    }

    /// Returns false if the subscription did not exist.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != subscription_id);
        let removed = subscriptions.len() != before;
        if removed {
            self.stats.lock().unwrap().remove(subscription_id);
            debug!("Subscriber {} removed", subscription_id);
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().unwrap().len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Queue a notification for the next batch.
    pub fn publish(&self, notification: Notification) {
        self.enqueue(Pending {
            notification,
            responder: None,
        });
    }

    /// Queue a notification and wait for every matching subscriber's outcome.
    pub async fn publish_and_wait(
        &self,
        notification: Notification,
    ) -> NotificationResult<Vec<DeliveryOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Pending {
            notification,
            responder: Some(tx),
        });
        while !self.running.load(Ordering::SeqCst) {
            if self.process_batch().await > 0 {
                continue;
            }
            if self.queue_len() == 0 {
                break;
            }
            tokio::time::sleep(THROTTLE_RECHECK).await;
        }
        rx.await
            .map_err(|_| NotificationError::delivery("publisher shut down before delivery"))
    }

    fn enqueue(&self, pending: Pending) {
        let len = {
            let mut queue = self.queue.lock().unwrap();
            queue.push_back(pending);
            queue.len()
        };
        metrics::set_queue_length("pubsub", len);
        self.wakeup.notify_one();
    }

    /// Process one batch of queued notifications. Returns how many were taken,
    /// which is zero while the optimizer is throttled.
    pub async fn process_batch(&self) -> usize {
        let batch_size = match self.optimizer() {
            Some(optimizer) if optimizer.is_throttled() => {
                debug!("Throttled, holding back {} notifications", self.queue_len());
                return 0;
            }
            Some(optimizer) => optimizer.batch_size(),
            None => self.settings.batch_size,
        };
        let batch: Vec<Pending> = {
            let mut queue = self.queue.lock().unwrap();
            let take = queue.len().min(batch_size.max(1));
            let batch = queue.drain(..take).collect();
            metrics::set_queue_length("pubsub", queue.len());
            batch
        };
        let taken = batch.len();
        if taken == 0 {
            return 0;
        }
        let started = Instant::now();
        for pending in batch {
            let outcomes = self.deliver_to_all(&pending.notification).await;
            if let Some(responder) = pending.responder {
                let _ = responder.send(outcomes);
            }
        }
        self.busy.lock().unwrap().busy += started.elapsed();
        taken
    }

    async fn deliver_to_all(&self, notification: &Notification) -> Vec<DeliveryOutcome> {
        let targets: Vec<Subscription> = self
            .subscriptions
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.matches(notification))
            .cloned()
            .collect();
        if targets.is_empty() {
            debug!("No subscribers for notification {}", notification.id);
            return Vec::new();
        }
        join_all(
            targets
                .iter()
                .map(|subscription| self.deliver_with_retry(subscription, notification)),
        )
        .await
    }

    async fn deliver_with_retry(
        &self,
        subscription: &Subscription,
        notification: &Notification,
    ) -> DeliveryOutcome {
        let mut retry_count = 0u32;
        loop {
            let started = Instant::now();
            let result = subscription.callback.deliver(notification).await;
            let latency = started.elapsed();
            self.record_attempt(subscription, notification, retry_count + 1, &result, latency);

            let err = match result {
                Ok(()) => {
                    return DeliveryOutcome {
                        subscriber_id: subscription.id.clone(),
                        attempts: retry_count + 1,
                        success: true,
                        error_code: None,
                        error: None,
                    }
                }
                Err(err) => err,
            };

            if !self.retry_policy.should_retry(&err, retry_count) {
                let surfaced = if err.is_retryable() {
                    NotificationError::MaxRetriesExceeded {
                        attempts: retry_count + 1,
                        last_error: Box::new(err),
                    }
                } else {
                    err
                };
                error!(
                    "Delivery of {} to {} failed: {}",
                    notification.id, subscription.id, surfaced
                );
                return DeliveryOutcome {
                    subscriber_id: subscription.id.clone(),
                    attempts: retry_count + 1,
                    success: false,
                    error_code: Some(surfaced.code().to_string()),
                    error: Some(surfaced.to_string()),
                };
            }

            let backoff = self.retry_policy.backoff(retry_count);
            debug!(
                "Retrying {} for {} in {:?} (retry {})",
                notification.id,
                subscription.id,
                backoff,
                retry_count + 1
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown_token.cancelled() => {
                    return DeliveryOutcome {
                        subscriber_id: subscription.id.clone(),
                        attempts: retry_count + 1,
                        success: false,
                        error_code: Some(err.code().to_string()),
                        error: Some(format!("shutdown during retry: {}", err)),
                    };
                }
            }
            retry_count += 1;
        }
    }

    fn record_attempt(
        &self,
        subscription: &Subscription,
        notification: &Notification,
        attempt: u32,
        result: &Result<(), NotificationError>,
        latency: Duration,
    ) {
        let latency_ms = latency.as_millis() as u64;
        let success = result.is_ok();
        metrics::record_delivery(success, latency);

        self.history.lock().unwrap().record(
            &notification.id,
            DeliveryAttempt {
                subscriber_id: subscription.id.clone(),
                attempt,
                success,
                error: result.as_ref().err().map(|e| e.to_string()),
                latency_ms,
                timestamp: now_millis(),
            },
        );

        let backpressured = {
            let mut stats = self.stats.lock().unwrap();
            let entry = stats.entry(subscription.id.clone()).or_default();
            entry.record(success, latency_ms);
            entry.is_backpressured(self.settings.slow_subscriber_threshold_ms)
        };
        if backpressured {
            warn!("Subscriber {} is backpressured", subscription.id);
        }
    }

    pub fn history(&self, event_id: &str) -> Vec<DeliveryAttempt> {
        self.history.lock().unwrap().get(event_id)
    }

    pub fn subscriber_stats(&self, subscription_id: &str) -> Option<SubscriberStatsSnapshot> {
        self.stats
            .lock()
            .unwrap()
            .get(subscription_id)
            .map(SubscriberStats::snapshot)
    }

    /// Mean of the subscribers' rolling latencies, 0 when nothing was delivered.
    pub fn average_latency_ms(&self) -> f64 {
        let stats = self.stats.lock().unwrap();
        if stats.is_empty() {
            return 0.0;
        }
        stats.values().map(SubscriberStats::avg_latency_ms).sum::<f64>() / stats.len() as f64
    }

    pub fn is_backpressured(&self, subscription_id: &str) -> bool {
        self.stats
            .lock()
            .unwrap()
            .get(subscription_id)
            .map(|s| s.is_backpressured(self.settings.slow_subscriber_threshold_ms))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DeliverySink for PubSub {
    /// Fails with the first subscriber error, if any.
    async fn deliver(&self, notification: Notification) -> NotificationResult<()> {
        let outcomes = self.publish_and_wait(notification).await?;
        match outcomes.into_iter().find(|o| !o.success) {
            Some(failed) => Err(NotificationError::DeliveryFailed(format!(
                "subscriber {}: {}",
                failed.subscriber_id,
                failed.error.unwrap_or_default()
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PriorityProcessor for PubSub {
    async fn process(&self, notification: &Notification) -> NotificationResult<()> {
        DeliverySink::deliver(self, notification.clone()).await
    }
}

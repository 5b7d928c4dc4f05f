use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::models::{ScheduleConfig, ScheduleRetry, ScheduleStatus, ScheduledNotification};
use super::recurrence::{first_occurrence, next_occurrence, validate_rule};
use crate::notifications::{now_millis, Notification, NotificationError, NotificationResult};

/// Where due notifications are handed off.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, notification: Notification) -> NotificationResult<()>;
}

/// Sleep used when nothing is scheduled; new schedules wake the loop early.
const IDLE_SLEEP: Duration = Duration::from_secs(60);

/// Outcome of one firing during `tick`.
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub schedule_id: String,
    pub notification_id: String,
    pub success: bool,
    pub status: ScheduleStatus,
}

/// Computes future and recurring delivery times and fires due schedules.
pub struct Scheduler {
    schedules: Mutex<HashMap<String, ScheduledNotification>>,
    sink: Arc<dyn DeliverySink>,
    changed: Notify,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(sink: Arc<dyn DeliverySink>, shutdown_token: CancellationToken) -> Self {
        Self {
            schedules: Mutex::new(HashMap::new()),
            sink,
            changed: Notify::new(),
            shutdown_token,
        }
    }

    pub fn schedule_notification(
        &self,
        notification: Notification,
        config: ScheduleConfig,
    ) -> NotificationResult<ScheduledNotification> {
        self.schedule_at(notification, config, now_millis())
    }

    /// Register a schedule relative to `now` (Unix ms).
    pub fn schedule_at(
        &self,
        notification: Notification,
        config: ScheduleConfig,
        now: i64,
    ) -> NotificationResult<ScheduledNotification> {
        notification.validate()?;
        if let Some(rule) = &config.repeat {
            validate_rule(rule)?;
        }
        if let (Some(start), Some(end)) = (config.start, config.end) {
            if end < start {
                return Err(NotificationError::Validation(
                    "schedule ends before it starts".into(),
                ));
            }
        }
        let next_execution = first_occurrence(&config, now).ok_or_else(|| {
            NotificationError::Validation("schedule has no occurrence in its window".into())
        })?;

        let scheduled = ScheduledNotification {
            id: uuid::Uuid::new_v4().to_string(),
            notification,
            config,
            next_execution: Some(next_execution),
            execution_count: 0,
            retry_count: 0,
            last_error: None,
            status: ScheduleStatus::Active,
        };
        info!(
            "Scheduled notification {} as {} for {}",
            scheduled.notification.id, scheduled.id, next_execution
        );
        self.schedules
            .lock()
            .unwrap()
            .insert(scheduled.id.clone(), scheduled.clone());
        self.changed.notify_one();
        Ok(scheduled)
    }

    pub fn cancel_scheduled_notification(&self, schedule_id: &str) -> NotificationResult<()> {
        let mut schedules = self.schedules.lock().unwrap();
        let schedule = schedules
            .get_mut(schedule_id)
            .ok_or_else(|| NotificationError::not_found(format!("schedule {}", schedule_id)))?;
        if schedule.status == ScheduleStatus::Active {
            schedule.status = ScheduleStatus::Cancelled;
            schedule.next_execution = None;
            info!("Cancelled schedule {}", schedule_id);
        }
        Ok(())
    }

    pub fn get(&self, schedule_id: &str) -> Option<ScheduledNotification> {
        self.schedules.lock().unwrap().get(schedule_id).cloned()
    }

    pub fn active(&self) -> Vec<ScheduledNotification> {
        let mut active: Vec<_> = self
            .schedules
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == ScheduleStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.next_execution);
        active
    }

    /// Earliest pending execution instant.
    pub fn next_due(&self) -> Option<i64> {
        self.schedules
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == ScheduleStatus::Active)
            .filter_map(|s| s.next_execution)
            .min()
    }

    /// Drop finished schedules. Returns how many were removed.
    pub fn purge_finished(&self) -> usize {
        let mut schedules = self.schedules.lock().unwrap();
        let before = schedules.len();
        schedules.retain(|_, s| s.status == ScheduleStatus::Active);
        before - schedules.len()
    }

    /// Fire every schedule due at `now`, earliest first.
    pub async fn tick(&self, now: i64) -> Vec<Firing> {
        let mut due: Vec<(String, Notification, i64)> = {
            let schedules = self.schedules.lock().unwrap();
            schedules
                .values()
                .filter(|s| s.is_due(now))
                .map(|s| {
                    (
                        s.id.clone(),
                        s.occurrence(now),
                        s.next_execution.unwrap_or(now),
                    )
                })
                .collect()
        };
        due.sort_by_key(|(_, _, at)| *at);

        let mut firings = Vec::with_capacity(due.len());
        for (schedule_id, notification, scheduled_for) in due {
            // cancellation between collection and delivery wins
            let still_active = self
                .schedules
                .lock()
                .unwrap()
                .get(&schedule_id)
                .map(|s| s.status == ScheduleStatus::Active)
                .unwrap_or(false);
            if !still_active {
                continue;
            }

            let notification_id = notification.id.clone();
            let result = self.sink.deliver(notification).await;
            let success = result.is_ok();
            if let Some(status) = self.record_result(&schedule_id, scheduled_for, now, result) {
                firings.push(Firing {
                    schedule_id,
                    notification_id,
                    success,
                    status,
                });
            }
        }
        firings
    }

    fn record_result(
        &self,
        schedule_id: &str,
        scheduled_for: i64,
        now: i64,
        result: NotificationResult<()>,
    ) -> Option<ScheduleStatus> {
        let mut schedules = self.schedules.lock().unwrap();
        let schedule = schedules.get_mut(schedule_id)?;
        if schedule.status != ScheduleStatus::Active {
            return Some(schedule.status);
        }
        match result {
            Ok(()) => {
                schedule.retry_count = 0;
                schedule.last_error = None;
                schedule.execution_count += 1;
                schedule.next_execution = match &schedule.config.repeat {
                    Some(rule)
                        if rule
                            .count
                            .map(|count| schedule.execution_count < count)
                            .unwrap_or(true) =>
                    {
                        next_occurrence(rule, scheduled_for)
                            .filter(|next| schedule.config.end.map(|end| *next <= end).unwrap_or(true))
                    }
                    _ => None,
                };
                if schedule.next_execution.is_none() {
                    schedule.status = ScheduleStatus::Completed;
                    debug!("Schedule {} completed", schedule_id);
                }
                Some(schedule.status)
            }
            Err(err) => {
                schedule.last_error = Some(err.to_string());
                schedule.retry_count += 1;
                let retry = schedule.config.retry.unwrap_or(ScheduleRetry {
                    max_retries: 0,
                    retry_delay_ms: 0,
                });
                if schedule.retry_count > retry.max_retries {
                    schedule.status = ScheduleStatus::Failed;
                    schedule.next_execution = None;
                    error!(
                        "Schedule {} failed after {} attempts: {}",
                        schedule_id, schedule.retry_count, err
                    );
                } else {
                    schedule.next_execution = Some(now + retry.retry_delay_ms as i64);
                    warn!(
                        "Schedule {} delivery failed (retry {}/{}): {}",
                        schedule_id, schedule.retry_count, retry.max_retries, err
                    );
                }
                Some(schedule.status)
            }
        }
    }

    /// Fire schedules as they come due until shutdown.
    pub async fn run(&self) {
        info!("Scheduler started");
        loop {
            let sleep_for = match self.next_due() {
                Some(at) => Duration::from_millis((at - now_millis()).max(0) as u64),
                None => IDLE_SLEEP,
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let fired = self.tick(now_millis()).await;
                    if !fired.is_empty() {
                        debug!("Scheduler fired {} schedules", fired.len());
                    }
                }
                _ = self.changed.notified() => {}
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }
    }
}

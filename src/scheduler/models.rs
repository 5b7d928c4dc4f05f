use serde::{Deserialize, Serialize};

use crate::notifications::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// Recurrence of a scheduled notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatRule {
    pub frequency: Frequency,
    /// Multiplier of `frequency`, at least 1.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// 0 = Sunday ... 6 = Saturday.
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    /// 1..=31
    #[serde(default)]
    pub days_of_month: Vec<u32>,
    /// Stop after this many executions.
    #[serde(default)]
    pub count: Option<u32>,
    /// No occurrence after this instant (Unix ms).
    #[serde(default)]
    pub until: Option<i64>,
}

fn default_interval() -> u32 {
    1
}

impl RepeatRule {
    pub fn every(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            days_of_week: Vec::new(),
            days_of_month: Vec::new(),
            count: None,
            until: None,
        }
    }

    pub fn has_day_constraints(&self) -> bool {
        !self.days_of_week.is_empty() || !self.days_of_month.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRetry {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub repeat: Option<RepeatRule>,
    pub retry: Option<ScheduleRetry>,
}

impl ScheduleConfig {
    pub fn at(start: i64) -> Self {
        Self {
            start: Some(start),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: String,
    pub notification: Notification,
    pub config: ScheduleConfig,
    pub next_execution: Option<i64>,
    pub execution_count: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub status: ScheduleStatus,
}

impl ScheduledNotification {
    pub fn is_due(&self, now: i64) -> bool {
        self.status == ScheduleStatus::Active
            && self.next_execution.map(|at| at <= now).unwrap_or(false)
    }

    /// The notification to hand off for the current execution. Repeats get a
    /// fresh id so that each occurrence is a distinct record.
    pub fn occurrence(&self, now: i64) -> Notification {
        let mut notification = self.notification.clone();
        if self.execution_count > 0 {
            notification.id = uuid::Uuid::new_v4().to_string();
        }
        notification.timestamp = now;
        if let Some(expires_at) = self.notification.expires_at {
            // keep the original time-to-live
            let ttl = (expires_at - self.notification.timestamp).max(0);
            notification.expires_at = Some(now + ttl);
        }
        notification
    }
}

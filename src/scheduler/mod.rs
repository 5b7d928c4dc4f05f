//! Timed and recurring notification delivery.

mod models;
mod recurrence;
#[allow(clippy::module_inception)]
mod scheduler;

pub use models::{
    Frequency, RepeatRule, ScheduleConfig, ScheduleRetry, ScheduleStatus, ScheduledNotification,
};
pub use recurrence::{first_occurrence, next_occurrence, MAX_DAY_STEPS};
pub use scheduler::{DeliverySink, Firing, Scheduler};

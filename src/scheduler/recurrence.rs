//! Occurrence arithmetic for repeat rules.

use chrono::{DateTime, Datelike, Months, TimeDelta, Utc};

use super::models::{Frequency, RepeatRule, ScheduleConfig};
use crate::notifications::NotificationError;

/// Upper bound on day-by-day stepping when looking for a day that satisfies
/// the rule's day constraints.
pub const MAX_DAY_STEPS: u32 = 366;

pub fn validate_rule(rule: &RepeatRule) -> Result<(), NotificationError> {
    if rule.interval == 0 {
        return Err(NotificationError::Validation(
            "repeat interval must be at least 1".into(),
        ));
    }
    if let Some(day) = rule.days_of_week.iter().find(|d| **d > 6) {
        return Err(NotificationError::Validation(format!(
            "day of week {} out of range 0..=6",
            day
        )));
    }
    if let Some(day) = rule.days_of_month.iter().find(|d| **d == 0 || **d > 31) {
        return Err(NotificationError::Validation(format!(
            "day of month {} out of range 1..=31",
            day
        )));
    }
    Ok(())
}

fn matches_days(rule: &RepeatRule, at: &DateTime<Utc>) -> bool {
    let weekday_ok = rule.days_of_week.is_empty()
        || rule
            .days_of_week
            .contains(&at.weekday().num_days_from_sunday());
    let monthday_ok = rule.days_of_month.is_empty() || rule.days_of_month.contains(&at.day());
    weekday_ok && monthday_ok
}

/// Step forward one day at a time until the day constraints hold.
fn align_to_days(rule: &RepeatRule, mut at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !rule.has_day_constraints() {
        return Some(at);
    }
    for _ in 0..=MAX_DAY_STEPS {
        if matches_days(rule, &at) {
            return Some(at);
        }
        at = at.checked_add_signed(TimeDelta::days(1))?;
    }
    None
}

fn advance(rule: &RepeatRule, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let interval = rule.interval.max(1);
    let n = interval as i64;
    match rule.frequency {
        Frequency::Minutely => base.checked_add_signed(TimeDelta::minutes(n)),
        Frequency::Hourly => base.checked_add_signed(TimeDelta::hours(n)),
        Frequency::Daily => base.checked_add_signed(TimeDelta::days(n)),
        Frequency::Weekly => base.checked_add_signed(TimeDelta::weeks(n)),
        Frequency::Monthly => base.checked_add_months(Months::new(interval)),
    }
}

/// Next occurrence strictly after `base_ms`, or `None` when the rule is exhausted.
pub fn next_occurrence(rule: &RepeatRule, base_ms: i64) -> Option<i64> {
    let base = DateTime::from_timestamp_millis(base_ms)?;
    let candidate = align_to_days(rule, advance(rule, base)?)?;
    let candidate_ms = candidate.timestamp_millis();
    if rule.until.map(|until| candidate_ms > until).unwrap_or(false) {
        return None;
    }
    Some(candidate_ms)
}

/// First execution instant: the later of `start` and `now`, aligned to the
/// rule's day constraints and bounded by `end`/`until`.
pub fn first_occurrence(config: &ScheduleConfig, now: i64) -> Option<i64> {
    let start = config.start.unwrap_or(now).max(now);
    let first = match &config.repeat {
        Some(rule) => {
            let aligned = align_to_days(rule, DateTime::from_timestamp_millis(start)?)?;
            let ms = aligned.timestamp_millis();
            if rule.until.map(|until| ms > until).unwrap_or(false) {
                return None;
            }
            ms
        }
        None => start,
    };
    if config.end.map(|end| first > end).unwrap_or(false) {
        return None;
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(y: i32, m: u32, d: u32, h: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_simple_frequencies() {
        let base = ms(2024, 1, 31, 9);
        assert_eq!(
            next_occurrence(&RepeatRule::every(Frequency::Minutely, 15), base),
            Some(base + 15 * 60_000)
        );
        assert_eq!(
            next_occurrence(&RepeatRule::every(Frequency::Hourly, 2), base),
            Some(ms(2024, 1, 31, 11))
        );
        assert_eq!(
            next_occurrence(&RepeatRule::every(Frequency::Weekly, 1), base),
            Some(ms(2024, 2, 7, 9))
        );
        // month arithmetic clamps to the last day
        assert_eq!(
            next_occurrence(&RepeatRule::every(Frequency::Monthly, 1), base),
            Some(ms(2024, 2, 29, 9))
        );
    }

    #[test]
    fn test_day_of_week_constraint_steps_forward() {
        // 2024-01-01 was a Monday
        let mut rule = RepeatRule::every(Frequency::Daily, 1);
        rule.days_of_week = vec![5]; // Friday
        assert_eq!(
            next_occurrence(&rule, ms(2024, 1, 1, 8)),
            Some(ms(2024, 1, 5, 8))
        );
        assert_eq!(
            next_occurrence(&rule, ms(2024, 1, 5, 8)),
            Some(ms(2024, 1, 12, 8))
        );
    }

    #[test]
    fn test_unsatisfiable_constraints_have_no_next() {
        let mut rule = RepeatRule::every(Frequency::Daily, 1);
        rule.days_of_month = vec![31];
        rule.days_of_week = vec![0];
        // a Sunday the 31st exists within a year of 2024-01-01 (March 31, 2024)
        assert_eq!(
            next_occurrence(&rule, ms(2024, 1, 1, 0)),
            Some(ms(2024, 3, 31, 0))
        );

        let mut impossible = RepeatRule::every(Frequency::Daily, 1);
        impossible.days_of_month = vec![31];
        impossible.days_of_week = vec![3];
        // Wednesday the 31st: next one after 2024-01-31 is 2024-07-31, but
        // stepping from 2024-08-01 finds nothing until 2025-12-31, beyond the bound
        assert_eq!(next_occurrence(&impossible, ms(2024, 7, 31, 0)), None);
    }

    #[test]
    fn test_until_terminates() {
        let mut rule = RepeatRule::every(Frequency::Daily, 1);
        rule.until = Some(ms(2024, 1, 2, 0));
        assert_eq!(next_occurrence(&rule, ms(2024, 1, 1, 0)), Some(ms(2024, 1, 2, 0)));
        assert_eq!(next_occurrence(&rule, ms(2024, 1, 2, 0)), None);
    }

    #[test]
    fn test_first_occurrence() {
        let now = ms(2024, 1, 1, 12);
        assert_eq!(first_occurrence(&ScheduleConfig::default(), now), Some(now));
        assert_eq!(
            first_occurrence(&ScheduleConfig::at(now - 1_000), now),
            Some(now)
        );
        assert_eq!(
            first_occurrence(&ScheduleConfig::at(now + 1_000), now),
            Some(now + 1_000)
        );

        let ended = ScheduleConfig {
            end: Some(now - 1),
            ..Default::default()
        };
        assert_eq!(first_occurrence(&ended, now), None);

        let mut rule = RepeatRule::every(Frequency::Weekly, 1);
        rule.days_of_week = vec![3]; // Wednesday
        let aligned = ScheduleConfig {
            repeat: Some(rule),
            ..Default::default()
        };
        assert_eq!(first_occurrence(&aligned, now), Some(ms(2024, 1, 3, 12)));
    }

    #[test]
    fn test_validate_rule() {
        assert!(validate_rule(&RepeatRule::every(Frequency::Daily, 0)).is_err());
        let mut rule = RepeatRule::every(Frequency::Daily, 1);
        rule.days_of_week = vec![7];
        assert!(validate_rule(&rule).is_err());
        rule.days_of_week = vec![];
        rule.days_of_month = vec![0];
        assert!(validate_rule(&rule).is_err());
        rule.days_of_month = vec![15];
        assert!(validate_rule(&rule).is_ok());
    }
}

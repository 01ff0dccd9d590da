//! # Feature: Recurrence
//!
//! Pure calendar arithmetic mapping a due date and a frequency rule to the next
//! occurrence. Never fails: malformed rules and arithmetic overflow yield `None`.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Weekly rules roll forward to the nearest configured weekday
//! - 1.0.0: Initial release with daily, monthly, yearly and custom intervals

use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::core::models::{Frequency, IntervalUnit, DEFAULT_WEEKDAY};

/// Compute the occurrence following `current` under `frequency`.
///
/// Returns `None` for one-shot reminders, unknown custom units, and dates
/// that would overflow the calendar.
pub fn next_due_date(current: DateTime<Utc>, frequency: &Frequency) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Once => None,
        Frequency::Daily => add_days(current, 1),
        Frequency::Weekly { days } => next_weekly(current, days),
        Frequency::Monthly => current.checked_add_months(Months::new(1)),
        Frequency::Yearly => current.checked_add_months(Months::new(12)),
        Frequency::Custom { unit, value } => {
            let value = (*value).max(1);
            match unit {
                IntervalUnit::Days => add_days(current, i64::from(value)),
                IntervalUnit::Weeks => add_days(current, i64::from(value) * 7),
                IntervalUnit::Months => current.checked_add_months(Months::new(value)),
                IntervalUnit::Unknown => None,
            }
        }
    }
}

fn add_days(current: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    current.checked_add_signed(Duration::try_days(days)?)
}

/// Jump one week, then walk forward until the weekday is allowed
fn next_weekly(current: DateTime<Utc>, days: &[u8]) -> Option<DateTime<Utc>> {
    let allowed: Vec<u32> = if days.iter().any(|&d| d <= 6) {
        days.iter().filter(|&&d| d <= 6).map(|&d| u32::from(d)).collect()
    } else {
        vec![u32::from(DEFAULT_WEEKDAY)]
    };

    let mut next = add_days(current, 7)?;
    // At most six extra steps before every weekday has been visited
    for _ in 0..7 {
        if allowed.contains(&next.weekday().num_days_from_sunday()) {
            return Some(next);
        }
        next = add_days(next, 1)?;
    }
    None
}

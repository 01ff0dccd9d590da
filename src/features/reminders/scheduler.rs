//! # Reminder Scheduler
//!
//! Decides when a reminder's next notification fires and which status it holds.
//! Every function takes `now` explicitly; nothing here reads the clock.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 2.0.0: Back-off loop skips occurrences whose notice window already passed
//! - 1.1.0: Added `first_fire_time` for newly saved reminders
//! - 1.0.0: Initial release

use chrono::{DateTime, Duration, Utc};
use log::warn;

use crate::core::models::{Reminder, ReminderStatus};
use crate::features::recurrence::next_due_date;

/// Hard bound on the back-off loop in [`next_fire_time`]
const MAX_SCHEDULING_STEPS: usize = 100_000;

/// Fire time for an occurrence: `due` minus the notice offset
fn fire_time_for(due: DateTime<Utc>, days_before: u32) -> Option<DateTime<Utc>> {
    due.checked_sub_signed(Duration::try_days(i64::from(days_before))?)
}

/// Next notification instant after a notification has just fired.
///
/// Moves to the following occurrence, applies the largest advance offset, and
/// for recurring reminders keeps advancing while that instant is not strictly
/// after `now` and the occurrence itself is still ahead of `now`. Returns
/// `None` when nothing further should be scheduled.
pub fn next_fire_time(reminder: &Reminder, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days_before = reminder.max_advance_days().unwrap_or(0);
    let mut due = next_due_date(reminder.due_date, &reminder.frequency)?;
    let mut candidate = fire_time_for(due, days_before)?;

    if candidate <= now && reminder.frequency.is_recurring() {
        let mut steps = 0;
        while candidate <= now && due > now {
            if steps >= MAX_SCHEDULING_STEPS {
                warn!(
                    "Reminder {} did not reach a future fire time after {} steps",
                    reminder.id, steps
                );
                return None;
            }
            due = next_due_date(due, &reminder.frequency)?;
            candidate = fire_time_for(due, days_before)?;
            steps += 1;
        }
    }

    (candidate > now).then_some(candidate)
}

/// Fire time for a reminder that was just created or edited.
///
/// Targets the current occurrence first; when its notice window is already
/// behind `now`, recurring reminders fall through to [`next_fire_time`].
pub fn first_fire_time(reminder: &Reminder, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days_before = reminder.max_advance_days().unwrap_or(0);
    if let Some(candidate) = fire_time_for(reminder.due_date, days_before) {
        if candidate > now {
            return Some(candidate);
        }
    }

    if reminder.frequency.is_recurring() {
        next_fire_time(reminder, now)
    } else {
        None
    }
}

/// Status implied by the due date; `Completed` is sticky
pub fn derive_status(
    current: ReminderStatus,
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ReminderStatus {
    match current {
        ReminderStatus::Completed => ReminderStatus::Completed,
        _ if due_date <= now => ReminderStatus::Overdue,
        _ => ReminderStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Frequency, IntervalUnit, Priority};
    use chrono::TimeZone;

    fn reminder(due: DateTime<Utc>, frequency: Frequency, advance: Vec<u32>) -> Reminder {
        Reminder {
            id: 1,
            user_id: 1,
            category_id: None,
            title: "Pay rent".to_string(),
            description: None,
            due_date: due,
            priority: Priority::Medium,
            status: ReminderStatus::Pending,
            frequency,
            advance_notice_days: advance,
            notify_email: true,
            notify_sms: false,
            notify_whatsapp: false,
            next_reminder_date: None,
            last_sent_at: None,
            completed_at: None,
            parent_id: None,
            version: 0,
            created_at: due,
            updated_at: due,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn all_frequencies() -> Vec<Frequency> {
        vec![
            Frequency::Once,
            Frequency::Daily,
            Frequency::Weekly { days: vec![1, 5] },
            Frequency::Monthly,
            Frequency::Yearly,
            Frequency::Custom {
                unit: IntervalUnit::Weeks,
                value: 2,
            },
            Frequency::Custom {
                unit: IntervalUnit::Unknown,
                value: 1,
            },
        ]
    }

    #[test]
    fn test_first_fire_uses_largest_offset() {
        let due = now() + Duration::days(10);
        let r = reminder(due, Frequency::Once, vec![7, 1]);
        let fire = first_fire_time(&r, now()).unwrap();
        assert_eq!(fire, due - Duration::days(7));
        assert!(fire > now());
    }

    #[test]
    fn test_next_fire_uses_largest_offset_of_next_occurrence() {
        // Next daily occurrence lands 10 days out
        let r = reminder(now() + Duration::days(9), Frequency::Daily, vec![1, 7]);
        assert_eq!(
            next_fire_time(&r, now()).unwrap(),
            now() + Duration::days(10) - Duration::days(7)
        );
    }

    #[test]
    fn test_next_fire_without_offsets_is_next_due() {
        let r = reminder(now() + Duration::days(1), Frequency::Monthly, vec![]);
        assert_eq!(
            next_fire_time(&r, now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 2, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_once_never_has_next_fire() {
        let r = reminder(now() + Duration::days(30), Frequency::Once, vec![7]);
        assert_eq!(next_fire_time(&r, now()), None);
    }

    #[test]
    fn test_back_off_skips_past_notice_windows() {
        // Next due in 3 days with a 7 day notice: notice already passed, so the
        // loop advances until due - 7 days is in the future (due = now + 8 days)
        let r = reminder(now() + Duration::days(2), Frequency::Daily, vec![7]);
        let fire = next_fire_time(&r, now()).unwrap();
        assert_eq!(fire, now() + Duration::days(1));
        assert!(fire > now());
    }

    #[test]
    fn test_back_off_weekly() {
        let due = Utc.with_ymd_and_hms(2025, 1, 3, 12, 0, 0).unwrap(); // Friday
        let r = reminder(due, Frequency::Weekly { days: vec![5] }, vec![14]);
        let fire = next_fire_time(&r, now()).unwrap();
        assert!(fire > now());
        // Fridays: 10th (fire Dec 27), 17th (fire Jan 3)
        assert_eq!(fire, Utc.with_ymd_and_hms(2025, 1, 3, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_far_past_due_dates_terminate() {
        let ancient = Utc.with_ymd_and_hms(1990, 3, 15, 8, 0, 0).unwrap();
        for frequency in all_frequencies() {
            for advance in [vec![], vec![1], vec![30, 7, 1]] {
                let r = reminder(ancient, frequency.clone(), advance);
                if let Some(fire) = next_fire_time(&r, now()) {
                    assert!(fire > now());
                }
                if let Some(fire) = first_fire_time(&r, now()) {
                    assert!(fire > now());
                }
            }
        }
    }

    #[test]
    fn test_recent_past_due_reaches_future_for_every_recurring_type() {
        let recent = now() - Duration::hours(1);
        for frequency in all_frequencies() {
            let r = reminder(recent, frequency.clone(), vec![]);
            let fire = next_fire_time(&r, now());
            match frequency {
                Frequency::Once
                | Frequency::Custom {
                    unit: IntervalUnit::Unknown,
                    ..
                } => assert_eq!(fire, None),
                _ => assert!(fire.unwrap() > now()),
            }
        }
    }

    #[test]
    fn test_first_fire_falls_through_for_recurring() {
        // Notice window for this occurrence already passed
        let r = reminder(now() + Duration::days(2), Frequency::Daily, vec![7]);
        assert_eq!(first_fire_time(&r, now()), next_fire_time(&r, now()));

        let once = reminder(now() + Duration::days(2), Frequency::Once, vec![7]);
        assert_eq!(first_fire_time(&once, now()), None);
    }

    #[test]
    fn test_derive_status() {
        let past = now() - Duration::minutes(1);
        let future = now() + Duration::minutes(1);
        assert_eq!(
            derive_status(ReminderStatus::Pending, past, now()),
            ReminderStatus::Overdue
        );
        assert_eq!(
            derive_status(ReminderStatus::Overdue, future, now()),
            ReminderStatus::Pending
        );
        assert_eq!(
            derive_status(ReminderStatus::Completed, past, now()),
            ReminderStatus::Completed
        );
        assert_eq!(
            derive_status(ReminderStatus::Pending, now(), now()),
            ReminderStatus::Overdue
        );
    }
}

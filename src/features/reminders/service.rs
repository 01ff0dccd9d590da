//! Mutation entry points for reminders: create, update, complete, snooze, duplicate
//!
//! Every write recomputes the fire time and status so stored rows always obey
//! the scheduler's rules, whichever path produced them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;

use crate::core::models::{Frequency, Priority, Reminder, ReminderStatus, UserSetting};
use crate::core::time::{is_storable, truncate_to_second};
use crate::database::Database;
use crate::features::recurrence::next_due_date;
use crate::features::reminders::scheduler::{derive_status, first_fire_time};

const MAX_TITLE_LENGTH: usize = 255;
const MAX_ADVANCE_DAYS: u32 = 3650;

/// User-editable reminder fields; `None` falls back to settings on create and
/// to the stored value on update
#[derive(Debug, Clone)]
pub struct ReminderDraft {
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub category_id: Option<i64>,
    pub priority: Priority,
    pub frequency: Frequency,
    pub advance_notice_days: Option<Vec<u32>>,
    pub notify_email: Option<bool>,
    pub notify_sms: Option<bool>,
    pub notify_whatsapp: Option<bool>,
}

impl ReminderDraft {
    pub fn new(title: impl Into<String>, due_date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            due_date,
            category_id: None,
            priority: Priority::default(),
            frequency: Frequency::Once,
            advance_notice_days: None,
            notify_email: None,
            notify_sms: None,
            notify_whatsapp: None,
        }
    }

    fn validate(&self) -> Result<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(anyhow::anyhow!("Reminder title cannot be empty"));
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(anyhow::anyhow!(
                "Reminder title is longer than {} characters",
                MAX_TITLE_LENGTH
            ));
        }
        if !is_storable(&self.due_date) {
            return Err(anyhow::anyhow!(
                "Due date {} is outside the supported years 0000-9999",
                self.due_date
            ));
        }
        if let Some(days) = &self.advance_notice_days {
            if let Some(&bad) = days.iter().find(|&&d| d > MAX_ADVANCE_DAYS) {
                return Err(anyhow::anyhow!(
                    "Advance notice of {} days exceeds the {} day limit",
                    bad,
                    MAX_ADVANCE_DAYS
                ));
            }
        }
        Ok(())
    }
}

/// Largest offset first, duplicates removed
fn normalize_advance(mut days: Vec<u32>) -> Vec<u32> {
    days.sort_unstable_by(|a, b| b.cmp(a));
    days.dedup();
    days
}

/// Refresh derived fields after the user-facing ones changed
fn reschedule(reminder: &mut Reminder, now: DateTime<Utc>) {
    reminder.status = derive_status(reminder.status, reminder.due_date, now);
    reminder.next_reminder_date = if reminder.is_completed() {
        None
    } else {
        first_fire_time(reminder, now)
    };
}

#[derive(Clone)]
pub struct ReminderService {
    db: Database,
}

impl ReminderService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn load(&self, id: i64) -> Result<Reminder> {
        self.db
            .get_reminder(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Reminder {} not found", id))
    }

    async fn save(&self, mut reminder: Reminder) -> Result<Reminder> {
        if !self.db.update_reminder(&reminder).await? {
            return Err(anyhow::anyhow!(
                "Reminder {} was modified concurrently, reload and try again",
                reminder.id
            ));
        }
        reminder.version += 1;
        Ok(reminder)
    }

    pub async fn create(
        &self,
        user_id: i64,
        draft: ReminderDraft,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        draft.validate()?;
        self.db
            .get_user(user_id)
            .await?
            .with_context(|| format!("User {user_id} not found"))?;

        let settings = self
            .db
            .get_user_settings(user_id)
            .await?
            .unwrap_or_else(|| UserSetting::defaults_for(user_id));
        let now = truncate_to_second(now);

        let mut reminder = Reminder {
            id: 0,
            user_id,
            category_id: draft.category_id,
            title: draft.title.trim().to_string(),
            description: draft.description,
            due_date: truncate_to_second(draft.due_date),
            priority: draft.priority,
            status: ReminderStatus::Pending,
            frequency: draft.frequency,
            advance_notice_days: normalize_advance(
                draft
                    .advance_notice_days
                    .unwrap_or(settings.default_advance_notice),
            ),
            notify_email: draft.notify_email.unwrap_or(settings.default_notify_email),
            notify_sms: draft.notify_sms.unwrap_or(settings.default_notify_sms),
            notify_whatsapp: draft
                .notify_whatsapp
                .unwrap_or(settings.default_notify_whatsapp),
            next_reminder_date: None,
            last_sent_at: None,
            completed_at: None,
            parent_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        reschedule(&mut reminder, now);

        reminder.id = self.db.insert_reminder(&reminder).await?;
        info!(
            "Created reminder {} for user {} ({}, next fire {:?})",
            reminder.id,
            user_id,
            reminder.frequency.type_name(),
            reminder.next_reminder_date
        );
        Ok(reminder)
    }

    pub async fn update(&self, id: i64, draft: ReminderDraft, now: DateTime<Utc>) -> Result<Reminder> {
        draft.validate()?;
        let mut reminder = self.load(id).await?;
        let now = truncate_to_second(now);

        reminder.title = draft.title.trim().to_string();
        reminder.description = draft.description;
        reminder.due_date = truncate_to_second(draft.due_date);
        reminder.category_id = draft.category_id;
        reminder.priority = draft.priority;
        reminder.frequency = draft.frequency;
        if let Some(days) = draft.advance_notice_days {
            reminder.advance_notice_days = normalize_advance(days);
        }
        reminder.notify_email = draft.notify_email.unwrap_or(reminder.notify_email);
        reminder.notify_sms = draft.notify_sms.unwrap_or(reminder.notify_sms);
        reminder.notify_whatsapp = draft.notify_whatsapp.unwrap_or(reminder.notify_whatsapp);
        reminder.updated_at = now;
        reschedule(&mut reminder, now);

        self.save(reminder).await
    }

    /// Complete a reminder; recurring ones get their next occurrence created
    /// in the same transaction, which is returned
    pub async fn complete(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Reminder>> {
        let reminder = self.load(id).await?;
        if reminder.is_completed() {
            return Err(anyhow::anyhow!("Reminder {} is already completed", id));
        }
        let now = truncate_to_second(now);

        let mut completed = reminder.clone();
        completed.status = ReminderStatus::Completed;
        completed.completed_at = Some(now);
        completed.next_reminder_date = None;
        completed.updated_at = now;

        let next_due = next_due_date(reminder.due_date, &reminder.frequency).filter(is_storable);
        let mut successor = next_due.map(|due| {
            let mut next = Reminder {
                id: 0,
                due_date: due,
                status: ReminderStatus::Pending,
                next_reminder_date: None,
                last_sent_at: None,
                completed_at: None,
                parent_id: Some(reminder.parent_id.unwrap_or(reminder.id)),
                version: 0,
                created_at: now,
                updated_at: now,
                ..reminder.clone()
            };
            reschedule(&mut next, now);
            next
        });

        match self
            .db
            .complete_with_successor(&completed, successor.as_ref())
            .await?
        {
            None => Err(anyhow::anyhow!(
                "Reminder {} was modified concurrently, reload and try again",
                id
            )),
            Some(successor_id) => {
                if let (Some(next), Some(next_id)) = (successor.as_mut(), successor_id) {
                    next.id = next_id;
                    info!(
                        "Completed reminder {}, next occurrence {} due {}",
                        id, next_id, next.due_date
                    );
                } else {
                    info!("Completed reminder {}", id);
                }
                Ok(successor)
            }
        }
    }

    /// Push the next notification to `until`, which must be in the future
    pub async fn snooze(
        &self,
        id: i64,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        if until <= now {
            return Err(anyhow::anyhow!("Snooze time must be in the future"));
        }
        if !is_storable(&until) {
            return Err(anyhow::anyhow!("Snooze time {} is out of range", until));
        }
        let mut reminder = self.load(id).await?;
        if reminder.is_completed() {
            return Err(anyhow::anyhow!("Cannot snooze completed reminder {}", id));
        }

        reminder.next_reminder_date = Some(truncate_to_second(until));
        reminder.updated_at = truncate_to_second(now);
        self.save(reminder).await
    }

    /// Every reminder a user owns, soonest due first
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Reminder>> {
        self.db.get_user_reminders(user_id).await
    }

    /// Fresh pending copy with no series link and no delivery history
    pub async fn duplicate(&self, id: i64, now: DateTime<Utc>) -> Result<Reminder> {
        let source = self.load(id).await?;
        let now = truncate_to_second(now);

        let mut copy = Reminder {
            id: 0,
            status: ReminderStatus::Pending,
            last_sent_at: None,
            completed_at: None,
            parent_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            ..source
        };
        copy.next_reminder_date = first_fire_time(&copy, now);

        copy.id = self.db.insert_reminder(&copy).await?;
        info!("Duplicated reminder {} as {}", id, copy.id);
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{sample_user, ts};
    use crate::core::models::IntervalUnit;
    use chrono::{Duration, TimeZone};

    async fn setup() -> (ReminderService, Database, i64) {
        let db = Database::in_memory().await.unwrap();
        let user_id = db.create_user(&sample_user()).await.unwrap();
        (ReminderService::new(db.clone()), db, user_id)
    }

    #[tokio::test]
    async fn test_create_applies_user_defaults() {
        let (service, db, user_id) = setup().await;
        let now = ts(2025, 1, 1, 9);

        let created = service
            .create(user_id, ReminderDraft::new("Dentist", ts(2025, 1, 20, 9)), now)
            .await
            .unwrap();
        assert_eq!(created.advance_notice_days, vec![7, 1]);
        assert!(created.notify_email);
        assert!(!created.notify_sms);
        assert_eq!(created.next_reminder_date, Some(ts(2025, 1, 13, 9)));
        assert_eq!(created.status, ReminderStatus::Pending);

        let mut settings = UserSetting::defaults_for(user_id);
        settings.default_advance_notice = vec![2];
        settings.default_notify_sms = true;
        db.save_user_settings(&settings).await.unwrap();

        let second = service
            .create(user_id, ReminderDraft::new("Gym", ts(2025, 1, 20, 9)), now)
            .await
            .unwrap();
        assert_eq!(second.advance_notice_days, vec![2]);
        assert!(second.notify_sms);
        assert_eq!(second.next_reminder_date, Some(ts(2025, 1, 18, 9)));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let (service, _db, user_id) = setup().await;
        let now = ts(2025, 1, 1, 9);

        assert!(service
            .create(user_id, ReminderDraft::new("   ", ts(2025, 1, 20, 9)), now)
            .await
            .is_err());

        let mut draft = ReminderDraft::new("Visa", ts(2025, 1, 20, 9));
        draft.advance_notice_days = Some(vec![5000]);
        assert!(service.create(user_id, draft, now).await.is_err());

        assert!(service
            .create(user_id + 42, ReminderDraft::new("Ghost", ts(2025, 1, 20, 9)), now)
            .await
            .is_err());

        let far_future = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        assert!(service
            .create(user_id, ReminderDraft::new("Time capsule", far_future), now)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_yearly_series_ends_at_last_storable_year() {
        let (service, _db, user_id) = setup().await;
        let mut draft = ReminderDraft::new("Millennium", ts(9999, 6, 1, 9));
        draft.frequency = Frequency::Yearly;
        let last = service.create(user_id, draft, ts(9999, 1, 1, 9)).await.unwrap();

        let successor = service.complete(last.id, ts(9999, 6, 1, 9)).await.unwrap();
        assert!(successor.is_none());
    }

    #[tokio::test]
    async fn test_list_for_user_orders_by_due_date() {
        let (service, db, user_id) = setup().await;
        let other_user = db.create_user(&sample_user()).await.unwrap();
        let now = ts(2025, 1, 1, 9);

        service
            .create(user_id, ReminderDraft::new("Later", ts(2025, 3, 1, 9)), now)
            .await
            .unwrap();
        service
            .create(user_id, ReminderDraft::new("Sooner", ts(2025, 2, 1, 9)), now)
            .await
            .unwrap();
        service
            .create(other_user, ReminderDraft::new("Not mine", ts(2025, 1, 15, 9)), now)
            .await
            .unwrap();

        let titles: Vec<_> = service
            .list_for_user(user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Sooner", "Later"]);
    }

    #[tokio::test]
    async fn test_create_past_due_is_overdue() {
        let (service, _db, user_id) = setup().await;
        let now = ts(2025, 1, 10, 9);

        let once = service
            .create(user_id, ReminderDraft::new("Late", ts(2025, 1, 5, 9)), now)
            .await
            .unwrap();
        assert_eq!(once.status, ReminderStatus::Overdue);
        assert_eq!(once.next_reminder_date, None);

        let mut draft = ReminderDraft::new("Standup", ts(2025, 1, 9, 12));
        draft.frequency = Frequency::Daily;
        draft.advance_notice_days = Some(vec![]);
        let daily = service.create(user_id, draft, now).await.unwrap();
        assert_eq!(daily.status, ReminderStatus::Overdue);
        assert_eq!(daily.next_reminder_date, Some(ts(2025, 1, 10, 12)));
    }

    #[tokio::test]
    async fn test_weekly_completion_creates_successor() {
        let (service, db, user_id) = setup().await;
        let now = ts(2025, 1, 1, 9);

        let mut draft = ReminderDraft::new("Team report", ts(2025, 1, 10, 9));
        draft.frequency = Frequency::Weekly { days: vec![5] };
        draft.advance_notice_days = Some(vec![1]);
        let parent = service.create(user_id, draft, now).await.unwrap();

        let completed_at = ts(2025, 1, 10, 10);
        let child = service.complete(parent.id, completed_at).await.unwrap().unwrap();
        assert_eq!(child.due_date, ts(2025, 1, 17, 9));
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.status, ReminderStatus::Pending);
        assert_eq!(child.next_reminder_date, Some(ts(2025, 1, 16, 9)));
        assert!(child.last_sent_at.is_none());

        let stored_parent = db.get_reminder(parent.id).await.unwrap().unwrap();
        assert_eq!(stored_parent.status, ReminderStatus::Completed);
        assert_eq!(stored_parent.completed_at, Some(completed_at));
        assert_eq!(stored_parent.next_reminder_date, None);

        // Grandchild still points at the series root
        let grandchild = service
            .complete(child.id, ts(2025, 1, 17, 10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grandchild.due_date, ts(2025, 1, 24, 9));
        assert_eq!(grandchild.parent_id, Some(parent.id));
        assert_eq!(db.get_child_reminders(parent.id).await.unwrap().len(), 2);

        assert!(service.complete(parent.id, ts(2025, 1, 18, 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_completing_once_has_no_successor() {
        let (service, _db, user_id) = setup().await;
        let reminder = service
            .create(user_id, ReminderDraft::new("Return book", ts(2025, 1, 10, 9)), ts(2025, 1, 1, 9))
            .await
            .unwrap();
        assert!(service
            .complete(reminder.id, ts(2025, 1, 2, 9))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_custom_unknown_unit_completes_without_successor() {
        let (service, _db, user_id) = setup().await;
        let mut draft = ReminderDraft::new("Odd rule", ts(2025, 1, 10, 9));
        draft.frequency = Frequency::Custom {
            unit: IntervalUnit::Unknown,
            value: 2,
        };
        let reminder = service.create(user_id, draft, ts(2025, 1, 1, 9)).await.unwrap();
        assert!(service
            .complete(reminder.id, ts(2025, 1, 2, 9))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_snooze() {
        let (service, _db, user_id) = setup().await;
        let now = ts(2025, 1, 13, 9);
        let reminder = service
            .create(user_id, ReminderDraft::new("Call bank", ts(2025, 1, 20, 9)), ts(2025, 1, 1, 9))
            .await
            .unwrap();

        assert!(service
            .snooze(reminder.id, now - Duration::hours(1), now)
            .await
            .is_err());

        let snoozed = service
            .snooze(reminder.id, now + Duration::hours(3), now)
            .await
            .unwrap();
        assert_eq!(snoozed.next_reminder_date, Some(now + Duration::hours(3)));
        assert_eq!(snoozed.version, reminder.version + 1);

        service.complete(reminder.id, now).await.unwrap();
        assert!(service
            .snooze(reminder.id, now + Duration::hours(3), now)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_keeps_unset_toggles_and_rechecks_version() {
        let (service, db, user_id) = setup().await;
        let now = ts(2025, 1, 1, 9);
        let mut draft = ReminderDraft::new("Taxes", ts(2025, 4, 15, 9));
        draft.notify_sms = Some(true);
        let reminder = service.create(user_id, draft, now).await.unwrap();

        let mut edit = ReminderDraft::new("Taxes (federal)", ts(2025, 4, 10, 9));
        edit.advance_notice_days = Some(vec![3, 14, 3]);
        let updated = service.update(reminder.id, edit, now).await.unwrap();
        assert_eq!(updated.title, "Taxes (federal)");
        assert!(updated.notify_sms);
        assert_eq!(updated.advance_notice_days, vec![14, 3]);
        assert_eq!(updated.next_reminder_date, Some(ts(2025, 3, 27, 9)));

        // Stale copy loses
        let mut stale = reminder.clone();
        stale.title = "Old".to_string();
        assert!(!db.update_reminder(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_resets_history() {
        let (service, db, user_id) = setup().await;
        let mut draft = ReminderDraft::new("Water plants", ts(2025, 1, 10, 9));
        draft.frequency = Frequency::Daily;
        let parent = service.create(user_id, draft, ts(2025, 1, 1, 9)).await.unwrap();
        let child = service
            .complete(parent.id, ts(2025, 1, 10, 9))
            .await
            .unwrap()
            .unwrap();

        let mut sent = db.get_reminder(child.id).await.unwrap().unwrap();
        sent.last_sent_at = Some(ts(2025, 1, 10, 9));
        db.update_reminder(&sent).await.unwrap();

        let copy = service.duplicate(child.id, ts(2025, 1, 10, 12)).await.unwrap();
        assert_ne!(copy.id, child.id);
        assert_eq!(copy.title, "Water plants");
        assert_eq!(copy.status, ReminderStatus::Pending);
        assert_eq!(copy.parent_id, None);
        assert!(copy.last_sent_at.is_none());
        assert!(copy.completed_at.is_none());
        assert_eq!(copy.frequency, Frequency::Daily);
        assert!(copy.next_reminder_date.unwrap() > ts(2025, 1, 10, 12));
    }
}

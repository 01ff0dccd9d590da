//! # Database
//!
//! SQLite persistence for users, settings, categories, reminders, notification
//! logs and named job locks. One connection guarded by an async mutex; every
//! method does its SQL work synchronously while holding the guard.
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.3.0: Named job locks for sweep overlap prevention
//! - 1.2.0: Version-checked reminder writes
//! - 1.1.0: Notification log retry bookkeeping
//! - 1.0.0: Initial schema

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sqlite::{Connection, State, Statement, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::models::{
    Category, Channel, Frequency, LogStatus, NotificationLog, Reminder, ReminderStatus, User,
    UserSetting,
};
use crate::core::time::{format_timestamp, parse_timestamp};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        whatsapp TEXT,
        timezone TEXT NOT NULL DEFAULT 'UTC',
        locale TEXT NOT NULL DEFAULT 'en'
    );

    CREATE TABLE IF NOT EXISTS user_settings (
        user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
        default_view TEXT NOT NULL DEFAULT 'list',
        items_per_page INTEGER NOT NULL DEFAULT 15,
        date_format TEXT NOT NULL DEFAULT 'gregorian',
        quiet_hours_start TEXT,
        quiet_hours_end TEXT,
        weekend_notifications INTEGER NOT NULL DEFAULT 1,
        default_advance_notice TEXT NOT NULL DEFAULT '[7,1]',
        default_notify_email INTEGER NOT NULL DEFAULT 1,
        default_notify_sms INTEGER NOT NULL DEFAULT 0,
        default_notify_whatsapp INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        color TEXT
    );

    CREATE TABLE IF NOT EXISTS reminders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
        title TEXT NOT NULL,
        description TEXT,
        due_date TEXT NOT NULL,
        priority TEXT NOT NULL DEFAULT 'medium',
        status TEXT NOT NULL DEFAULT 'pending',
        frequency_type TEXT NOT NULL DEFAULT 'once',
        frequency_value TEXT,
        advance_notice_days TEXT NOT NULL DEFAULT '[]',
        notify_email INTEGER NOT NULL DEFAULT 1,
        notify_sms INTEGER NOT NULL DEFAULT 0,
        notify_whatsapp INTEGER NOT NULL DEFAULT 0,
        next_reminder_date TEXT,
        last_sent_at TEXT,
        completed_at TEXT,
        parent_id INTEGER REFERENCES reminders(id) ON DELETE CASCADE,
        version INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_reminders_due_fire
        ON reminders (status, next_reminder_date);
    CREATE INDEX IF NOT EXISTS idx_reminders_user ON reminders (user_id);
    CREATE INDEX IF NOT EXISTS idx_reminders_parent ON reminders (parent_id);

    CREATE TABLE IF NOT EXISTS notification_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        reminder_id INTEGER NOT NULL REFERENCES reminders(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        channel TEXT NOT NULL,
        recipient TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        sent_at TEXT,
        next_retry_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_notification_logs_retry
        ON notification_logs (status, next_retry_at);
    CREATE INDEX IF NOT EXISTS idx_notification_logs_reminder
        ON notification_logs (reminder_id);

    CREATE TABLE IF NOT EXISTS job_locks (
        name TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
";

const REMINDER_COLUMNS: &str = "id, user_id, category_id, title, description, due_date, priority, \
     status, frequency_type, frequency_value, advance_notice_days, notify_email, notify_sms, \
     notify_whatsapp, next_reminder_date, last_sent_at, completed_at, parent_id, version, \
     created_at, updated_at";

const LOG_COLUMNS: &str = "id, reminder_id, user_id, channel, recipient, status, error_message, \
     retry_count, sent_at, next_retry_at, created_at, updated_at";

const USER_COLUMNS: &str = "id, name, email, phone, whatsapp, timezone, locale";

const SETTING_COLUMNS: &str = "user_id, default_view, items_per_page, date_format, \
     quiet_hours_start, quiet_hours_end, weekend_notifications, default_advance_notice, \
     default_notify_email, default_notify_sms, default_notify_whatsapp";

/// Post-dispatch state for one reminder
#[derive(Debug, Clone)]
pub struct ReminderStateUpdate {
    pub status: ReminderStatus,
    pub next_reminder_date: Option<DateTime<Utc>>,
    pub last_sent_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// How a post-dispatch update landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdateOutcome {
    /// The row was unchanged since it was read
    Applied,
    /// A concurrent write left the schedule alone; the update went on top of it
    Rebased,
    /// A concurrent write changed the schedule (or removed the row) and was kept
    Superseded,
}

/// Filters for listing notification logs
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub user_id: Option<i64>,
    pub reminder_id: Option<i64>,
    pub channel: Option<Channel>,
    pub status: Option<LogStatus>,
    /// Zero means no limit
    pub limit: usize,
}

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub async fn new(path: &str) -> Result<Self> {
        let connection = sqlite::open(path)
            .with_context(|| format!("Failed to open database at {path}"))?;
        connection.execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")?;
        connection.execute(SCHEMA)?;
        info!("Database ready at {path}");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Private in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        let connection = sqlite::open(":memory:")?;
        connection.execute(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Raw SQL for tests that need to put the store into states the API never produces
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(sql)?;
        Ok(())
    }

    // Users and settings

    pub async fn create_user(&self, user: &User) -> Result<i64> {
        let conn = self.connection.lock().await;
        execute(
            &conn,
            "INSERT INTO users (name, email, phone, whatsapp, timezone, locale)
             VALUES (?, ?, ?, ?, ?, ?)",
            vec![
                text(&user.name),
                opt_text(user.email.as_deref()),
                opt_text(user.phone.as_deref()),
                opt_text(user.whatsapp.as_deref()),
                text(&user.timezone),
                text(&user.locale),
            ],
        )?;
        last_insert_id(&conn)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.connection.lock().await;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        Ok(query(&conn, &sql, vec![int(id)], read_user)?.into_iter().next())
    }

    pub async fn save_user_settings(&self, settings: &UserSetting) -> Result<()> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "INSERT OR REPLACE INTO user_settings ({SETTING_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        execute(
            &conn,
            &sql,
            vec![
                int(settings.user_id),
                text(&settings.default_view),
                int(i64::from(settings.items_per_page)),
                text(&settings.date_format),
                opt_text(settings.quiet_hours_start.as_deref()),
                opt_text(settings.quiet_hours_end.as_deref()),
                flag(settings.weekend_notifications),
                Value::String(serde_json::to_string(&settings.default_advance_notice)?),
                flag(settings.default_notify_email),
                flag(settings.default_notify_sms),
                flag(settings.default_notify_whatsapp),
            ],
        )?;
        Ok(())
    }

    pub async fn get_user_settings(&self, user_id: i64) -> Result<Option<UserSetting>> {
        let conn = self.connection.lock().await;
        let sql = format!("SELECT {SETTING_COLUMNS} FROM user_settings WHERE user_id = ?");
        Ok(query(&conn, &sql, vec![int(user_id)], read_setting)?
            .into_iter()
            .next())
    }

    // Categories

    pub async fn create_category(
        &self,
        user_id: Option<i64>,
        name: &str,
        color: Option<&str>,
    ) -> Result<i64> {
        let conn = self.connection.lock().await;
        execute(
            &conn,
            "INSERT INTO categories (user_id, name, color) VALUES (?, ?, ?)",
            vec![opt_int(user_id), text(name), opt_text(color)],
        )?;
        last_insert_id(&conn)
    }

    pub async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.connection.lock().await;
        let rows = query(
            &conn,
            "SELECT id, user_id, name, color FROM categories WHERE id = ?",
            vec![int(id)],
            |stmt| {
                Ok(Category {
                    id: stmt.read::<i64, _>(0)?,
                    user_id: stmt.read::<Option<i64>, _>(1)?,
                    name: stmt.read::<String, _>(2)?,
                    color: stmt.read::<Option<String>, _>(3)?,
                })
            },
        )?;
        Ok(rows.into_iter().next())
    }

    /// Delete a category; reminders keep existing with the reference cleared
    pub async fn delete_category(&self, id: i64) -> Result<bool> {
        let conn = self.connection.lock().await;
        transaction(&conn, |conn| {
            let detached = execute(
                conn,
                "UPDATE reminders SET category_id = NULL, version = version + 1
                 WHERE category_id = ?",
                vec![int(id)],
            )?;
            let deleted = execute(conn, "DELETE FROM categories WHERE id = ?", vec![int(id)])?;
            if detached > 0 {
                debug!("Detached {detached} reminders from deleted category {id}");
            }
            Ok(deleted > 0)
        })
    }

    // Reminders

    pub async fn insert_reminder(&self, reminder: &Reminder) -> Result<i64> {
        let conn = self.connection.lock().await;
        insert_reminder_row(&conn, reminder)
    }

    pub async fn get_reminder(&self, id: i64) -> Result<Option<Reminder>> {
        let conn = self.connection.lock().await;
        let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?");
        Ok(query(&conn, &sql, vec![int(id)], read_reminder)?
            .into_iter()
            .next())
    }

    /// Write every mutable field, guarded by `reminder.version`.
    ///
    /// Returns `false` when the row changed since it was read.
    pub async fn update_reminder(&self, reminder: &Reminder) -> Result<bool> {
        let conn = self.connection.lock().await;
        update_reminder_row(&conn, reminder)
    }

    /// Mark a reminder completed and insert its successor in one transaction.
    ///
    /// Returns `Ok(None)` without inserting anything when the completion lost
    /// a version race; otherwise the successor id, if one was given.
    pub async fn complete_with_successor(
        &self,
        completed: &Reminder,
        successor: Option<&Reminder>,
    ) -> Result<Option<Option<i64>>> {
        let conn = self.connection.lock().await;
        transaction(&conn, |conn| {
            if !update_reminder_row(conn, completed)? {
                return Ok(None);
            }
            let successor_id = match successor {
                Some(next) => Some(insert_reminder_row(conn, next)?),
                None => None,
            };
            Ok(Some(successor_id))
        })
    }

    /// Reminders whose notification is due: not completed, fire time set and elapsed
    pub async fn get_due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status != 'completed'
               AND next_reminder_date IS NOT NULL
               AND next_reminder_date <= ?
             ORDER BY next_reminder_date ASC, id ASC"
        );
        query_lenient(&conn, &sql, vec![time(&now)], read_reminder)
    }

    /// Apply the sweep's post-dispatch state to the row `snapshot` was read from.
    ///
    /// If another write bumped the version meanwhile, the row is re-read in the
    /// same transaction. Edits that leave the schedule as it was (title, category,
    /// channels) get the update applied on top; a snooze, completion or
    /// rescheduling edit wins.
    pub async fn apply_state_update(
        &self,
        snapshot: &Reminder,
        update: &ReminderStateUpdate,
    ) -> Result<StateUpdateOutcome> {
        let conn = self.connection.lock().await;
        transaction(&conn, |conn| {
            if write_state(conn, snapshot.id, snapshot.version, update)? {
                return Ok(StateUpdateOutcome::Applied);
            }

            let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?");
            let current = query(conn, &sql, vec![int(snapshot.id)], read_reminder)?
                .into_iter()
                .next();
            let Some(current) = current.filter(|row| row.same_schedule(snapshot)) else {
                return Ok(StateUpdateOutcome::Superseded);
            };
            if !write_state(conn, current.id, current.version, update)? {
                return Ok(StateUpdateOutcome::Superseded);
            }
            debug!(
                "Reminder {} rebased post-dispatch state onto version {}",
                current.id, current.version
            );
            Ok(StateUpdateOutcome::Rebased)
        })
    }

    /// One-shot reminders that were notified, have nothing left to fire, and
    /// whose due date passed become completed
    pub async fn complete_notified_once_reminders(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.connection.lock().await;
        execute(
            &conn,
            "UPDATE reminders
             SET status = 'completed', completed_at = ?, updated_at = ?, version = version + 1
             WHERE status != 'completed'
               AND frequency_type = 'once'
               AND last_sent_at IS NOT NULL
               AND next_reminder_date IS NULL
               AND due_date <= ?",
            vec![time(&now), time(&now), time(&now)],
        )
    }

    /// Re-derive `overdue` for pending reminders whose due date passed
    pub async fn mark_overdue_reminders(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.connection.lock().await;
        execute(
            &conn,
            "UPDATE reminders
             SET status = 'overdue', updated_at = ?, version = version + 1
             WHERE status = 'pending' AND due_date <= ?",
            vec![time(&now), time(&now)],
        )
    }

    pub async fn get_user_reminders(&self, user_id: i64) -> Result<Vec<Reminder>> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE user_id = ? ORDER BY due_date ASC, id ASC"
        );
        query(&conn, &sql, vec![int(user_id)], read_reminder)
    }

    /// Occurrences generated from a series root
    pub async fn get_child_reminders(&self, parent_id: i64) -> Result<Vec<Reminder>> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE parent_id = ? ORDER BY due_date ASC, id ASC"
        );
        query(&conn, &sql, vec![int(parent_id)], read_reminder)
    }

    // Notification logs

    /// Write the pending audit row that precedes every transport call
    pub async fn create_notification_log(
        &self,
        reminder_id: i64,
        user_id: i64,
        channel: Channel,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection.lock().await;
        execute(
            &conn,
            "INSERT INTO notification_logs
                (reminder_id, user_id, channel, recipient, status, retry_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)",
            vec![
                int(reminder_id),
                int(user_id),
                text(channel.as_str()),
                text(recipient),
                time(&now),
                time(&now),
            ],
        )?;
        last_insert_id(&conn)
    }

    pub async fn mark_log_sent(&self, id: i64, attempts: u32, sent_at: DateTime<Utc>) -> Result<()> {
        let conn = self.connection.lock().await;
        execute(
            &conn,
            "UPDATE notification_logs
             SET status = 'success', sent_at = ?, retry_count = ?, error_message = NULL,
                 next_retry_at = NULL, updated_at = ?
             WHERE id = ?",
            vec![time(&sent_at), int(i64::from(attempts)), time(&sent_at), int(id)],
        )?;
        Ok(())
    }

    pub async fn mark_log_failed(
        &self,
        id: i64,
        error: &str,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connection.lock().await;
        execute(
            &conn,
            "UPDATE notification_logs
             SET status = 'failed', error_message = ?, retry_count = ?, next_retry_at = ?,
                 updated_at = ?
             WHERE id = ?",
            vec![
                text(error),
                int(i64::from(attempts)),
                opt_time(next_retry_at),
                time(&now),
                int(id),
            ],
        )?;
        Ok(())
    }

    pub async fn get_notification_log(&self, id: i64) -> Result<Option<NotificationLog>> {
        let conn = self.connection.lock().await;
        let sql = format!("SELECT {LOG_COLUMNS} FROM notification_logs WHERE id = ?");
        Ok(query(&conn, &sql, vec![int(id)], read_log)?.into_iter().next())
    }

    /// Logs scheduled for another attempt: failed with attempts left, or reset for resend.
    /// Pending rows without a retry time are in-flight or crash leftovers and are never picked.
    pub async fn get_retryable_logs(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<NotificationLog>> {
        let conn = self.connection.lock().await;
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM notification_logs
             WHERE next_retry_at IS NOT NULL
               AND next_retry_at <= ?
               AND ((status = 'failed' AND retry_count < ?) OR status = 'pending')
             ORDER BY next_retry_at ASC, id ASC"
        );
        query(
            &conn,
            &sql,
            vec![time(&now), int(i64::from(max_attempts))],
            read_log,
        )
    }

    /// Take a retryable log out of the retry queue before re-sending it.
    ///
    /// Returns `false` if another worker already claimed it.
    pub async fn claim_log_for_retry(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.connection.lock().await;
        let changed = execute(
            &conn,
            "UPDATE notification_logs
             SET status = 'pending', next_retry_at = NULL, updated_at = ?
             WHERE id = ? AND next_retry_at IS NOT NULL AND next_retry_at <= ?",
            vec![time(&now), int(id), time(&now)],
        )?;
        Ok(changed > 0)
    }

    /// Manual resend: back to pending with a fresh attempt budget, picked up by the next retry pass
    pub async fn reset_log_for_resend(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.connection.lock().await;
        let changed = execute(
            &conn,
            "UPDATE notification_logs
             SET status = 'pending', retry_count = 0, error_message = NULL,
                 next_retry_at = ?, updated_at = ?
             WHERE id = ? AND status = 'failed'",
            vec![time(&now), time(&now), int(id)],
        )?;
        Ok(changed > 0)
    }

    pub async fn list_notification_logs(&self, filter: &LogFilter) -> Result<Vec<NotificationLog>> {
        let conn = self.connection.lock().await;
        let mut sql = format!("SELECT {LOG_COLUMNS} FROM notification_logs WHERE 1 = 1");
        let mut values = Vec::new();

        if let Some(user_id) = filter.user_id {
            sql.push_str(" AND user_id = ?");
            values.push(int(user_id));
        }
        if let Some(reminder_id) = filter.reminder_id {
            sql.push_str(" AND reminder_id = ?");
            values.push(int(reminder_id));
        }
        if let Some(channel) = filter.channel {
            sql.push_str(" AND channel = ?");
            values.push(text(channel.as_str()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(text(status.to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if filter.limit > 0 {
            sql.push_str(" LIMIT ?");
            values.push(int(filter.limit as i64));
        }

        query(&conn, &sql, values, read_log)
    }

    // Job locks

    /// Take the named lock unless another owner holds an unexpired lease
    pub async fn try_acquire_lock(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.connection.lock().await;
        let changed = execute(
            &conn,
            "INSERT INTO job_locks (name, owner, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE
                SET owner = excluded.owner, expires_at = excluded.expires_at
                WHERE job_locks.expires_at <= ?",
            vec![text(name), text(owner), time(&expires_at), time(&now)],
        )?;
        Ok(changed > 0)
    }

    /// Push out the lease of a lock this owner still holds
    pub async fn renew_lock(
        &self,
        name: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.connection.lock().await;
        let changed = execute(
            &conn,
            "UPDATE job_locks SET expires_at = ? WHERE name = ? AND owner = ?",
            vec![time(&expires_at), text(name), text(owner)],
        )?;
        Ok(changed > 0)
    }

    pub async fn release_lock(&self, name: &str, owner: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let changed = execute(
            &conn,
            "DELETE FROM job_locks WHERE name = ? AND owner = ?",
            vec![text(name), text(owner)],
        )?;
        Ok(changed > 0)
    }
}

// Row helpers

fn insert_reminder_row(conn: &Connection, reminder: &Reminder) -> Result<i64> {
    let sql = format!(
        "INSERT INTO reminders ({REMINDER_COLUMNS})
         VALUES (NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    let mut values = reminder_values(reminder)?;
    values.push(int(reminder.version));
    values.push(time(&reminder.created_at));
    values.push(time(&reminder.updated_at));
    execute(conn, &sql, values)?;
    last_insert_id(conn)
}

fn write_state(
    conn: &Connection,
    id: i64,
    version: i64,
    update: &ReminderStateUpdate,
) -> Result<bool> {
    let changed = execute(
        conn,
        "UPDATE reminders
         SET status = ?, next_reminder_date = ?, last_sent_at = ?, completed_at = ?,
             updated_at = ?, version = version + 1
         WHERE id = ? AND version = ? AND status != 'completed'",
        vec![
            text(update.status.to_string()),
            opt_time(update.next_reminder_date),
            time(&update.last_sent_at),
            opt_time(update.completed_at),
            time(&update.last_sent_at),
            int(id),
            int(version),
        ],
    )?;
    Ok(changed > 0)
}

fn update_reminder_row(conn: &Connection, reminder: &Reminder) -> Result<bool> {
    let mut values = reminder_values(reminder)?;
    values.push(time(&reminder.updated_at));
    values.push(int(reminder.id));
    values.push(int(reminder.version));
    let changed = execute(
        conn,
        "UPDATE reminders
         SET user_id = ?, category_id = ?, title = ?, description = ?, due_date = ?,
             priority = ?, status = ?, frequency_type = ?, frequency_value = ?,
             advance_notice_days = ?, notify_email = ?, notify_sms = ?, notify_whatsapp = ?,
             next_reminder_date = ?, last_sent_at = ?, completed_at = ?, parent_id = ?,
             updated_at = ?, version = version + 1
         WHERE id = ? AND version = ?",
        values,
    )?;
    Ok(changed > 0)
}

/// Values for every column between `user_id` and `parent_id`, in column order
fn reminder_values(reminder: &Reminder) -> Result<Vec<Value>> {
    let payload = match reminder.frequency.payload() {
        Some(json) => Value::String(serde_json::to_string(&json)?),
        None => Value::Null,
    };
    Ok(vec![
        int(reminder.user_id),
        opt_int(reminder.category_id),
        text(&reminder.title),
        opt_text(reminder.description.as_deref()),
        time(&reminder.due_date),
        text(reminder.priority.as_str()),
        text(reminder.status.to_string()),
        text(reminder.frequency.type_name()),
        payload,
        Value::String(serde_json::to_string(&reminder.advance_notice_days)?),
        flag(reminder.notify_email),
        flag(reminder.notify_sms),
        flag(reminder.notify_whatsapp),
        opt_time(reminder.next_reminder_date),
        opt_time(reminder.last_sent_at),
        opt_time(reminder.completed_at),
        opt_int(reminder.parent_id),
    ])
}

fn read_reminder(stmt: &Statement<'_>) -> Result<Reminder> {
    let id = stmt.read::<i64, _>(0)?;
    let frequency_type = stmt.read::<String, _>(8)?;
    let payload = stmt
        .read::<Option<String>, _>(9)?
        .and_then(|raw| match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Reminder {id} has malformed frequency_value ({e}), using defaults");
                None
            }
        });
    let advance_notice_days = parse_day_list(stmt.read::<Option<String>, _>(10)?, id);

    Ok(Reminder {
        id,
        user_id: stmt.read::<i64, _>(1)?,
        category_id: stmt.read::<Option<i64>, _>(2)?,
        title: stmt.read::<String, _>(3)?,
        description: stmt.read::<Option<String>, _>(4)?,
        due_date: parse_timestamp(&stmt.read::<String, _>(5)?)?,
        priority: stmt.read::<String, _>(6)?.parse()?,
        status: stmt.read::<String, _>(7)?.parse()?,
        frequency: Frequency::from_parts(&frequency_type, payload.as_ref())?,
        advance_notice_days,
        notify_email: stmt.read::<i64, _>(11)? != 0,
        notify_sms: stmt.read::<i64, _>(12)? != 0,
        notify_whatsapp: stmt.read::<i64, _>(13)? != 0,
        next_reminder_date: read_opt_time(stmt, 14)?,
        last_sent_at: read_opt_time(stmt, 15)?,
        completed_at: read_opt_time(stmt, 16)?,
        parent_id: stmt.read::<Option<i64>, _>(17)?,
        version: stmt.read::<i64, _>(18)?,
        created_at: parse_timestamp(&stmt.read::<String, _>(19)?)?,
        updated_at: parse_timestamp(&stmt.read::<String, _>(20)?)?,
    })
}

fn read_log(stmt: &Statement<'_>) -> Result<NotificationLog> {
    Ok(NotificationLog {
        id: stmt.read::<i64, _>(0)?,
        reminder_id: stmt.read::<i64, _>(1)?,
        user_id: stmt.read::<i64, _>(2)?,
        channel: stmt.read::<String, _>(3)?.parse()?,
        recipient: stmt.read::<String, _>(4)?,
        status: stmt.read::<String, _>(5)?.parse()?,
        error_message: stmt.read::<Option<String>, _>(6)?,
        retry_count: u32::try_from(stmt.read::<i64, _>(7)?).unwrap_or(0),
        sent_at: read_opt_time(stmt, 8)?,
        next_retry_at: read_opt_time(stmt, 9)?,
        created_at: parse_timestamp(&stmt.read::<String, _>(10)?)?,
        updated_at: parse_timestamp(&stmt.read::<String, _>(11)?)?,
    })
}

fn read_user(stmt: &Statement<'_>) -> Result<User> {
    Ok(User {
        id: stmt.read::<i64, _>(0)?,
        name: stmt.read::<String, _>(1)?,
        email: stmt.read::<Option<String>, _>(2)?,
        phone: stmt.read::<Option<String>, _>(3)?,
        whatsapp: stmt.read::<Option<String>, _>(4)?,
        timezone: stmt.read::<String, _>(5)?,
        locale: stmt.read::<String, _>(6)?,
    })
}

fn read_setting(stmt: &Statement<'_>) -> Result<UserSetting> {
    let user_id = stmt.read::<i64, _>(0)?;
    Ok(UserSetting {
        user_id,
        default_view: stmt.read::<String, _>(1)?,
        items_per_page: u32::try_from(stmt.read::<i64, _>(2)?).unwrap_or(15),
        date_format: stmt.read::<String, _>(3)?,
        quiet_hours_start: stmt.read::<Option<String>, _>(4)?,
        quiet_hours_end: stmt.read::<Option<String>, _>(5)?,
        weekend_notifications: stmt.read::<i64, _>(6)? != 0,
        default_advance_notice: parse_day_list(stmt.read::<Option<String>, _>(7)?, user_id),
        default_notify_email: stmt.read::<i64, _>(8)? != 0,
        default_notify_sms: stmt.read::<i64, _>(9)? != 0,
        default_notify_whatsapp: stmt.read::<i64, _>(10)? != 0,
    })
}

/// JSON array of day offsets; anything unreadable counts as empty
fn parse_day_list(raw: Option<String>, owner_id: i64) -> Vec<u32> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<u32>>(&raw) {
        Ok(days) => days,
        Err(e) => {
            warn!("Row {owner_id} has malformed day list '{raw}': {e}");
            Vec::new()
        }
    }
}

fn read_opt_time(stmt: &Statement<'_>, index: usize) -> Result<Option<DateTime<Utc>>> {
    stmt.read::<Option<String>, _>(index)?
        .map(|raw| parse_timestamp(&raw))
        .transpose()
}

// Statement helpers

fn bind_values(stmt: &mut Statement<'_>, values: Vec<Value>) -> Result<()> {
    for (index, value) in values.into_iter().enumerate() {
        stmt.bind((index + 1, value))?;
    }
    Ok(())
}

/// Run a write statement and return the number of rows it changed
fn execute(conn: &Connection, sql: &str, values: Vec<Value>) -> Result<usize> {
    {
        let mut stmt = conn.prepare(sql)?;
        bind_values(&mut stmt, values)?;
        while let State::Row = stmt.next()? {}
    }
    let changes = scalar(conn, "SELECT changes()")?;
    Ok(usize::try_from(changes).unwrap_or(0))
}

fn query<T, F>(conn: &Connection, sql: &str, values: Vec<Value>, map: F) -> Result<Vec<T>>
where
    F: Fn(&Statement<'_>) -> Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    bind_values(&mut stmt, values)?;
    let mut rows = Vec::new();
    while let State::Row = stmt.next()? {
        rows.push(map(&stmt)?);
    }
    Ok(rows)
}

/// Like [`query`], but rows that fail to decode are logged and skipped
fn query_lenient<T, F>(conn: &Connection, sql: &str, values: Vec<Value>, map: F) -> Result<Vec<T>>
where
    F: Fn(&Statement<'_>) -> Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    bind_values(&mut stmt, values)?;
    let mut rows = Vec::new();
    while let State::Row = stmt.next()? {
        match map(&stmt) {
            Ok(row) => rows.push(row),
            Err(e) => {
                let id = stmt.read::<i64, _>(0).unwrap_or_default();
                error!("Skipping unreadable row {id}: {e:#}");
            }
        }
    }
    Ok(rows)
}

fn scalar(conn: &Connection, sql: &str) -> Result<i64> {
    let mut stmt = conn.prepare(sql)?;
    match stmt.next()? {
        State::Row => Ok(stmt.read::<i64, _>(0)?),
        State::Done => Err(anyhow::anyhow!("Query returned no rows: {}", sql)),
    }
}

fn last_insert_id(conn: &Connection) -> Result<i64> {
    scalar(conn, "SELECT last_insert_rowid()")
}

fn transaction<T, F>(conn: &Connection, body: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    conn.execute("BEGIN IMMEDIATE")?;
    match body(conn) {
        Ok(value) => {
            conn.execute("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute("ROLLBACK") {
                warn!("Rollback failed after error '{e}': {rollback}");
            }
            Err(e)
        }
    }
}

fn text(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}

fn int(value: i64) -> Value {
    Value::Integer(value)
}

fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

fn time(value: &DateTime<Utc>) -> Value {
    Value::String(format_timestamp(value))
}

fn opt_time(value: Option<DateTime<Utc>>) -> Value {
    value.map_or(Value::Null, |v| Value::String(format_timestamp(&v)))
}

//! Domain records shared by the scheduling engine and the storage layer
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Added `next_retry_at` to notification logs for the retry pass
//! - 1.1.0: Frequency payload became a tagged enum instead of raw JSON
//! - 1.0.0: Initial models

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Weekday index used when a weekly rule carries no usable days (Monday)
pub const DEFAULT_WEEKDAY: u8 = 1;

/// Advance notice applied when neither the reminder nor the user settings provide one
pub const DEFAULT_ADVANCE_NOTICE: [u32; 2] = [7, 1];

/// Lifecycle status of a reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    /// Due date still ahead
    Pending,
    /// Finished, either explicitly or by the one-shot auto-completion rule
    Completed,
    /// Due date elapsed without completion
    Overdue,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderStatus::Pending => write!(f, "pending"),
            ReminderStatus::Completed => write!(f, "completed"),
            ReminderStatus::Overdue => write!(f, "overdue"),
        }
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReminderStatus::Pending),
            "completed" => Ok(ReminderStatus::Completed),
            "overdue" => Ok(ReminderStatus::Overdue),
            _ => Err(anyhow::anyhow!("Invalid reminder status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(anyhow::anyhow!("Invalid priority: {}", s)),
        }
    }
}

/// Unit of a custom recurrence interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
    /// Anything else found in stored data; never produces another occurrence
    #[serde(other)]
    Unknown,
}

impl IntervalUnit {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "days" => IntervalUnit::Days,
            "weeks" => IntervalUnit::Weeks,
            "months" => IntervalUnit::Months,
            _ => IntervalUnit::Unknown,
        }
    }
}

/// Recurrence rule with its type-specific payload
///
/// Stored as two columns (`frequency_type` text plus a JSON `frequency_value`),
/// see [`Frequency::from_parts`] and [`Frequency::payload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    /// Weekday indices, 0 = Sunday through 6 = Saturday
    Weekly { days: Vec<u8> },
    Monthly,
    Yearly,
    Custom { unit: IntervalUnit, value: u32 },
}

impl Frequency {
    pub fn type_name(&self) -> &'static str {
        match self {
            Frequency::Once => "once",
            Frequency::Daily => "daily",
            Frequency::Weekly { .. } => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
            Frequency::Custom { .. } => "custom",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Frequency::Once)
    }

    /// Build a rule from its stored type name and optional JSON payload.
    ///
    /// A missing or malformed payload falls back to the documented defaults
    /// (weekly: Monday, custom: every 1 day). Only an unknown type name is an error.
    pub fn from_parts(frequency_type: &str, value: Option<&JsonValue>) -> Result<Self> {
        match frequency_type.to_lowercase().as_str() {
            "once" => Ok(Frequency::Once),
            "daily" => Ok(Frequency::Daily),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            "weekly" => {
                let mut days: Vec<u8> = value
                    .and_then(|v| v.get("days"))
                    .and_then(|d| d.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.as_u64())
                            .filter(|&day| day <= 6)
                            .map(|day| day as u8)
                            .collect()
                    })
                    .unwrap_or_default();
                days.sort_unstable();
                days.dedup();
                if days.is_empty() {
                    days.push(DEFAULT_WEEKDAY);
                }
                Ok(Frequency::Weekly { days })
            }
            "custom" => {
                let unit = value
                    .and_then(|v| v.get("unit"))
                    .and_then(|u| u.as_str())
                    .map(IntervalUnit::parse)
                    .unwrap_or(IntervalUnit::Days);
                let value = value
                    .and_then(|v| v.get("value"))
                    .and_then(|n| n.as_u64())
                    .filter(|&n| n > 0 && n <= u32::MAX as u64)
                    .map(|n| n as u32)
                    .unwrap_or(1);
                Ok(Frequency::Custom { unit, value })
            }
            other => Err(anyhow::anyhow!("Invalid frequency type: {}", other)),
        }
    }

    /// JSON payload persisted alongside the type name
    pub fn payload(&self) -> Option<JsonValue> {
        match self {
            Frequency::Weekly { days } => Some(serde_json::json!({ "days": days })),
            Frequency::Custom { unit, value } => Some(serde_json::json!({
                "unit": unit,
                "value": value,
            })),
            _ => None,
        }
    }
}

/// A single reminder row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub user_id: i64,
    pub category_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub status: ReminderStatus,
    pub frequency: Frequency,
    /// Days before the due date to notify; only the largest value is scheduled
    pub advance_notice_days: Vec<u32>,
    pub notify_email: bool,
    pub notify_sms: bool,
    pub notify_whatsapp: bool,
    pub next_reminder_date: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Root of the recurrence series this row was generated from
    pub parent_id: Option<i64>,
    /// Optimistic concurrency counter, bumped by every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn is_completed(&self) -> bool {
        self.status == ReminderStatus::Completed
    }

    /// Largest configured advance offset, if any
    pub fn max_advance_days(&self) -> Option<u32> {
        self.advance_notice_days.iter().copied().max()
    }

    /// Same fields that decide when and whether this reminder fires
    pub fn same_schedule(&self, other: &Reminder) -> bool {
        self.due_date == other.due_date
            && self.frequency == other.frequency
            && self.status == other.status
            && self.next_reminder_date == other.next_reminder_date
            && self.advance_notice_days == other.advance_notice_days
    }

    /// Whether notifications are enabled for a channel
    pub fn wants(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.notify_email,
            Channel::Sms => self.notify_sms,
            Channel::Whatsapp => self.notify_whatsapp,
        }
    }
}

/// Notification transport channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Whatsapp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
        }
    }

    /// Recipient address for this channel, ignoring blank values
    pub fn recipient<'a>(&self, user: &'a User) -> Option<&'a str> {
        let address = match self {
            Channel::Email => user.email.as_deref(),
            Channel::Sms => user.phone.as_deref(),
            Channel::Whatsapp => user.whatsapp.as_deref(),
        };
        address.map(str::trim).filter(|a| !a.is_empty())
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "whatsapp" => Ok(Channel::Whatsapp),
            _ => Err(anyhow::anyhow!("Invalid channel: {}", s)),
        }
    }
}

/// Outcome state of one notification attempt row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Row written, transport call not yet resolved
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStatus::Pending => write!(f, "pending"),
            LogStatus::Success => write!(f, "success"),
            LogStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for LogStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(LogStatus::Pending),
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid notification status: {}", s)),
        }
    }
}

/// Audit row for a dispatch attempt on one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: i64,
    pub reminder_id: i64,
    pub user_id: i64,
    pub channel: Channel,
    pub recipient: String,
    pub status: LogStatus,
    pub error_message: Option<String>,
    /// Number of transport attempts made so far
    pub retry_count: u32,
    pub sent_at: Option<DateTime<Utc>>,
    /// When the retry pass should pick this row up again
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account record supplying channel addresses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub timezone: String,
    pub locale: String,
}

/// Per-user defaults consulted when a reminder omits notification preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSetting {
    pub user_id: i64,
    pub default_view: String,
    pub items_per_page: u32,
    pub date_format: String,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub weekend_notifications: bool,
    pub default_advance_notice: Vec<u32>,
    pub default_notify_email: bool,
    pub default_notify_sms: bool,
    pub default_notify_whatsapp: bool,
}

impl UserSetting {
    pub fn defaults_for(user_id: i64) -> Self {
        Self {
            user_id,
            default_view: "list".to_string(),
            items_per_page: 15,
            date_format: "gregorian".to_string(),
            quiet_hours_start: None,
            quiet_hours_end: None,
            weekend_notifications: true,
            default_advance_notice: DEFAULT_ADVANCE_NOTICE.to_vec(),
            default_notify_email: true,
            default_notify_sms: false,
            default_notify_whatsapp: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    /// `None` for system categories shared by every user
    pub user_id: Option<i64>,
    pub name: String,
    pub color: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_display_and_parse() {
        assert_eq!(ReminderStatus::Overdue.to_string(), "overdue");
        assert_eq!(
            "Completed".parse::<ReminderStatus>().unwrap(),
            ReminderStatus::Completed
        );
        assert!("done".parse::<ReminderStatus>().is_err());
        assert_eq!("FAILED".parse::<LogStatus>().unwrap(), LogStatus::Failed);
        assert_eq!("whatsapp".parse::<Channel>().unwrap(), Channel::Whatsapp);
        assert!("pigeon".parse::<Channel>().is_err());
    }

    #[test]
    fn test_weekly_payload_defaults_to_monday() {
        assert_eq!(
            Frequency::from_parts("weekly", None).unwrap(),
            Frequency::Weekly { days: vec![1] }
        );
        assert_eq!(
            Frequency::from_parts("weekly", Some(&json!({ "days": "fri" }))).unwrap(),
            Frequency::Weekly { days: vec![1] }
        );
        assert_eq!(
            Frequency::from_parts("weekly", Some(&json!({ "days": [5, 3, 9, 3] }))).unwrap(),
            Frequency::Weekly { days: vec![3, 5] }
        );
    }

    #[test]
    fn test_custom_payload_defaults() {
        assert_eq!(
            Frequency::from_parts("custom", None).unwrap(),
            Frequency::Custom {
                unit: IntervalUnit::Days,
                value: 1
            }
        );
        assert_eq!(
            Frequency::from_parts("custom", Some(&json!({ "unit": "weeks", "value": 0 })))
                .unwrap(),
            Frequency::Custom {
                unit: IntervalUnit::Weeks,
                value: 1
            }
        );
        assert_eq!(
            Frequency::from_parts("custom", Some(&json!({ "unit": "fortnights", "value": 2 })))
                .unwrap(),
            Frequency::Custom {
                unit: IntervalUnit::Unknown,
                value: 2
            }
        );
        assert!(Frequency::from_parts("hourly", None).is_err());
    }

    #[test]
    fn test_payload_survives_storage_shape() {
        let rule = Frequency::Custom {
            unit: IntervalUnit::Months,
            value: 3,
        };
        let payload = rule.payload().unwrap();
        assert_eq!(payload, json!({ "unit": "months", "value": 3 }));
        assert_eq!(
            Frequency::from_parts(rule.type_name(), Some(&payload)).unwrap(),
            rule
        );
        assert!(Frequency::Daily.payload().is_none());
    }

    #[test]
    fn test_channel_recipient_ignores_blank() {
        let user = User {
            id: 1,
            name: "Sam".to_string(),
            email: Some("sam@example.com".to_string()),
            phone: Some("   ".to_string()),
            whatsapp: None,
            ..Default::default()
        };
        assert_eq!(Channel::Email.recipient(&user), Some("sam@example.com"));
        assert_eq!(Channel::Sms.recipient(&user), None);
        assert_eq!(Channel::Whatsapp.recipient(&user), None);
    }
}

//! # Message Templates
//!
//! YAML-backed per-channel message templates with `{placeholder}` substitution.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.1.0: Priority labels and category fallback
//! - 1.0.0: Initial email/SMS/WhatsApp templates

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::core::models::{Category, Channel, Priority, Reminder, User};
use crate::core::time::DISPLAY_FORMAT;

/// Rendered message handed to a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    /// Only email uses a subject; other channels leave it empty
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelTemplate {
    #[serde(default)]
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriorityLabels {
    pub low: String,
    pub medium: String,
    pub high: String,
    pub critical: String,
}

impl PriorityLabels {
    fn label(&self, priority: Priority) -> &str {
        match priority {
            Priority::Low => &self.low,
            Priority::Medium => &self.medium,
            Priority::High => &self.high,
            Priority::Critical => &self.critical,
        }
    }
}

impl Default for PriorityLabels {
    fn default() -> Self {
        Self {
            low: "Low".to_string(),
            medium: "Medium".to_string(),
            high: "High".to_string(),
            critical: "Critical".to_string(),
        }
    }
}

/// Full template set, one entry per channel
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub email: ChannelTemplate,
    pub sms: ChannelTemplate,
    pub whatsapp: ChannelTemplate,
    pub priorities: PriorityLabels,
    pub no_description: String,
    pub no_category: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            email: ChannelTemplate {
                subject: "Reminder: {title}".to_string(),
                body: "Hello {name},\n\n\
                       This is a reminder for \"{title}\".\n\n\
                       {description}\n\n\
                       Due: {due_date}\n\
                       Priority: {priority}\n\
                       Category: {category}\n"
                    .to_string(),
            },
            sms: ChannelTemplate {
                subject: String::new(),
                body: "Reminder: {title} is due {due_date} ({priority})".to_string(),
            },
            whatsapp: ChannelTemplate {
                subject: String::new(),
                body: "Hi {name}, reminder: *{title}*\n{description}\nDue: {due_date}\nPriority: {priority}"
                    .to_string(),
            },
            priorities: PriorityLabels::default(),
            no_description: "No description".to_string(),
            no_category: "Uncategorized".to_string(),
        }
    }
}

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"))
}

impl MessageTemplates {
    /// Load templates from a YAML file; omitted sections keep the built-in text
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read templates from {path}"))?;
        let templates: MessageTemplates = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid template file {path}"))?;
        templates.validate()?;
        Ok(templates)
    }

    pub fn validate(&self) -> Result<()> {
        for channel in Channel::ALL {
            if self.for_channel(channel).body.trim().is_empty() {
                return Err(anyhow::anyhow!("Template for {} has an empty body", channel));
            }
        }
        Ok(())
    }

    pub fn for_channel(&self, channel: Channel) -> &ChannelTemplate {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
            Channel::Whatsapp => &self.whatsapp,
        }
    }

    /// Placeholder values for one reminder
    pub fn fields(
        &self,
        reminder: &Reminder,
        user: &User,
        category: Option<&Category>,
    ) -> HashMap<&'static str, String> {
        let description = reminder
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.no_description);

        HashMap::from([
            ("title", reminder.title.clone()),
            ("description", description.to_string()),
            ("due_date", reminder.due_date.format(DISPLAY_FORMAT).to_string()),
            ("priority", self.priorities.label(reminder.priority).to_string()),
            (
                "category",
                category
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| self.no_category.clone()),
            ),
            ("name", user.name.clone()),
        ])
    }

    pub fn render(
        &self,
        channel: Channel,
        reminder: &Reminder,
        user: &User,
        category: Option<&Category>,
    ) -> RenderedMessage {
        let fields = self.fields(reminder, user, category);
        let template = self.for_channel(channel);
        RenderedMessage {
            subject: substitute(&template.subject, &fields),
            body: substitute(&template.body, &fields),
        }
    }
}

/// Replace `{key}` with its value; unknown keys stay as written
fn substitute(template: &str, fields: &HashMap<&'static str, String>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| match fields.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Frequency, ReminderStatus};
    use chrono::{TimeZone, Utc};

    fn reminder(description: Option<&str>) -> Reminder {
        let due = Utc.with_ymd_and_hms(2025, 1, 10, 9, 30, 0).unwrap();
        Reminder {
            id: 1,
            user_id: 1,
            category_id: None,
            title: "Car insurance".to_string(),
            description: description.map(String::from),
            due_date: due,
            priority: Priority::Critical,
            status: ReminderStatus::Pending,
            frequency: Frequency::Yearly,
            advance_notice_days: vec![30],
            notify_email: true,
            notify_sms: true,
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

    fn user() -> User {
        User {
            id: 1,
            name: "Noor".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_email_render() {
        let templates = MessageTemplates::default();
        let category = Category {
            id: 3,
            user_id: None,
            name: "Vehicle".to_string(),
            color: None,
        };
        let message = templates.render(
            Channel::Email,
            &reminder(Some("Policy #123")),
            &user(),
            Some(&category),
        );

        assert_eq!(message.subject, "Reminder: Car insurance");
        assert!(message.body.starts_with("Hello Noor,"));
        assert!(message.body.contains("Policy #123"));
        assert!(message.body.contains("Due: 2025-01-10 09:30"));
        assert!(message.body.contains("Priority: Critical"));
        assert!(message.body.contains("Category: Vehicle"));
    }

    #[test]
    fn test_fallbacks() {
        let templates = MessageTemplates::default();
        let message = templates.render(Channel::Whatsapp, &reminder(Some("  ")), &user(), None);
        assert!(message.body.contains("No description"));

        let fields = templates.fields(&reminder(None), &user(), None);
        assert_eq!(fields["category"], "Uncategorized");
        assert_eq!(fields["description"], "No description");
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let fields = HashMap::from([("title", "Dentist".to_string())]);
        assert_eq!(
            substitute("{title} at {location}", &fields),
            "Dentist at {location}"
        );
    }

    #[test]
    fn test_yaml_overrides_merge_with_defaults() {
        let yaml = r#"
sms:
  body: "{title} due {due_date}"
priorities:
  low: "Faible"
  medium: "Moyenne"
  high: "Haute"
  critical: "Critique"
"#;
        let templates: MessageTemplates = serde_yaml::from_str(yaml).unwrap();
        templates.validate().unwrap();

        let message = templates.render(Channel::Sms, &reminder(None), &user(), None);
        assert_eq!(message.body, "Car insurance due 2025-01-10 09:30");
        assert_eq!(templates.email.subject, "Reminder: {title}");
        assert_eq!(templates.priorities.label(Priority::Critical), "Critique");
    }

    #[test]
    fn test_empty_body_rejected() {
        let mut templates = MessageTemplates::default();
        templates.whatsapp.body = "  ".to_string();
        assert!(templates.validate().is_err());
    }
}

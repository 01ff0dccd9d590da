// Core layer - domain types, configuration, timestamps
pub mod core;

// Features layer - recurrence, scheduling, notifications, sweep
pub mod features;

// Infrastructure
pub mod database;

// Re-export core config and models
pub use crate::core::{
    Category, Channel, Config, Frequency, IntervalUnit, LogStatus, NotificationLog, Priority,
    Reminder, ReminderStatus, User, UserSetting,
};

pub use database::{Database, LogFilter};

// Re-export feature items
pub use features::{
    // Recurrence
    next_due_date,
    // Reminders
    derive_status, first_fire_time, next_fire_time, ReminderDraft, ReminderService,
    // Notifications
    DispatchSummary, MessageTemplates, NotificationDispatcher, NotificationTransport,
    RenderedMessage, RetryPolicy, Transports,
    // Sweep
    SweepJob, SweepReport,
};

//! # Features
//!
//! - **recurrence**: next occurrence of a due date under a frequency rule
//! - **reminders**: fire-time scheduling and reminder mutations
//! - **notifications**: templated per-channel delivery with retries
//! - **sweep**: the periodic job tying the others together

pub mod notifications;
pub mod recurrence;
pub mod reminders;
pub mod sweep;

pub use notifications::{
    DispatchSummary, LogTransport, MessageTemplates, NotificationDispatcher,
    NotificationTransport, RenderedMessage, RetryPolicy, RetrySummary, Transports,
    WebhookTransport,
};
pub use recurrence::next_due_date;
pub use reminders::{
    derive_status, first_fire_time, next_fire_time, ReminderDraft, ReminderService,
};
pub use sweep::{JobLock, SweepJob, SweepReport};

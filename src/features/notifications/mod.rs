//! # Feature: Notifications
//!
//! Per-channel delivery of due reminders with templated messages, an audit
//! log row per attempt, and policy-driven retries.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Retry pass and manual resend
//! - 1.1.0: YAML message templates
//! - 1.0.0: Initial dispatcher with webhook and log transports

pub mod dispatcher;
pub mod retry;
pub mod template;
pub mod transport;

pub use dispatcher::{DispatchSummary, NotificationDispatcher, RetrySummary};
pub use retry::{AttemptOutcome, RetryPolicy};
pub use template::{MessageTemplates, RenderedMessage};
pub use transport::{LogTransport, NotificationTransport, Transports, WebhookTransport};

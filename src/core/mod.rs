//! # Core Module
//!
//! Core domain types, configuration, and timestamp helpers for the reminder engine.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Add time module with storage timestamp helpers
//! - 1.1.0: Add models module with reminder and notification records
//! - 1.0.0: Initial creation with config module

pub mod config;
pub mod models;
pub mod time;

// Re-export commonly used items
pub use config::Config;
pub use models::{
    Category, Channel, Frequency, IntervalUnit, LogStatus, NotificationLog, Priority, Reminder,
    ReminderStatus, User, UserSetting,
};
pub use time::{format_timestamp, parse_timestamp, TIMESTAMP_FORMAT};

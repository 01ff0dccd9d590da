//! # Feature: Reminders
//!
//! Fire-time scheduling and the mutation entry points that keep stored
//! reminders consistent with it.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Completion creates the next occurrence in one transaction
//! - 1.1.0: Snooze and duplicate
//! - 1.0.0: Initial scheduler

pub mod scheduler;
pub mod service;

pub use scheduler::{derive_status, first_fire_time, next_fire_time};
pub use service::{ReminderDraft, ReminderService};

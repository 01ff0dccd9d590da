//! # Feature: Sweep
//!
//! Periodic job that turns elapsed fire times into notifications and keeps
//! reminder statuses current.
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.3.0: Retry pass
//! - 1.2.0: Lock row prevents overlapping sweeps
//! - 1.0.0: Initial release

pub mod job;
pub mod lock;

pub use job::{SweepJob, SweepReport};
pub use lock::{JobLock, SWEEP_LOCK_NAME};

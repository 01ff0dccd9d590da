//! Retry policy and the single-attempt executor wrapped around every transport call
//!
//! An attempt never sleeps: a failure records when the next attempt becomes
//! eligible and the retry pass picks it up once that time has passed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::core::config::Config;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed, the first one included
    pub max_attempts: u32,
    /// Delay before attempt `n + 1`, indexed by `n - 1`; the last entry repeats
    pub backoff: Vec<Duration>,
    /// Upper bound on one transport call
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(300),
                Duration::from_secs(900),
                Duration::from_secs(3600),
            ],
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            backoff: config.retry_backoff.clone(),
            attempt_timeout: config.transport_timeout,
        }
    }

    /// Delay that follows the given number of failed attempts
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let index = attempts.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }

    /// When the next attempt may run, or `None` once the budget is spent
    pub fn next_retry_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempts >= self.max_attempts {
            return None;
        }
        let delay = chrono::Duration::from_std(self.delay_after(attempts)).ok()?;
        now.checked_add_signed(delay)
    }
}

/// Result of one executor call
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Attempts made so far, this one included
    pub attempts: u32,
    /// Error text when the attempt failed
    pub error: Option<String>,
    pub timed_out: bool,
    /// Set when the attempt failed and the policy allows another
    pub retry_at: Option<DateTime<Utc>>,
}

impl AttemptOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Run one bounded attempt of `operation` and work out the retry bookkeeping
pub async fn attempt<F>(
    policy: &RetryPolicy,
    prior_attempts: u32,
    now: DateTime<Utc>,
    operation: F,
) -> AttemptOutcome
where
    F: Future<Output = Result<()>>,
{
    let attempts = prior_attempts.saturating_add(1);

    let (error, timed_out) = match timeout(policy.attempt_timeout, operation).await {
        Ok(Ok(())) => (None, false),
        Ok(Err(e)) => (Some(format!("{e:#}")), false),
        Err(_) => (
            Some(format!(
                "Timed out after {}s",
                policy.attempt_timeout.as_secs_f32()
            )),
            true,
        ),
    };

    let retry_at = match error {
        Some(_) => policy.next_retry_at(attempts, now),
        None => None,
    };

    AttemptOutcome {
        attempts,
        error,
        timed_out,
        retry_at,
    }
}

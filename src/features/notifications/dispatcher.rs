//! # Notification Dispatcher
//!
//! Fans a due reminder out to its enabled channels. Every transport call is
//! preceded by a pending log row and followed by its outcome, so a crash
//! mid-send leaves evidence instead of a silent duplicate.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.2.0: Retry pass and manual resend
//! - 1.1.0: Pending log written before each transport call
//! - 1.0.0: Initial per-channel dispatch

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::core::models::{Category, Channel, LogStatus, NotificationLog, Reminder, User};
use crate::database::Database;
use crate::features::notifications::retry::{self, RetryPolicy};
use crate::features::notifications::template::{MessageTemplates, RenderedMessage};
use crate::features::notifications::transport::{NotificationTransport, Transports};

/// Per-reminder dispatch counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    /// Enabled channels without a recipient address or a transport
    pub skipped: usize,
}

/// Counts from one retry pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetrySummary {
    pub retried: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Database,
    transports: Transports,
    templates: Arc<MessageTemplates>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        db: Database,
        transports: Transports,
        templates: Arc<MessageTemplates>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            transports,
            templates,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send one notification per enabled channel.
    ///
    /// Transport failures are recorded on the log row and never returned as
    /// errors; only storage failures are.
    pub async fn dispatch(
        &self,
        reminder: &Reminder,
        user: &User,
        category: Option<&Category>,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        for channel in Channel::ALL {
            if !reminder.wants(channel) {
                continue;
            }

            let Some(recipient) = channel.recipient(user) else {
                warn!(
                    "Reminder {}: user {} has no {} address, skipping",
                    reminder.id, user.id, channel
                );
                summary.skipped += 1;
                continue;
            };

            let Some(transport) = self.transports.get(channel) else {
                warn!(
                    "Reminder {}: no transport for {}, skipping",
                    reminder.id, channel
                );
                summary.skipped += 1;
                continue;
            };

            let message = self.templates.render(channel, reminder, user, category);
            let log_id = self
                .db
                .create_notification_log(reminder.id, user.id, channel, recipient, now)
                .await?;

            if self
                .deliver(log_id, channel, transport.as_ref(), recipient, &message, 0, now)
                .await?
            {
                summary.sent += 1;
            } else {
                summary.failed += 1;
            }
        }

        Ok(summary)
    }

    /// One executor attempt plus the log update that records it
    #[allow(clippy::too_many_arguments)]
    async fn deliver(
        &self,
        log_id: i64,
        channel: Channel,
        transport: &dyn NotificationTransport,
        recipient: &str,
        message: &RenderedMessage,
        prior_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = retry::attempt(
            &self.policy,
            prior_attempts,
            now,
            transport.send(recipient, message),
        )
        .await;

        match &outcome.error {
            None => {
                self.db.mark_log_sent(log_id, outcome.attempts, now).await?;
                debug!(
                    "Sent {} notification {} via {} (attempt {})",
                    channel,
                    log_id,
                    transport.name(),
                    outcome.attempts
                );
                Ok(true)
            }
            Some(error) => {
                self.db
                    .mark_log_failed(log_id, error, outcome.attempts, outcome.retry_at, now)
                    .await?;
                match outcome.retry_at {
                    Some(at) => warn!(
                        "{} notification {} failed (attempt {}): {}. Retrying after {}",
                        channel, log_id, outcome.attempts, error, at
                    ),
                    None => warn!(
                        "{} notification {} failed after {} attempts: {}. Left for manual resend",
                        channel, log_id, outcome.attempts, error
                    ),
                }
                Ok(false)
            }
        }
    }

    /// Re-attempt every log whose retry time has come
    pub async fn retry_due(&self, now: DateTime<Utc>) -> Result<RetrySummary> {
        let logs = self
            .db
            .get_retryable_logs(now, self.policy.max_attempts)
            .await?;
        let mut summary = RetrySummary::default();

        for log in logs {
            match self.retry_log(&log, now).await {
                Ok(Some(sent)) => {
                    summary.retried += 1;
                    if sent {
                        summary.sent += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => error!("Retry of notification {} failed: {:#}", log.id, e),
            }
        }

        if summary.retried > 0 {
            info!(
                "Retry pass: {} retried, {} sent, {} failed",
                summary.retried, summary.sent, summary.failed
            );
        }
        Ok(summary)
    }

    /// `Ok(None)` when the log could not be retried right now
    async fn retry_log(&self, log: &NotificationLog, now: DateTime<Utc>) -> Result<Option<bool>> {
        let Some(transport) = self.transports.get(log.channel) else {
            warn!(
                "Notification {}: no transport for {}, retry postponed",
                log.id, log.channel
            );
            return Ok(None);
        };
        let Some(reminder) = self.db.get_reminder(log.reminder_id).await? else {
            return Ok(None);
        };
        let Some(user) = self.db.get_user(log.user_id).await? else {
            return Ok(None);
        };
        let category = match reminder.category_id {
            Some(id) => self.db.get_category(id).await?,
            None => None,
        };

        if !self.db.claim_log_for_retry(log.id, now).await? {
            return Ok(None);
        }

        let message = self
            .templates
            .render(log.channel, &reminder, &user, category.as_ref());
        let delivered = self
            .deliver(
                log.id,
                log.channel,
                transport.as_ref(),
                &log.recipient,
                &message,
                log.retry_count,
                now,
            )
            .await;

        match delivered {
            Ok(sent) => Ok(Some(sent)),
            Err(e) => {
                self.release_claim(log, &e, now).await;
                Err(e)
            }
        }
    }

    /// Put a claimed log back in the retry queue after its outcome could not be recorded
    async fn release_claim(
        &self,
        log: &NotificationLog,
        cause: &anyhow::Error,
        now: DateTime<Utc>,
    ) {
        let retry_at = log.next_retry_at.unwrap_or(now);
        if let Err(e) = self
            .db
            .mark_log_failed(
                log.id,
                &format!("{cause:#}"),
                log.retry_count,
                Some(retry_at),
                now,
            )
            .await
        {
            error!(
                "Notification {} stays claimed, restoring it failed: {:#}",
                log.id, e
            );
        }
    }

    /// Reset a failed log so the next retry pass sends it again with a fresh budget
    pub async fn resend(&self, log_id: i64, now: DateTime<Utc>) -> Result<()> {
        let log = self
            .db
            .get_notification_log(log_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Notification {} not found", log_id))?;

        if log.status != LogStatus::Failed {
            return Err(anyhow::anyhow!(
                "Notification {} is {}, only failed notifications can be resent",
                log_id,
                log.status
            ));
        }

        self.db.reset_log_for_resend(log_id, now).await?;
        info!("Notification {} queued for resend", log_id);
        Ok(())
    }
}

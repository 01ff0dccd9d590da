//! # Sweep Job
//!
//! Periodic driver: loads reminders whose fire time elapsed, dispatches them in
//! parallel, advances their schedule, then refreshes statuses and runs the
//! notification retry pass. One sweep at a time per database, enforced by a
//! lock row whose lease is renewed while the sweep runs.
//!
//! - **Version**: 1.4.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.4.0: Lease heartbeat; post-dispatch state survives unrelated edits
//! - 1.3.0: Retry pass folded into the sweep
//! - 1.2.0: Version-checked per-reminder updates, conflicts reported
//! - 1.1.0: Bounded parallel processing with a shared user cache
//! - 1.0.0: Initial hourly sweep

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::config::Config;
use crate::core::models::{Category, Frequency, Reminder, ReminderStatus, User};
use crate::database::{Database, ReminderStateUpdate, StateUpdateOutcome};
use crate::features::notifications::{DispatchSummary, NotificationDispatcher};
use crate::features::reminders::next_fire_time;
use crate::features::sweep::lock::{JobLock, SWEEP_LOCK_NAME};

/// Totals for one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Reminders dispatched, conflicts included
    pub processed: usize,
    /// Reminders whose processing errored; they keep their prior state
    pub failed: usize,
    /// Post-dispatch updates dropped because a concurrent edit changed the schedule
    pub conflicts: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    /// Reminders moved to completed, by dispatch or by the refresh pass
    pub completed: usize,
    pub marked_overdue: usize,
    pub retried: usize,
    /// Due reminders left untouched after the lease was lost
    pub abandoned: usize,
    /// Another sweep held the lock, nothing was done
    pub lock_busy: bool,
    /// The lease expired mid-sweep and another run took it over
    pub lock_lost: bool,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lock_busy {
            return write!(f, "skipped (lock busy)");
        }
        write!(
            f,
            "{} processed, {} failed, {} conflicts, {} sent, {} send failures, \
             {} completed, {} overdue, {} retried",
            self.processed,
            self.failed,
            self.conflicts,
            self.notifications_sent,
            self.notifications_failed,
            self.completed,
            self.marked_overdue,
            self.retried
        )?;
        if self.lock_lost {
            write!(f, ", lock lost ({} abandoned)", self.abandoned)?;
        }
        Ok(())
    }
}

enum ReminderOutcome {
    Applied {
        dispatch: DispatchSummary,
        completed: bool,
        overdue: bool,
    },
    Conflict {
        dispatch: DispatchSummary,
    },
}

/// Lookups shared by every task of one sweep
#[derive(Default)]
struct SweepCache {
    users: DashMap<i64, User>,
    categories: DashMap<i64, Option<Category>>,
}

#[derive(Clone)]
pub struct SweepJob {
    db: Database,
    dispatcher: NotificationDispatcher,
    lock: Arc<JobLock>,
    concurrency: usize,
}

impl SweepJob {
    pub fn new(
        db: Database,
        dispatcher: NotificationDispatcher,
        lock_ttl: Duration,
        concurrency: usize,
    ) -> Self {
        let lock = JobLock::new(db.clone(), SWEEP_LOCK_NAME, lock_ttl);
        Self {
            db,
            dispatcher,
            lock: Arc::new(lock),
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(db: Database, dispatcher: NotificationDispatcher, config: &Config) -> Self {
        Self::new(db, dispatcher, config.sweep_lock_ttl, config.sweep_concurrency)
    }

    /// Run sweeps forever on a fixed cadence; the first one starts immediately
    pub async fn run(&self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Sweep loop started (interval: {}s)", every.as_secs());

        loop {
            interval.tick().await;
            match self.run_sweep(Utc::now()).await {
                Ok(report) if report.lock_busy => {
                    debug!("Sweep skipped, another run holds the lock")
                }
                Ok(_) => {}
                Err(e) => error!("Sweep failed: {:#}", e),
            }
        }
    }

    /// One full sweep at `now`
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        if !self.lock.acquire(now).await? {
            info!("Sweep at {} skipped: lock held by another run", now);
            return Ok(SweepReport {
                lock_busy: true,
                ..Default::default()
            });
        }

        let lease_lost = Arc::new(AtomicBool::new(false));
        let heartbeat = self.spawn_heartbeat(now, lease_lost.clone());
        let result = self.sweep_locked(now, &lease_lost).await;
        heartbeat.abort();

        if let Err(e) = self.lock.release().await {
            warn!("Failed to release sweep lock: {:#}", e);
        }
        result
    }

    /// Renew the lease every third of its TTL, measured from `now` on the sweep's clock
    fn spawn_heartbeat(&self, now: DateTime<Utc>, lease_lost: Arc<AtomicBool>) -> JoinHandle<()> {
        let lock = self.lock.clone();
        let period = (lock.ttl() / 3).max(Duration::from_millis(100));

        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;

            loop {
                ticks.tick().await;
                let elapsed = chrono::Duration::from_std(started.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                match lock.renew(now + elapsed).await {
                    Ok(true) => {}
                    Ok(false) => {
                        lease_lost.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => warn!("Renewing sweep lock failed: {:#}", e),
                }
            }
        })
    }

    async fn sweep_locked(
        &self,
        now: DateTime<Utc>,
        lease_lost: &Arc<AtomicBool>,
    ) -> Result<SweepReport> {
        let due = self.db.get_due_reminders(now).await?;
        info!("Sweep at {}: {} reminders due", now, due.len());

        let mut report = SweepReport::default();
        let cache = Arc::new(SweepCache::default());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for reminder in due {
            let job = self.clone();
            let cache = cache.clone();
            let semaphore = semaphore.clone();
            let lease_lost = lease_lost.clone();
            tasks.spawn(async move {
                let id = reminder.id;
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (id, Err(anyhow::Error::from(e))),
                };
                if lease_lost.load(Ordering::SeqCst) {
                    return (id, Ok(None));
                }
                (id, job.process(reminder, &cache, now).await.map(Some))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(outcome)))) => {
                    report.processed += 1;
                    let dispatch = match outcome {
                        ReminderOutcome::Applied {
                            dispatch,
                            completed,
                            overdue,
                        } => {
                            report.completed += usize::from(completed);
                            report.marked_overdue += usize::from(overdue);
                            dispatch
                        }
                        ReminderOutcome::Conflict { dispatch } => {
                            report.conflicts += 1;
                            dispatch
                        }
                    };
                    report.notifications_sent += dispatch.sent;
                    report.notifications_failed += dispatch.failed;
                }
                Ok((_, Ok(None))) => report.abandoned += 1,
                Ok((id, Err(e))) => {
                    error!("Reminder {} failed during sweep: {:#}", id, e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Sweep task aborted: {}", e);
                    report.failed += 1;
                }
            }
        }

        if lease_lost.load(Ordering::SeqCst) {
            report.lock_lost = true;
            warn!(
                "Sweep lock lost mid-run, {} reminders left for the next sweep",
                report.abandoned
            );
            info!("Sweep finished: {}", report);
            return Ok(report);
        }

        match self.db.complete_notified_once_reminders(now).await {
            Ok(count) => report.completed += count,
            Err(e) => error!("Completing notified one-shot reminders failed: {:#}", e),
        }
        match self.db.mark_overdue_reminders(now).await {
            Ok(count) => report.marked_overdue += count,
            Err(e) => error!("Marking overdue reminders failed: {:#}", e),
        }
        match self.dispatcher.retry_due(now).await {
            Ok(retry) => report.retried = retry.retried,
            Err(e) => error!("Retry pass failed: {:#}", e),
        }

        info!("Sweep finished: {}", report);
        Ok(report)
    }

    async fn process(
        &self,
        reminder: Reminder,
        cache: &SweepCache,
        now: DateTime<Utc>,
    ) -> Result<ReminderOutcome> {
        let user = self
            .user(cache, reminder.user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Owner {} not found", reminder.user_id))?;
        let category = match reminder.category_id {
            Some(id) => self.category(cache, id).await?,
            None => None,
        };

        let dispatch = self
            .dispatcher
            .dispatch(&reminder, &user, category.as_ref(), now)
            .await?;

        let due_elapsed = reminder.due_date <= now;
        let (status, completed_at) = match reminder.status {
            _ if due_elapsed && reminder.frequency == Frequency::Once => {
                (ReminderStatus::Completed, Some(now))
            }
            ReminderStatus::Pending if due_elapsed => (ReminderStatus::Overdue, None),
            current => (current, None),
        };

        let update = ReminderStateUpdate {
            status,
            next_reminder_date: next_fire_time(&reminder, now),
            last_sent_at: now,
            completed_at,
        };

        let outcome = self.db.apply_state_update(&reminder, &update).await?;
        if outcome == StateUpdateOutcome::Superseded {
            warn!(
                "Reminder {} was rescheduled during the sweep, keeping the concurrent edit",
                reminder.id
            );
            return Ok(ReminderOutcome::Conflict { dispatch });
        }

        debug!(
            "Reminder {}: {} sent, {} failed, next fire {:?}",
            reminder.id, dispatch.sent, dispatch.failed, update.next_reminder_date
        );
        Ok(ReminderOutcome::Applied {
            dispatch,
            completed: status == ReminderStatus::Completed,
            overdue: status == ReminderStatus::Overdue && reminder.status != status,
        })
    }

    async fn user(&self, cache: &SweepCache, user_id: i64) -> Result<Option<User>> {
        let cached = cache.users.get(&user_id).map(|entry| entry.clone());
        if cached.is_some() {
            return Ok(cached);
        }
        let user = self.db.get_user(user_id).await?;
        if let Some(found) = &user {
            cache.users.insert(user_id, found.clone());
        }
        Ok(user)
    }

    async fn category(&self, cache: &SweepCache, category_id: i64) -> Result<Option<Category>> {
        let cached = cache.categories.get(&category_id).map(|entry| entry.clone());
        if let Some(category) = cached {
            return Ok(category);
        }
        let category = self.db.get_category(category_id).await?;
        cache.categories.insert(category_id, category.clone());
        Ok(category)
    }
}

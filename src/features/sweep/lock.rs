//! Named, time-bounded job lock backed by the `job_locks` table
//!
//! The holder renews its lease while it works. A holder that crashes stops
//! renewing; once `expires_at` passes, the next run takes the lock over.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::time::Duration;
use uuid::Uuid;

use crate::database::Database;

/// Lock row shared by every sweep process on the same database
pub const SWEEP_LOCK_NAME: &str = "reminder-sweep";

pub struct JobLock {
    db: Database,
    name: String,
    owner: String,
    ttl: Duration,
}

impl JobLock {
    pub fn new(db: Database, name: &str, ttl: Duration) -> Self {
        Self {
            db,
            name: name.to_string(),
            owner: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lease_end(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl)?;
        now.checked_add_signed(ttl)
            .ok_or_else(|| anyhow::anyhow!("Lock TTL overflows the calendar"))
    }

    /// `Ok(false)` while another owner holds an unexpired lease
    pub async fn acquire(&self, now: DateTime<Utc>) -> Result<bool> {
        let expires_at = self.lease_end(now)?;
        let acquired = self
            .db
            .try_acquire_lock(&self.name, &self.owner, now, expires_at)
            .await?;
        if acquired {
            debug!("Lock '{}' taken by {} until {}", self.name, self.owner, expires_at);
        }
        Ok(acquired)
    }

    /// Extend the lease to `now + ttl`.
    ///
    /// `Ok(false)` means the lease was lost: it expired and another owner took it.
    pub async fn renew(&self, now: DateTime<Utc>) -> Result<bool> {
        let expires_at = self.lease_end(now)?;
        let renewed = self
            .db
            .renew_lock(&self.name, &self.owner, expires_at)
            .await?;
        if renewed {
            debug!("Lock '{}' renewed by {} until {}", self.name, self.owner, expires_at);
        } else {
            warn!("Lock '{}' is no longer held by {}", self.name, self.owner);
        }
        Ok(renewed)
    }

    pub async fn release(&self) -> Result<()> {
        if !self.db.release_lock(&self.name, &self.owner).await? {
            warn!(
                "Lock '{}' was no longer held by {} at release",
                self.name, self.owner
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::ts;

    #[tokio::test]
    async fn test_second_owner_waits_for_release_or_expiry() {
        let db = Database::in_memory().await.unwrap();
        let ttl = Duration::from_secs(900);
        let first = JobLock::new(db.clone(), SWEEP_LOCK_NAME, ttl);
        let second = JobLock::new(db.clone(), SWEEP_LOCK_NAME, ttl);
        assert_ne!(first.owner(), second.owner());

        let now = ts(2025, 1, 10, 9);
        assert!(first.acquire(now).await.unwrap());
        assert!(!second.acquire(now).await.unwrap());
        // Re-entry by the same owner is also refused until expiry
        assert!(!first.acquire(now).await.unwrap());

        let expired = now + chrono::Duration::seconds(900);
        assert!(second.acquire(expired).await.unwrap());

        second.release().await.unwrap();
        assert!(first.acquire(expired).await.unwrap());
        first.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_extends_only_a_held_lease() {
        let db = Database::in_memory().await.unwrap();
        let ttl = Duration::from_secs(900);
        let holder = JobLock::new(db.clone(), SWEEP_LOCK_NAME, ttl);
        let rival = JobLock::new(db.clone(), SWEEP_LOCK_NAME, ttl);

        let start = ts(2025, 1, 10, 9);
        assert!(holder.acquire(start).await.unwrap());

        // Renewed ten minutes in, the lease now runs to 09:25
        let renewed_at = start + chrono::Duration::minutes(10);
        assert!(holder.renew(renewed_at).await.unwrap());
        let original_expiry = start + chrono::Duration::seconds(900);
        assert!(!rival.acquire(original_expiry).await.unwrap());

        // The rival cannot renew a lease it never held
        assert!(!rival.renew(renewed_at).await.unwrap());

        // Once the lease lapses and the rival takes over, the old holder has lost it
        let lapsed = renewed_at + chrono::Duration::seconds(900);
        assert!(rival.acquire(lapsed).await.unwrap());
        assert!(!holder.renew(lapsed).await.unwrap());
        rival.release().await.unwrap();
    }
}

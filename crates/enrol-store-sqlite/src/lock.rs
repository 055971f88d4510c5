//! Lease-backed capacity locks shared through the database.
//!
//! Each held key is a row in `lock_leases` stamped with its owner and an
//! expiry. A lease whose holder died is reclaimed once it expires, so a
//! crashed process can block a key for at most one TTL.

use std::time::Duration;

use chrono::Utc;
use enrol_core::lock::{LocalLock, LockService, LockSet};
use rusqlite::{TransactionBehavior, params};

use crate::Error;

type CoreResult<T> = enrol_core::Result<T>;

/// Timing knobs for [`LeaseLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
  /// How long a lease stays valid without being released.
  pub ttl:            Duration,
  /// How long `acquire` keeps retrying before giving up.
  pub wait_timeout:   Duration,
  pub retry_interval: Duration,
}

impl Default for LeaseSettings {
  fn default() -> Self {
    Self {
      ttl:            Duration::from_secs(30),
      wait_timeout:   Duration::from_secs(5),
      retry_interval: Duration::from_millis(50),
    }
  }
}

/// [`LockService`] over the `lock_leases` table.
#[derive(Clone)]
pub struct LeaseLock {
  conn:     tokio_rusqlite::Connection,
  settings: LeaseSettings,
}

impl LeaseLock {
  pub fn new(conn: tokio_rusqlite::Connection, settings: LeaseSettings) -> Self {
    Self { conn, settings }
  }

  pub fn settings(&self) -> LeaseSettings { self.settings }

  /// One attempt at `key`. Expired leases are cleared first; returns whether
  /// `owner` now holds the key.
  async fn try_claim(&self, key: &str, owner: &str) -> Result<bool, Error> {
    let key = key.to_owned();
    let owner = owner.to_owned();
    let ttl_ms = i64::try_from(self.settings.ttl.as_millis()).unwrap_or(i64::MAX);

    let claimed = self
      .conn
      .call(move |conn| {
        let now = Utc::now().timestamp_millis();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
          "DELETE FROM lock_leases WHERE lock_key = ?1 AND expires_at <= ?2",
          params![key, now],
        )?;
        let inserted = tx.execute(
          "INSERT INTO lock_leases (lock_key, owner, expires_at) VALUES (?1, ?2, ?3)
           ON CONFLICT (lock_key) DO NOTHING",
          params![key, owner, now.saturating_add(ttl_ms)],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
      })
      .await?;
    Ok(claimed)
  }

  async fn release_key(&self, key: &str, owner: &str) -> Result<(), Error> {
    let key = key.to_owned();
    let owner = owner.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM lock_leases WHERE lock_key = ?1 AND owner = ?2",
          params![key, owner],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn release_held(&self, held: &[String], owner: &str) {
    for key in held.iter().rev() {
      if let Err(e) = self.release_key(key, owner).await {
        tracing::warn!(lock_key = %key, error = %e, "failed to release lease");
      }
    }
  }
}

impl LockService for LeaseLock {
  async fn acquire(&self, keys: Vec<String>) -> CoreResult<LockSet> {
    let set = LockSet::new(keys);
    let deadline = tokio::time::Instant::now() + self.settings.wait_timeout;
    let mut held: Vec<String> = Vec::with_capacity(set.keys().len());

    for key in set.keys() {
      loop {
        match self.try_claim(key, &set.owner).await {
          Ok(true) => {
            held.push(key.clone());
            break;
          }
          Ok(false) => {}
          // Writer contention on the lease table counts as a busy key.
          Err(Error::Core(enrol_core::Error::LockTimeout(_))) => {}
          Err(e) => {
            self.release_held(&held, &set.owner).await;
            return Err(e.into());
          }
        }

        if tokio::time::Instant::now() >= deadline {
          self.release_held(&held, &set.owner).await;
          tracing::warn!(lock_key = %key, "timed out waiting for capacity lease");
          return Err(enrol_core::Error::LockTimeout(format!(
            "timed out after {:?} waiting for {key}",
            self.settings.wait_timeout
          )));
        }
        tokio::time::sleep(self.settings.retry_interval).await;
      }
    }

    tracing::debug!(owner = %set.owner, keys = ?set.keys(), "capacity leases acquired");
    Ok(set)
  }

  async fn release(&self, locks: LockSet) -> CoreResult<()> {
    let mut first_failure = None;
    for key in locks.release_order() {
      if let Err(e) = self.release_key(key, &locks.owner).await {
        tracing::warn!(lock_key = %key, error = %e, "failed to release lease");
        first_failure.get_or_insert(e);
      }
    }
    match first_failure {
      Some(e) => Err(e.into()),
      None => Ok(()),
    }
  }
}

// ─── Backend selection ───────────────────────────────────────────────────────

/// The lock backends a store can be configured with.
#[derive(Clone)]
pub enum LockBackend {
  /// In-process only; the SQLite writer lock is the sole serialisation.
  Local(LocalLock),
  /// Database leases, shared by every process on the same file.
  Lease(LeaseLock),
}

impl Default for LockBackend {
  fn default() -> Self { Self::Local(LocalLock) }
}

impl LockService for LockBackend {
  async fn acquire(&self, keys: Vec<String>) -> CoreResult<LockSet> {
    match self {
      Self::Local(lock) => lock.acquire(keys).await,
      Self::Lease(lock) => lock.acquire(keys).await,
    }
  }

  async fn release(&self, locks: LockSet) -> CoreResult<()> {
    match self {
      Self::Local(lock) => lock.release(locks).await,
      Self::Lease(lock) => lock.release(locks).await,
    }
  }
}

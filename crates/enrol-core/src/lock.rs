//! Named mutual-exclusion locks for capacity resources.
//!
//! Backends implement [`LockService`]. Keys are always acquired in sorted
//! order and released in reverse, which gives every caller the same total
//! order and rules out circular waits.

use std::future::Future;

use uuid::Uuid;

use crate::Result;

/// A set of held locks. Returned by [`LockService::acquire`] and handed back
/// to [`LockService::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSet {
  /// Token identifying the holder; lease backends store it with each key.
  pub owner: String,
  keys:      Vec<String>,
}

impl LockSet {
  /// Build a set with `keys` sorted and deduplicated.
  pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort();
    keys.dedup();
    Self { owner: Uuid::new_v4().to_string(), keys }
  }

  /// Keys in acquisition order.
  pub fn keys(&self) -> &[String] { &self.keys }

  /// Keys in release order.
  pub fn release_order(&self) -> impl Iterator<Item = &String> {
    self.keys.iter().rev()
  }

  pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}

/// Acquires and releases named, time-bounded locks.
pub trait LockService: Send + Sync {
  /// Block until every key is held or the backend's wait bound elapses, in
  /// which case [`crate::Error::LockTimeout`] is returned and nothing stays
  /// held.
  fn acquire(&self, keys: Vec<String>) -> impl Future<Output = Result<LockSet>> + Send;

  /// Release every key of `locks`, in reverse acquisition order.
  fn release(&self, locks: LockSet) -> impl Future<Output = Result<()>> + Send;
}

/// Always-succeeds lock for single-process deployments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLock;

impl LockService for LocalLock {
  async fn acquire(&self, keys: Vec<String>) -> Result<LockSet> { Ok(LockSet::new(keys)) }

  async fn release(&self, _locks: LockSet) -> Result<()> { Ok(()) }
}

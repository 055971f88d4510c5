//! SQLite backend for the enrollment novelty store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every mutating operation is one
//! `IMMEDIATE` transaction driven by the synchronous engine in `enrol-core`.

mod encode;
mod ledger;
mod schema;
mod store;

pub mod error;
pub mod lock;

pub use error::{Error, Result};
pub use lock::{LeaseLock, LeaseSettings, LockBackend};
pub use store::{DEFAULT_BUSY_TIMEOUT, SqliteStore};

#[cfg(test)]
mod tests;

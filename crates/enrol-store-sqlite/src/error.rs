//! Error type for `enrol-store-sqlite`.

use enrol_core::NoveltyError;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] enrol_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value outside its enumerated domain.
  #[error("decode error: {0}")]
  Decode(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// SQLite reports contention as BUSY/LOCKED once `busy_timeout` elapses.
pub(crate) fn is_contention(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _)
      if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
  )
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    if is_contention(&e) {
      Self::Core(enrol_core::Error::LockTimeout(e.to_string()))
    } else {
      Self::Sqlite(e)
    }
  }
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    match e {
      tokio_rusqlite::Error::Rusqlite(inner) => inner.into(),
      other => Self::Database(other),
    }
  }
}

/// Fold a store error into the core taxonomy, for code that must hand back
/// `enrol_core::Result` (ledgers, lock backends).
impl From<Error> for enrol_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(core) => core,
      other => Self::Backend(Box::new(other)),
    }
  }
}

impl NoveltyError for Error {
  fn as_novelty(&self) -> Option<&enrol_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }
}

//! Error types for `enrol-core`.
//!
//! The first six variants form the workflow taxonomy surfaced to callers as
//! typed failures. None of them leave partial state behind: every engine
//! operation runs inside one transaction and fails before it commits.

use thiserror::Error;
use uuid::Uuid;

use crate::case::CaseStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid transition from {from} to {to}")]
  InvalidTransition { from: CaseStatus, to: CaseStatus },

  #[error("invalid state: {0}")]
  InvalidState(String),

  #[error("missing required documents: {}", .0.join(", "))]
  MissingDocuments(Vec<String>),

  #[error("group {group_id} is full ({occupied}/{capacity})")]
  CapacityExceeded {
    group_id: Uuid,
    capacity: u32,
    occupied: u32,
  },

  #[error("timed out waiting for lock: {0}")]
  LockTimeout(String),

  #[error("invalid destination: {0}")]
  InvalidDestination(String),

  #[error("a comment is required to move a case to {0}")]
  CommentRequired(CaseStatus),

  #[error("invalid payload: {0}")]
  InvalidPayload(String),

  #[error("unknown novelty type: {0:?}")]
  UnknownNoveltyType(String),

  #[error("case not found: {0}")]
  CaseNotFound(Uuid),

  #[error("student not found: {0}")]
  StudentNotFound(Uuid),

  #[error("group not found: {0}")]
  GroupNotFound(Uuid),

  #[error("grade not found: {0}")]
  GradeNotFound(Uuid),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Short machine-readable name for the variant, used by the HTTP layer.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::InvalidTransition { .. } => "invalid_transition",
      Self::InvalidState(_) => "invalid_state",
      Self::MissingDocuments(_) => "missing_documents",
      Self::CapacityExceeded { .. } => "capacity_exceeded",
      Self::LockTimeout(_) => "lock_timeout",
      Self::InvalidDestination(_) => "invalid_destination",
      Self::CommentRequired(_) => "comment_required",
      Self::InvalidPayload(_) => "invalid_payload",
      Self::UnknownNoveltyType(_) => "unknown_novelty_type",
      Self::CaseNotFound(_)
      | Self::StudentNotFound(_)
      | Self::GroupNotFound(_)
      | Self::GradeNotFound(_) => "not_found",
      Self::Serialization(_) => "serialization",
      Self::Backend(_) => "backend",
    }
  }

  /// Transient failures that the caller may retry with the same
  /// idempotency key.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::LockTimeout(_)) }
}

/// Implemented by backend error types that may carry a core [`Error`], so
/// outer layers can branch on the workflow taxonomy without knowing the
/// backend.
pub trait NoveltyError {
  fn as_novelty(&self) -> Option<&Error>;
}

impl NoveltyError for Error {
  fn as_novelty(&self) -> Option<&Error> { Some(self) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

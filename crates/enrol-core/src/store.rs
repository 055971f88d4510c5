//! The `NoveltyStore` trait and its operation results.
//!
//! Implemented by storage backends (e.g. `enrol-store-sqlite`). The HTTP
//! layer depends on this abstraction, not on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  case::{Actor, CaseStatus, CaseTransition, NewCase, NoveltyCase},
  error::NoveltyError,
  execution::{NoveltyExecution, NoveltyReversion},
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
  pub case:              NoveltyCase,
  /// Non-empty when an approval was redirected to `pending_docs`.
  pub missing_documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
  pub case:      NoveltyCase,
  pub execution: NoveltyExecution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversionOutcome {
  pub case:      NoveltyCase,
  pub reversion: NoveltyReversion,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a novelty-case backend.
///
/// Every mutating method is one atomic unit of work: it either commits all
/// of its writes or none. Notifications are sent after commit and never
/// turn a successful call into a failure.
pub trait NoveltyStore: Send + Sync {
  type Error: std::error::Error + NoveltyError + Send + Sync + 'static;

  // ── Cases ─────────────────────────────────────────────────────────────

  /// Create a case in `draft`.
  fn create_case(
    &self,
    input: NewCase,
  ) -> impl Future<Output = Result<NoveltyCase, Self::Error>> + Send + '_;

  /// Retrieve a case by id. Returns `None` if not found.
  fn get_case(
    &self,
    case_id: Uuid,
  ) -> impl Future<Output = Result<Option<NoveltyCase>, Self::Error>> + Send + '_;

  /// Delete a draft case that was never filed. Cases with a radicado are
  /// never deleted.
  fn delete_draft_case(
    &self,
    case_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The case's transition log, oldest first.
  fn list_transitions(
    &self,
    case_id: Uuid,
  ) -> impl Future<Output = Result<Vec<CaseTransition>, Self::Error>> + Send + '_;

  // ── Workflow ──────────────────────────────────────────────────────────

  /// Assign a radicado and move a draft case to `filed`.
  fn file_case(
    &self,
    case_id: Uuid,
    actor: Actor,
    comment: Option<String>,
  ) -> impl Future<Output = Result<NoveltyCase, Self::Error>> + Send + '_;

  /// Generic review transition; approval may be redirected to
  /// `pending_docs`.
  fn transition_case(
    &self,
    case_id: Uuid,
    to: CaseStatus,
    actor: Actor,
    comment: Option<String>,
  ) -> impl Future<Output = Result<TransitionOutcome, Self::Error>> + Send + '_;

  /// Execute an approved case, at most once per case and per key.
  fn execute_case(
    &self,
    case_id: Uuid,
    actor: Actor,
    comment: Option<String>,
    idempotency_key: Option<String>,
  ) -> impl Future<Output = Result<ExecutionOutcome, Self::Error>> + Send + '_;

  /// Compensate an executed case from its before-snapshot.
  fn revert_case(
    &self,
    case_id: Uuid,
    actor: Actor,
    comment: String,
  ) -> impl Future<Output = Result<ReversionOutcome, Self::Error>> + Send + '_;

  fn get_execution(
    &self,
    case_id: Uuid,
  ) -> impl Future<Output = Result<Option<NoveltyExecution>, Self::Error>> + Send + '_;

  fn get_reversion(
    &self,
    case_id: Uuid,
  ) -> impl Future<Output = Result<Option<NoveltyReversion>, Self::Error>> + Send + '_;

  // ── Documents ─────────────────────────────────────────────────────────

  /// Record that a document of `document_type` is attached to the case.
  /// Attaching the same type twice is a no-op.
  fn attach_document(
    &self,
    case_id: Uuid,
    document_type: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Required document types not yet attached.
  fn missing_documents(
    &self,
    case_id: Uuid,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;
}

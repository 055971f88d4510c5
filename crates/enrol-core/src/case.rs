//! Novelty cases, their status graph, and the append-only transition log.
//!
//! A case is a request to change a student's enrollment state. Its status
//! only moves along the edges returned by [`CaseStatus::allowed_targets`];
//! every move is recorded as a [`CaseTransition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::radicado::Radicado;

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CaseStatus {
  Draft,
  Filed,
  InReview,
  PendingDocs,
  Approved,
  Rejected,
  Executed,
  Reverted,
  Closed,
}

impl CaseStatus {
  /// Statuses reachable from `self` in a single transition.
  pub fn allowed_targets(self) -> &'static [CaseStatus] {
    use CaseStatus::*;
    match self {
      Draft => &[Filed],
      Filed => &[InReview, PendingDocs, Rejected],
      InReview => &[PendingDocs, Approved, Rejected],
      PendingDocs => &[InReview, Rejected],
      Approved => &[Executed, Closed],
      Rejected => &[Closed],
      Executed => &[Closed, Reverted],
      Reverted => &[Closed],
      Closed => &[],
    }
  }

  pub fn can_transition_to(self, to: CaseStatus) -> bool {
    self.allowed_targets().contains(&to)
  }

  /// Entering these statuses requires a non-empty justification.
  pub fn requires_comment(self) -> bool {
    matches!(self, Self::Rejected | Self::Closed | Self::Reverted)
  }

  pub fn is_terminal(self) -> bool { self.allowed_targets().is_empty() }

  /// Roles notified when a case enters this status.
  pub fn interested_roles(self) -> &'static [&'static str] {
    match self {
      Self::Draft => &[],
      Self::Filed | Self::PendingDocs => &["coordinator"],
      Self::InReview => &["coordinator", "registrar"],
      Self::Approved | Self::Rejected => &["registrar", "guardian"],
      Self::Executed | Self::Reverted => &["registrar", "guardian", "admin"],
      Self::Closed => &["registrar"],
    }
  }
}

// ─── Novelty type ────────────────────────────────────────────────────────────

/// The closed set of enrollment changes the engine knows how to execute.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoveltyType {
  Withdrawal,
  ReAdmission,
  InternalTransfer,
  Graduation,
}

impl NoveltyType {
  /// Parse a type code, mapping unknown codes to the workflow error.
  pub fn from_code(code: &str) -> crate::Result<Self> {
    code
      .parse()
      .map_err(|_| crate::Error::UnknownNoveltyType(code.to_owned()))
  }

  /// Graduation is exempt from the required-document gate by policy.
  pub fn requires_documents(self) -> bool { !matches!(self, Self::Graduation) }

  /// Types that may increase a group's occupancy and therefore need
  /// capacity locks.
  pub fn claims_seat(self) -> bool {
    matches!(self, Self::ReAdmission | Self::InternalTransfer)
  }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Who is performing an operation, as asserted by the caller's auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  pub actor_id: String,
  pub role:     String,
  /// Client address the request came from, when known.
  #[serde(default)]
  pub origin:   Option<String>,
}

impl Actor {
  pub fn new(actor_id: impl Into<String>, role: impl Into<String>) -> Self {
    Self { actor_id: actor_id.into(), role: role.into(), origin: None }
  }

  pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
    self.origin = Some(origin.into());
    self
  }
}

// ─── Case ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyCase {
  pub case_id:         Uuid,
  pub student_id:      Uuid,
  pub institution_id:  Uuid,
  pub novelty_type:    NoveltyType,
  pub reason_id:       Option<Uuid>,
  pub status:          CaseStatus,
  /// Assigned once, when the case is filed.
  pub radicado:        Option<Radicado>,
  pub created_at:      DateTime<Utc>,
  pub requested_at:    DateTime<Utc>,
  pub filed_at:        Option<DateTime<Utc>>,
  pub executed_at:     Option<DateTime<Utc>>,
  pub closed_at:       Option<DateTime<Utc>>,
  /// Type-specific parameters; opaque to the state machine.
  pub payload:         serde_json::Value,
  pub idempotency_key: Option<String>,
}

/// Input to [`crate::store::NoveltyStore::create_case`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewCase {
  pub student_id:      Uuid,
  pub institution_id:  Uuid,
  /// Type code, e.g. `"internal_transfer"`.
  pub novelty_type:    String,
  #[serde(default)]
  pub reason_id:       Option<Uuid>,
  #[serde(default)]
  pub payload:         serde_json::Value,
  #[serde(default)]
  pub idempotency_key: Option<String>,
  #[serde(default)]
  pub requested_at:    Option<DateTime<Utc>>,
  pub actor:           Actor,
}

// ─── Transition log ──────────────────────────────────────────────────────────

/// One immutable row of a case's history. The creation row has no
/// `from_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseTransition {
  pub transition_id: Uuid,
  pub case_id:       Uuid,
  pub from_status:   Option<CaseStatus>,
  pub to_status:     CaseStatus,
  pub actor_id:      String,
  pub actor_role:    String,
  pub comment:       Option<String>,
  pub origin:        Option<String>,
  pub recorded_at:   DateTime<Utc>,
}

//! Transactional accessors the engine runs against.
//!
//! A ledger is a single open unit of work: every write made through it
//! commits or rolls back together. The engine never opens or commits
//! transactions itself; backends hand it a ledger already holding the
//! writer lock and commit only if the engine returns `Ok`.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{
  Result,
  capacity::{BucketKey, CapacityBucket, GroupCapacityOverride},
  case::{CaseTransition, NoveltyCase, NoveltyType},
  documents::DocumentRule,
  execution::{NoveltyExecution, NoveltyReversion},
  school::{Enrollment, Grade, Group, Student},
};

/// Read/write access to the student/enrollment aggregate and the capacity
/// configuration. This is all a type handler may touch.
pub trait EnrollmentLedger {
  /// Fails with [`crate::Error::StudentNotFound`] if absent.
  fn student(&self, student_id: Uuid) -> Result<Student>;

  fn set_user_active(&mut self, student_id: Uuid, active: bool) -> Result<()>;

  /// All enrollments of a student, oldest academic year first.
  fn enrollments(&self, student_id: Uuid) -> Result<Vec<Enrollment>>;

  fn insert_enrollment(&mut self, enrollment: &Enrollment) -> Result<()>;

  /// Overwrite every mutable field of an existing enrollment.
  fn update_enrollment(&mut self, enrollment: &Enrollment) -> Result<()>;

  /// Fails with [`crate::Error::GradeNotFound`] if absent.
  fn grade(&self, grade_id: Uuid) -> Result<Grade>;

  /// Fails with [`crate::Error::GroupNotFound`] if absent.
  fn group(&self, group_id: Uuid) -> Result<Group>;

  fn capacity_bucket(&self, key: &BucketKey) -> Result<Option<CapacityBucket>>;

  fn group_override(&self, group_id: Uuid) -> Result<Option<GroupCapacityOverride>>;

  /// Active enrollments assigned to `group_id`, not counting `exclude`.
  fn count_active_occupants(
    &self,
    group_id: Uuid,
    exclude: Option<Uuid>,
  ) -> Result<u32>;
}

/// Case-side records on top of the enrollment aggregate.
pub trait CaseLedger: EnrollmentLedger {
  fn insert_case(&mut self, case: &NoveltyCase) -> Result<()>;

  /// Fails with [`crate::Error::CaseNotFound`] if absent.
  fn case(&self, case_id: Uuid) -> Result<NoveltyCase>;

  /// Persist status, radicado and timestamps of an existing case.
  fn update_case(&mut self, case: &NoveltyCase) -> Result<()>;

  fn append_transition(&mut self, transition: &CaseTransition) -> Result<()>;

  /// Increment the `(institution, year)` counter, creating it at zero if
  /// absent, and return the new value.
  fn next_radicado_sequence(&mut self, institution_id: Uuid, year: i32) -> Result<u32>;

  fn document_rules(&self, novelty_type: NoveltyType) -> Result<Vec<DocumentRule>>;

  fn attached_document_types(&self, case_id: Uuid) -> Result<BTreeSet<String>>;

  fn execution_for_case(&self, case_id: Uuid) -> Result<Option<NoveltyExecution>>;

  fn execution_by_key(&self, idempotency_key: &str) -> Result<Option<NoveltyExecution>>;

  fn insert_execution(&mut self, execution: &NoveltyExecution) -> Result<()>;

  fn reversion_for_case(&self, case_id: Uuid) -> Result<Option<NoveltyReversion>>;

  fn insert_reversion(&mut self, reversion: &NoveltyReversion) -> Result<()>;
}

//! The reversal engine: compensate an executed case from its snapshot.
//!
//! This restores recorded field values rather than running inverse
//! operations. Edits made to the same rows after execution are overwritten.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Applied, workflow::apply_transition};
use crate::{
  Error, Result,
  case::{Actor, CaseStatus},
  execution::NoveltyReversion,
  ledger::{CaseLedger, EnrollmentLedger},
  school::EnrollmentStatus,
  snapshot::{CaseSnapshot, StudentSnapshot},
  store::ReversionOutcome,
};

/// Write `snapshot` back over the student aggregate.
///
/// Enrollments that did not exist when the snapshot was taken are marked
/// withdrawn instead of deleted so their history survives.
pub fn restore_snapshot<L>(
  ledger: &mut L,
  snapshot: &StudentSnapshot,
  now: DateTime<Utc>,
) -> Result<()>
where
  L: EnrollmentLedger + ?Sized,
{
  ledger.set_user_active(snapshot.student_id, snapshot.user_active)?;

  for recorded in &snapshot.enrollments {
    ledger.update_enrollment(recorded)?;
  }

  for mut created in ledger.enrollments(snapshot.student_id)? {
    if snapshot.enrollment(created.enrollment_id).is_none()
      && created.status != EnrollmentStatus::Withdrawn
    {
      created.status = EnrollmentStatus::Withdrawn;
      created.updated_at = now;
      ledger.update_enrollment(&created)?;
    }
  }
  Ok(())
}

pub fn revert<L>(
  ledger: &mut L,
  case_id: Uuid,
  actor: &Actor,
  comment: &str,
  now: DateTime<Utc>,
) -> Result<Applied<ReversionOutcome>>
where
  L: CaseLedger,
{
  let mut case = ledger.case(case_id)?;
  if let Some(reversion) = ledger.reversion_for_case(case_id)? {
    return Ok(Applied::replayed(ReversionOutcome { case, reversion }));
  }

  if case.status != CaseStatus::Executed {
    return Err(Error::InvalidState(format!(
      "case {} is {}, only executed cases can be reverted",
      case.case_id, case.status
    )));
  }
  if comment.trim().is_empty() {
    return Err(Error::CommentRequired(CaseStatus::Reverted));
  }

  let execution = ledger.execution_for_case(case_id)?.ok_or_else(|| {
    Error::InvalidState(format!("case {case_id} has no recorded execution"))
  })?;
  let snapshot = StudentSnapshot::from_json(&execution.before)?;

  let before = CaseSnapshot::capture(&*ledger, &case)?;
  restore_snapshot(ledger, &snapshot, now)?;
  let transition =
    apply_transition(ledger, &mut case, CaseStatus::Reverted, actor, Some(comment), now)?;
  let after = CaseSnapshot::capture(&*ledger, &case)?;

  let reversion = NoveltyReversion {
    reversion_id: Uuid::new_v4(),
    case_id,
    reverted_by:  actor.actor_id.clone(),
    reverted_at:  now,
    comment:      comment.trim().to_owned(),
    before:       before.to_json()?,
    after:        after.to_json()?,
  };
  ledger.insert_reversion(&reversion)?;

  Ok(Applied::recorded(ReversionOutcome { case, reversion }, transition))
}

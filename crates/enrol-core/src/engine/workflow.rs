//! Case creation, filing and the generic status transition.

use chrono::{DateTime, Datelike as _, Utc};
use uuid::Uuid;

use super::{Applied, handlers};
use crate::{
  Error, Result,
  case::{Actor, CaseStatus, CaseTransition, NewCase, NoveltyCase, NoveltyType},
  documents::missing_required_documents,
  ledger::CaseLedger,
  radicado::assign_radicado,
  store::TransitionOutcome,
};

/// Move `case` to `to`, append the log row and persist the case.
///
/// This is the only place a case's status changes.
pub fn apply_transition<L>(
  ledger: &mut L,
  case: &mut NoveltyCase,
  to: CaseStatus,
  actor: &Actor,
  comment: Option<&str>,
  now: DateTime<Utc>,
) -> Result<CaseTransition>
where
  L: CaseLedger + ?Sized,
{
  let from = case.status;
  if !from.can_transition_to(to) {
    return Err(Error::InvalidTransition { from, to });
  }
  let comment = comment.map(str::trim).filter(|c| !c.is_empty());
  if to.requires_comment() && comment.is_none() {
    return Err(Error::CommentRequired(to));
  }

  case.status = to;
  match to {
    CaseStatus::Filed => case.filed_at = Some(now),
    CaseStatus::Executed => case.executed_at = Some(now),
    CaseStatus::Closed => case.closed_at = Some(now),
    _ => {}
  }

  let transition = CaseTransition {
    transition_id: Uuid::new_v4(),
    case_id:       case.case_id,
    from_status:   Some(from),
    to_status:     to,
    actor_id:      actor.actor_id.clone(),
    actor_role:    actor.role.clone(),
    comment:       comment.map(str::to_owned),
    origin:        actor.origin.clone(),
    recorded_at:   now,
  };

  ledger.update_case(case)?;
  ledger.append_transition(&transition)?;
  Ok(transition)
}

/// Create a case in `draft` with its creation log row.
pub fn create_case<L>(
  ledger: &mut L,
  input: NewCase,
  now: DateTime<Utc>,
) -> Result<Applied<NoveltyCase>>
where
  L: CaseLedger,
{
  let novelty_type = NoveltyType::from_code(&input.novelty_type)?;
  let student = ledger.student(input.student_id)?;
  if student.institution_id != input.institution_id {
    return Err(Error::InvalidState(format!(
      "student {} does not belong to institution {}",
      student.student_id, input.institution_id
    )));
  }
  if novelty_type == NoveltyType::Graduation {
    handlers::graduating_enrollments(&*ledger, student.student_id)?;
  }

  let case = NoveltyCase {
    case_id: Uuid::new_v4(),
    student_id: input.student_id,
    institution_id: input.institution_id,
    novelty_type,
    reason_id: input.reason_id,
    status: CaseStatus::Draft,
    radicado: None,
    created_at: now,
    requested_at: input.requested_at.unwrap_or(now),
    filed_at: None,
    executed_at: None,
    closed_at: None,
    payload: input.payload,
    idempotency_key: input.idempotency_key.filter(|k| !k.trim().is_empty()),
  };

  let transition = CaseTransition {
    transition_id: Uuid::new_v4(),
    case_id:       case.case_id,
    from_status:   None,
    to_status:     CaseStatus::Draft,
    actor_id:      input.actor.actor_id,
    actor_role:    input.actor.role,
    comment:       None,
    origin:        input.actor.origin,
    recorded_at:   now,
  };

  ledger.insert_case(&case)?;
  ledger.append_transition(&transition)?;
  Ok(Applied::recorded(case, transition))
}

/// Assign a radicado and move a draft case to `filed`.
///
/// The radicado is drawn from the counter for the institution and the
/// calendar year of `now`, on the same ledger as the transition.
pub fn file_case<L>(
  ledger: &mut L,
  case_id: Uuid,
  actor: &Actor,
  comment: Option<&str>,
  prefix: &str,
  now: DateTime<Utc>,
) -> Result<Applied<NoveltyCase>>
where
  L: CaseLedger,
{
  let mut case = ledger.case(case_id)?;
  if case.status != CaseStatus::Draft {
    return Err(Error::InvalidTransition { from: case.status, to: CaseStatus::Filed });
  }
  assign_radicado(ledger, &mut case, now.year(), prefix)?;
  let transition = apply_transition(ledger, &mut case, CaseStatus::Filed, actor, comment, now)?;
  Ok(Applied::recorded(case, transition))
}

/// Generic transition for the review part of the graph.
///
/// Approval runs the required-document gate and is redirected to
/// `pending_docs` when something is missing. `filed`, `executed` and
/// `reverted` have dedicated operations and are refused here.
pub fn transition_case<L>(
  ledger: &mut L,
  case_id: Uuid,
  to: CaseStatus,
  actor: &Actor,
  comment: Option<&str>,
  now: DateTime<Utc>,
) -> Result<Applied<TransitionOutcome>>
where
  L: CaseLedger,
{
  let mut case = ledger.case(case_id)?;
  if matches!(to, CaseStatus::Filed | CaseStatus::Executed | CaseStatus::Reverted) {
    return Err(Error::InvalidTransition { from: case.status, to });
  }

  let mut target = to;
  let mut missing_documents = Vec::new();
  if to == CaseStatus::Approved && case.status.can_transition_to(to) {
    if case.novelty_type == NoveltyType::Graduation {
      handlers::graduating_enrollments(&*ledger, case.student_id)?;
    }
    missing_documents = missing_required_documents(&*ledger, &case)?;
    if !missing_documents.is_empty() {
      tracing::info!(
        case_id = %case.case_id,
        missing = ?missing_documents,
        "approval redirected to pending_docs"
      );
      target = CaseStatus::PendingDocs;
    }
  }

  let transition = apply_transition(ledger, &mut case, target, actor, comment, now)?;
  Ok(Applied::recorded(TransitionOutcome { case, missing_documents }, transition))
}

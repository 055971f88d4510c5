//! The execution engine: apply an approved case exactly once.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
  Applied,
  handlers::{ApplyContext, handler_for},
  workflow::apply_transition,
};
use crate::{
  Error, Result,
  case::{Actor, CaseStatus},
  documents::missing_required_documents,
  execution::{NoveltyExecution, effective_idempotency_key},
  ledger::CaseLedger,
  snapshot::StudentSnapshot,
  store::ExecutionOutcome,
};

pub struct ExecuteRequest<'a> {
  pub case_id:         Uuid,
  pub actor:           &'a Actor,
  pub comment:         Option<&'a str>,
  pub idempotency_key: Option<&'a str>,
  /// Groups whose capacity locks the caller acquired for this request.
  pub locked_groups:   &'a [Uuid],
  pub now:             DateTime<Utc>,
}

/// Return the execution already recorded for the case or its key, if any.
pub fn existing_execution<L>(
  ledger: &L,
  case_id: Uuid,
  requested_key: Option<&str>,
) -> Result<Option<ExecutionOutcome>>
where
  L: CaseLedger + ?Sized,
{
  let case = ledger.case(case_id)?;
  if let Some(execution) = ledger.execution_for_case(case_id)? {
    return Ok(Some(ExecutionOutcome { case, execution }));
  }

  let key = effective_idempotency_key(&case, requested_key);
  let Some(execution) = ledger.execution_by_key(&key)? else {
    return Ok(None);
  };
  tracing::warn!(
    case_id = %case_id,
    other_case_id = %execution.case_id,
    "idempotency key already used by another case; returning its execution"
  );
  let owner = ledger.case(execution.case_id)?;
  Ok(Some(ExecutionOutcome { case: owner, execution }))
}

/// Execute an approved case.
///
/// Replays return the stored execution untouched. Otherwise the document
/// gate runs, the aggregate is snapshotted, the type handler applies its
/// side effect, the case moves to `executed`, and the execution row is
/// written with both snapshots. Any error leaves everything to be rolled
/// back by the caller.
pub fn execute<L>(ledger: &mut L, req: ExecuteRequest<'_>) -> Result<Applied<ExecutionOutcome>>
where
  L: CaseLedger,
{
  if let Some(outcome) = existing_execution(&*ledger, req.case_id, req.idempotency_key)? {
    return Ok(Applied::replayed(outcome));
  }

  let mut case = ledger.case(req.case_id)?;
  if case.status != CaseStatus::Approved {
    return Err(Error::InvalidState(format!(
      "case {} is {}, only approved cases can be executed",
      case.case_id, case.status
    )));
  }

  let missing = missing_required_documents(&*ledger, &case)?;
  if !missing.is_empty() {
    return Err(Error::MissingDocuments(missing));
  }

  let key = effective_idempotency_key(&case, req.idempotency_key);
  let before = StudentSnapshot::capture(&*ledger, case.student_id)?;

  let ctx = ApplyContext { now: req.now, locked_groups: req.locked_groups };
  handler_for(case.novelty_type).apply(ledger, &case, &ctx)?;

  let transition = apply_transition(
    ledger,
    &mut case,
    CaseStatus::Executed,
    req.actor,
    req.comment,
    req.now,
  )?;
  let after = StudentSnapshot::capture(&*ledger, case.student_id)?;

  let execution = NoveltyExecution {
    execution_id:    Uuid::new_v4(),
    case_id:         case.case_id,
    idempotency_key: key,
    executed_by:     req.actor.actor_id.clone(),
    executed_at:     req.now,
    before:          before.to_json()?,
    after:           after.to_json()?,
  };
  ledger.insert_execution(&execution)?;

  Ok(Applied::recorded(ExecutionOutcome { case, execution }, transition))
}

//! Type-specific side effects of an executed case.
//!
//! Each [`NoveltyType`] maps to one [`NoveltyHandler`] through
//! [`handler_for`]. Handlers only see the enrollment aggregate; the case
//! itself is read-only to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
  Error, Result,
  capacity::assert_capacity_available,
  case::{NoveltyCase, NoveltyType},
  ledger::EnrollmentLedger,
  school::{Enrollment, EnrollmentStatus, Group},
};

// ─── Context ─────────────────────────────────────────────────────────────────

pub struct ApplyContext<'a> {
  pub now:           DateTime<Utc>,
  /// Groups whose capacity locks the caller holds for this execution.
  pub locked_groups: &'a [Uuid],
}

impl ApplyContext<'_> {
  /// A seat may only be claimed in a group the caller locked beforehand.
  /// A mismatch means the aggregate changed between planning and execution.
  fn ensure_locked(&self, group_id: Uuid) -> Result<()> {
    if self.locked_groups.contains(&group_id) {
      Ok(())
    } else {
      Err(Error::LockTimeout(format!(
        "capacity lock for group {group_id} is not held; retry the execution"
      )))
    }
  }
}

// ─── Handler trait ───────────────────────────────────────────────────────────

pub trait NoveltyHandler: Send + Sync {
  /// Groups in which executing `case` would claim a seat. The caller locks
  /// their capacity keys before opening the execution transaction.
  fn claimed_groups(
    &self,
    _ledger: &dyn EnrollmentLedger,
    _case: &NoveltyCase,
  ) -> Result<Vec<Uuid>> {
    Ok(Vec::new())
  }

  /// Apply the side effect. Must fail before writing anything it cannot
  /// complete; the surrounding transaction is rolled back on error anyway.
  fn apply(
    &self,
    ledger: &mut dyn EnrollmentLedger,
    case: &NoveltyCase,
    ctx: &ApplyContext<'_>,
  ) -> Result<()>;
}

pub fn handler_for(novelty_type: NoveltyType) -> &'static dyn NoveltyHandler {
  match novelty_type {
    NoveltyType::Withdrawal => &Withdrawal,
    NoveltyType::ReAdmission => &ReAdmission,
    NoveltyType::InternalTransfer => &InternalTransfer,
    NoveltyType::Graduation => &Graduation,
  }
}

// ─── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReAdmissionPayload {
  pub academic_year: Option<i32>,
  pub grade_id:      Option<Uuid>,
  pub group_id:      Option<Uuid>,
  pub campus_id:     Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TransferPayload {
  pub destination_group_id: Uuid,
}

fn parse_payload<T: DeserializeOwned>(case: &NoveltyCase) -> Result<T> {
  let value = if case.payload.is_null() {
    serde_json::json!({})
  } else {
    case.payload.clone()
  };
  serde_json::from_value(value)
    .map_err(|e| Error::InvalidPayload(format!("{} payload: {e}", case.novelty_type)))
}

fn current_enrollment(enrollments: &[Enrollment]) -> Option<&Enrollment> {
  enrollments
    .iter()
    .filter(|e| e.is_active())
    .max_by_key(|e| (e.academic_year, e.updated_at))
}

// ─── Withdrawal ──────────────────────────────────────────────────────────────

pub struct Withdrawal;

impl NoveltyHandler for Withdrawal {
  fn apply(
    &self,
    ledger: &mut dyn EnrollmentLedger,
    case: &NoveltyCase,
    ctx: &ApplyContext<'_>,
  ) -> Result<()> {
    ledger.set_user_active(case.student_id, false)?;
    for mut enrollment in ledger.enrollments(case.student_id)? {
      if enrollment.is_active() {
        enrollment.status = EnrollmentStatus::Withdrawn;
        enrollment.updated_at = ctx.now;
        ledger.update_enrollment(&enrollment)?;
      }
    }
    Ok(())
  }
}

// ─── Re-admission ────────────────────────────────────────────────────────────

pub struct ReAdmission;

struct ReAdmissionPlan {
  payload:     ReAdmissionPayload,
  year:        i32,
  /// Group the student ends up occupying, if any.
  seat:        Option<Group>,
  /// Withdrawn enrollment for the target year to flip back to active.
  reactivate:  Option<Enrollment>,
  /// Campus of the most recent enrollment, used when nothing else says.
  last_campus: Option<Uuid>,
}

impl ReAdmission {
  fn plan(ledger: &dyn EnrollmentLedger, case: &NoveltyCase) -> Result<ReAdmissionPlan> {
    let payload: ReAdmissionPayload = parse_payload(case)?;
    let group = payload.group_id.map(|id| ledger.group(id)).transpose()?;

    let year = payload
      .academic_year
      .or_else(|| group.as_ref().map(|g| g.academic_year))
      .ok_or_else(|| {
        Error::InvalidPayload("re-admission needs an academic_year or a group_id".into())
      })?;

    if let Some(g) = &group {
      if g.academic_year != year {
        return Err(Error::InvalidDestination(format!(
          "group {} belongs to academic year {}, not {year}",
          g.group_id, g.academic_year
        )));
      }
      if let Some(grade_id) = payload.grade_id
        && grade_id != g.grade_id
      {
        return Err(Error::InvalidDestination(format!(
          "group {} does not teach grade {grade_id}",
          g.group_id
        )));
      }
    }

    let enrollments = ledger.enrollments(case.student_id)?;
    if enrollments.iter().any(|e| e.academic_year == year && e.is_active()) {
      return Err(Error::InvalidState(format!(
        "student {} is already actively enrolled for {year}",
        case.student_id
      )));
    }

    let last_campus = enrollments
      .iter()
      .max_by_key(|e| (e.academic_year, e.updated_at))
      .map(|e| e.campus_id);

    let reactivate = enrollments
      .into_iter()
      .filter(|e| e.academic_year == year && e.status == EnrollmentStatus::Withdrawn)
      .max_by_key(|e| e.updated_at);

    // Flipping a withdrawn enrollment back to active re-occupies its old
    // group unless the payload names a new group, or a grade that group
    // does not teach.
    let seat = match (group, &reactivate) {
      (Some(g), _) => Some(g),
      (None, Some(e)) => match e.group_id {
        Some(id) => {
          let old = ledger.group(id)?;
          payload.grade_id.is_none_or(|grade_id| grade_id == old.grade_id).then_some(old)
        }
        None => None,
      },
      (None, None) => None,
    };

    Ok(ReAdmissionPlan { payload, year, seat, reactivate, last_campus })
  }
}

impl NoveltyHandler for ReAdmission {
  fn claimed_groups(
    &self,
    ledger: &dyn EnrollmentLedger,
    case: &NoveltyCase,
  ) -> Result<Vec<Uuid>> {
    Ok(Self::plan(ledger, case)?.seat.map(|g| g.group_id).into_iter().collect())
  }

  fn apply(
    &self,
    ledger: &mut dyn EnrollmentLedger,
    case: &NoveltyCase,
    ctx: &ApplyContext<'_>,
  ) -> Result<()> {
    let plan = Self::plan(&*ledger, case)?;

    if let Some(group) = &plan.seat {
      ctx.ensure_locked(group.group_id)?;
      assert_capacity_available(&*ledger, group, None)?;
    }

    let enrollment = match plan.reactivate {
      Some(mut e) => {
        if let Some(group) = &plan.seat {
          e.group_id = Some(group.group_id);
          e.grade_id = group.grade_id;
          e.campus_id = group.campus_id;
        } else if let Some(grade_id) = plan.payload.grade_id {
          ledger.grade(grade_id)?;
          e.grade_id = grade_id;
          e.group_id = None;
        }
        e.status = EnrollmentStatus::Active;
        e.updated_at = ctx.now;
        ledger.update_enrollment(&e)?;
        e
      }
      None => {
        let grade_id = plan
          .seat
          .as_ref()
          .map(|g| g.grade_id)
          .or(plan.payload.grade_id)
          .ok_or_else(|| {
            Error::InvalidPayload("re-admission into a new year needs a grade_id or group_id".into())
          })?;
        ledger.grade(grade_id)?;
        let campus_id = plan
          .seat
          .as_ref()
          .map(|g| g.campus_id)
          .or(plan.payload.campus_id)
          .or(plan.last_campus)
          .ok_or_else(|| Error::InvalidPayload("re-admission needs a campus_id".into()))?;

        let e = Enrollment {
          enrollment_id: Uuid::new_v4(),
          student_id: case.student_id,
          campus_id,
          grade_id,
          group_id: plan.seat.as_ref().map(|g| g.group_id),
          academic_year: plan.year,
          status: EnrollmentStatus::Active,
          updated_at: ctx.now,
        };
        ledger.insert_enrollment(&e)?;
        e
      }
    };

    ledger.set_user_active(case.student_id, true)?;
    tracing::debug!(
      case_id = %case.case_id,
      enrollment_id = %enrollment.enrollment_id,
      "student re-admitted"
    );
    Ok(())
  }
}

// ─── Internal transfer ───────────────────────────────────────────────────────

pub struct InternalTransfer;

impl NoveltyHandler for InternalTransfer {
  fn claimed_groups(
    &self,
    _ledger: &dyn EnrollmentLedger,
    case: &NoveltyCase,
  ) -> Result<Vec<Uuid>> {
    let payload: TransferPayload = parse_payload(case)?;
    Ok(vec![payload.destination_group_id])
  }

  fn apply(
    &self,
    ledger: &mut dyn EnrollmentLedger,
    case: &NoveltyCase,
    ctx: &ApplyContext<'_>,
  ) -> Result<()> {
    let payload: TransferPayload = parse_payload(case)?;
    let destination = ledger.group(payload.destination_group_id)?;

    let enrollments = ledger.enrollments(case.student_id)?;
    let mut current = current_enrollment(&enrollments)
      .cloned()
      .ok_or_else(|| {
        Error::InvalidState(format!("student {} has no active enrollment", case.student_id))
      })?;

    if destination.academic_year != current.academic_year {
      return Err(Error::InvalidDestination(format!(
        "group {} is in academic year {}, the enrollment is in {}",
        destination.group_id, destination.academic_year, current.academic_year
      )));
    }
    if destination.grade_id != current.grade_id {
      return Err(Error::InvalidDestination(format!(
        "group {} teaches a different grade than the current enrollment",
        destination.group_id
      )));
    }

    ctx.ensure_locked(destination.group_id)?;
    let already_there = current.group_id == Some(destination.group_id);
    let exclude = already_there.then_some(current.enrollment_id);
    assert_capacity_available(&*ledger, &destination, exclude)?;

    current.group_id = Some(destination.group_id);
    current.campus_id = destination.campus_id;
    current.updated_at = ctx.now;
    ledger.update_enrollment(&current)?;
    Ok(())
  }
}

// ─── Graduation ──────────────────────────────────────────────────────────────

pub struct Graduation;

/// Active enrollments of `student_id` sitting in a terminal grade.
///
/// Fails with [`Error::InvalidState`] when there are none, which is what
/// makes a graduation case ineligible.
pub fn graduating_enrollments<L>(ledger: &L, student_id: Uuid) -> Result<Vec<Enrollment>>
where
  L: EnrollmentLedger + ?Sized,
{
  let active: Vec<Enrollment> = ledger
    .enrollments(student_id)?
    .into_iter()
    .filter(Enrollment::is_active)
    .collect();
  if active.is_empty() {
    return Err(Error::InvalidState(format!(
      "student {student_id} has no active enrollment to graduate from"
    )));
  }

  let mut graduating = Vec::new();
  for enrollment in active {
    if ledger.grade(enrollment.grade_id)?.is_terminal {
      graduating.push(enrollment);
    }
  }
  if graduating.is_empty() {
    return Err(Error::InvalidState(format!(
      "student {student_id} is not enrolled in the terminal grade"
    )));
  }
  Ok(graduating)
}

impl NoveltyHandler for Graduation {
  fn apply(
    &self,
    ledger: &mut dyn EnrollmentLedger,
    case: &NoveltyCase,
    ctx: &ApplyContext<'_>,
  ) -> Result<()> {
    for mut enrollment in graduating_enrollments(&*ledger, case.student_id)? {
      enrollment.status = EnrollmentStatus::Graduated;
      enrollment.updated_at = ctx.now;
      ledger.update_enrollment(&enrollment)?;
    }

    let still_active = ledger
      .enrollments(case.student_id)?
      .iter()
      .any(Enrollment::is_active);
    if !still_active {
      ledger.set_user_active(case.student_id, false)?;
    }
    Ok(())
  }
}

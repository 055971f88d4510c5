//! Before/after captures of the aggregate a case touches.
//!
//! Snapshots are stored as plain JSON documents. They carry no schema
//! version; the set of keys is the version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Result,
  case::{CaseStatus, NoveltyCase},
  ledger::EnrollmentLedger,
  school::Enrollment,
};

/// The student account flag plus every enrollment row of the student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentSnapshot {
  pub student_id:  Uuid,
  pub user_active: bool,
  pub enrollments: Vec<Enrollment>,
}

impl StudentSnapshot {
  pub fn capture<L>(ledger: &L, student_id: Uuid) -> Result<Self>
  where
    L: EnrollmentLedger + ?Sized,
  {
    let student = ledger.student(student_id)?;
    Ok(Self {
      student_id,
      user_active: student.user_active,
      enrollments: ledger.enrollments(student_id)?,
    })
  }

  pub fn to_json(&self) -> Result<serde_json::Value> { Ok(serde_json::to_value(self)?) }

  pub fn from_json(value: &serde_json::Value) -> Result<Self> {
    Ok(Self::deserialize(value)?)
  }

  pub fn enrollment(&self, enrollment_id: Uuid) -> Option<&Enrollment> {
    self.enrollments.iter().find(|e| e.enrollment_id == enrollment_id)
  }
}

/// Case-level view recorded around a reversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSnapshot {
  pub case_id:     Uuid,
  pub status:      CaseStatus,
  pub radicado:    Option<String>,
  pub executed_at: Option<DateTime<Utc>>,
  pub student:     StudentSnapshot,
}

impl CaseSnapshot {
  pub fn capture<L>(ledger: &L, case: &NoveltyCase) -> Result<Self>
  where
    L: EnrollmentLedger + ?Sized,
  {
    Ok(Self {
      case_id:     case.case_id,
      status:      case.status,
      radicado:    case.radicado.as_ref().map(|r| r.number.clone()),
      executed_at: case.executed_at,
      student:     StudentSnapshot::capture(ledger, case.student_id)?,
    })
  }

  pub fn to_json(&self) -> Result<serde_json::Value> { Ok(serde_json::to_value(self)?) }
}

//! The student/enrollment aggregate the engine reads and mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// A student's account. `user_active` is the account-active flag toggled by
/// withdrawal, re-admission and graduation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
  pub student_id:     Uuid,
  pub institution_id: Uuid,
  pub full_name:      String,
  pub user_active:    bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
  pub grade_id:    Uuid,
  pub name:        String,
  /// Ordinal position within the program.
  pub level:       i32,
  /// The last grade of the program; only students here can graduate.
  pub is_terminal: bool,
}

/// A destination group (class section) with its static seat count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub group_id:      Uuid,
  pub campus_id:     Uuid,
  pub grade_id:      Uuid,
  pub academic_year: i32,
  pub shift:         String,
  pub modality:      String,
  pub name:          String,
  pub base_capacity: u32,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnrollmentStatus {
  Active,
  Withdrawn,
  Graduated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
  pub enrollment_id: Uuid,
  pub student_id:    Uuid,
  pub campus_id:     Uuid,
  pub grade_id:      Uuid,
  pub group_id:      Option<Uuid>,
  pub academic_year: i32,
  pub status:        EnrollmentStatus,
  pub updated_at:    DateTime<Utc>,
}

impl Enrollment {
  pub fn is_active(&self) -> bool { self.status == EnrollmentStatus::Active }
}

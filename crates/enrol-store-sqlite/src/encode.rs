//! Encoding and decoding helpers between domain types and the plain values
//! stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings,
//! enumerations their snake_case codes, and payloads/snapshots compact JSON.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use enrol_core::{
  case::{CaseStatus, CaseTransition, NoveltyCase, NoveltyType},
  documents::DocumentRule,
  execution::{NoveltyExecution, NoveltyReversion},
  radicado::Radicado,
  school::{Enrollment, EnrollmentStatus, Grade, Group, Student},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

/// Parse a snake_case code into one of the strum-derived enums.
pub fn decode_code<T: FromStr>(what: &str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {what}: {s:?}")))
}

pub fn encode_json(value: &serde_json::Value) -> String { value.to_string() }

pub fn decode_json(s: &str) -> Result<serde_json::Value> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawCase`] field order.
pub const CASE_COLUMNS: &str = "case_id, student_id, institution_id, novelty_type, \
   reason_id, status, radicado, radicado_year, radicado_seq, created_at, \
   requested_at, filed_at, executed_at, closed_at, payload, idempotency_key";

/// Raw values read directly from a `novelty_cases` row.
pub struct RawCase {
  pub case_id:         String,
  pub student_id:      String,
  pub institution_id:  String,
  pub novelty_type:    String,
  pub reason_id:       Option<String>,
  pub status:          String,
  pub radicado:        Option<String>,
  pub radicado_year:   Option<i32>,
  pub radicado_seq:    Option<u32>,
  pub created_at:      String,
  pub requested_at:    String,
  pub filed_at:        Option<String>,
  pub executed_at:     Option<String>,
  pub closed_at:       Option<String>,
  pub payload:         String,
  pub idempotency_key: Option<String>,
}

impl RawCase {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      case_id:         row.get(0)?,
      student_id:      row.get(1)?,
      institution_id:  row.get(2)?,
      novelty_type:    row.get(3)?,
      reason_id:       row.get(4)?,
      status:          row.get(5)?,
      radicado:        row.get(6)?,
      radicado_year:   row.get(7)?,
      radicado_seq:    row.get(8)?,
      created_at:      row.get(9)?,
      requested_at:    row.get(10)?,
      filed_at:        row.get(11)?,
      executed_at:     row.get(12)?,
      closed_at:       row.get(13)?,
      payload:         row.get(14)?,
      idempotency_key: row.get(15)?,
    })
  }

  pub fn into_case(self) -> Result<NoveltyCase> {
    let radicado = match (self.radicado, self.radicado_year, self.radicado_seq) {
      (Some(number), Some(year), Some(sequence)) => Some(Radicado { number, year, sequence }),
      _ => None,
    };

    Ok(NoveltyCase {
      case_id: decode_uuid(&self.case_id)?,
      student_id: decode_uuid(&self.student_id)?,
      institution_id: decode_uuid(&self.institution_id)?,
      novelty_type: decode_code::<NoveltyType>("novelty type", &self.novelty_type)?,
      reason_id: decode_opt_uuid(self.reason_id)?,
      status: decode_code::<CaseStatus>("case status", &self.status)?,
      radicado,
      created_at: decode_dt(&self.created_at)?,
      requested_at: decode_dt(&self.requested_at)?,
      filed_at: decode_opt_dt(self.filed_at)?,
      executed_at: decode_opt_dt(self.executed_at)?,
      closed_at: decode_opt_dt(self.closed_at)?,
      payload: decode_json(&self.payload)?,
      idempotency_key: self.idempotency_key,
    })
  }
}

pub const TRANSITION_COLUMNS: &str = "transition_id, case_id, from_status, to_status, \
   actor_id, actor_role, comment, origin, recorded_at";

pub struct RawTransition {
  pub transition_id: String,
  pub case_id:       String,
  pub from_status:   Option<String>,
  pub to_status:     String,
  pub actor_id:      String,
  pub actor_role:    String,
  pub comment:       Option<String>,
  pub origin:        Option<String>,
  pub recorded_at:   String,
}

impl RawTransition {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      transition_id: row.get(0)?,
      case_id:       row.get(1)?,
      from_status:   row.get(2)?,
      to_status:     row.get(3)?,
      actor_id:      row.get(4)?,
      actor_role:    row.get(5)?,
      comment:       row.get(6)?,
      origin:        row.get(7)?,
      recorded_at:   row.get(8)?,
    })
  }

  pub fn into_transition(self) -> Result<CaseTransition> {
    Ok(CaseTransition {
      transition_id: decode_uuid(&self.transition_id)?,
      case_id:       decode_uuid(&self.case_id)?,
      from_status:   self
        .from_status
        .as_deref()
        .map(|s| decode_code::<CaseStatus>("case status", s))
        .transpose()?,
      to_status:     decode_code("case status", &self.to_status)?,
      actor_id:      self.actor_id,
      actor_role:    self.actor_role,
      comment:       self.comment,
      origin:        self.origin,
      recorded_at:   decode_dt(&self.recorded_at)?,
    })
  }
}

pub const ENROLLMENT_COLUMNS: &str = "enrollment_id, student_id, campus_id, grade_id, \
   group_id, academic_year, status, updated_at";

pub struct RawEnrollment {
  pub enrollment_id: String,
  pub student_id:    String,
  pub campus_id:     String,
  pub grade_id:      String,
  pub group_id:      Option<String>,
  pub academic_year: i32,
  pub status:        String,
  pub updated_at:    String,
}

impl RawEnrollment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      enrollment_id: row.get(0)?,
      student_id:    row.get(1)?,
      campus_id:     row.get(2)?,
      grade_id:      row.get(3)?,
      group_id:      row.get(4)?,
      academic_year: row.get(5)?,
      status:        row.get(6)?,
      updated_at:    row.get(7)?,
    })
  }

  pub fn into_enrollment(self) -> Result<Enrollment> {
    Ok(Enrollment {
      enrollment_id: decode_uuid(&self.enrollment_id)?,
      student_id:    decode_uuid(&self.student_id)?,
      campus_id:     decode_uuid(&self.campus_id)?,
      grade_id:      decode_uuid(&self.grade_id)?,
      group_id:      decode_opt_uuid(self.group_id)?,
      academic_year: self.academic_year,
      status:        decode_code::<EnrollmentStatus>("enrollment status", &self.status)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawStudent {
  pub student_id:     String,
  pub institution_id: String,
  pub full_name:      String,
  pub user_active:    bool,
}

impl RawStudent {
  pub fn into_student(self) -> Result<Student> {
    Ok(Student {
      student_id:     decode_uuid(&self.student_id)?,
      institution_id: decode_uuid(&self.institution_id)?,
      full_name:      self.full_name,
      user_active:    self.user_active,
    })
  }
}

pub struct RawGrade {
  pub grade_id:    String,
  pub name:        String,
  pub level:       i32,
  pub is_terminal: bool,
}

impl RawGrade {
  pub fn into_grade(self) -> Result<Grade> {
    Ok(Grade {
      grade_id:    decode_uuid(&self.grade_id)?,
      name:        self.name,
      level:       self.level,
      is_terminal: self.is_terminal,
    })
  }
}

pub const GROUP_COLUMNS: &str = "group_id, campus_id, grade_id, academic_year, shift, \
   modality, name, base_capacity";

pub struct RawGroup {
  pub group_id:      String,
  pub campus_id:     String,
  pub grade_id:      String,
  pub academic_year: i32,
  pub shift:         String,
  pub modality:      String,
  pub name:          String,
  pub base_capacity: u32,
}

impl RawGroup {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:      row.get(0)?,
      campus_id:     row.get(1)?,
      grade_id:      row.get(2)?,
      academic_year: row.get(3)?,
      shift:         row.get(4)?,
      modality:      row.get(5)?,
      name:          row.get(6)?,
      base_capacity: row.get(7)?,
    })
  }

  pub fn into_group(self) -> Result<Group> {
    Ok(Group {
      group_id:      decode_uuid(&self.group_id)?,
      campus_id:     decode_uuid(&self.campus_id)?,
      grade_id:      decode_uuid(&self.grade_id)?,
      academic_year: self.academic_year,
      shift:         self.shift,
      modality:      self.modality,
      name:          self.name,
      base_capacity: self.base_capacity,
    })
  }
}

pub const EXECUTION_COLUMNS: &str = "execution_id, case_id, idempotency_key, executed_by, \
   executed_at, before_json, after_json";

pub struct RawExecution {
  pub execution_id:    String,
  pub case_id:         String,
  pub idempotency_key: String,
  pub executed_by:     String,
  pub executed_at:     String,
  pub before_json:     String,
  pub after_json:      String,
}

impl RawExecution {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      execution_id:    row.get(0)?,
      case_id:         row.get(1)?,
      idempotency_key: row.get(2)?,
      executed_by:     row.get(3)?,
      executed_at:     row.get(4)?,
      before_json:     row.get(5)?,
      after_json:      row.get(6)?,
    })
  }

  pub fn into_execution(self) -> Result<NoveltyExecution> {
    Ok(NoveltyExecution {
      execution_id:    decode_uuid(&self.execution_id)?,
      case_id:         decode_uuid(&self.case_id)?,
      idempotency_key: self.idempotency_key,
      executed_by:     self.executed_by,
      executed_at:     decode_dt(&self.executed_at)?,
      before:          decode_json(&self.before_json)?,
      after:           decode_json(&self.after_json)?,
    })
  }
}

pub const REVERSION_COLUMNS: &str = "reversion_id, case_id, reverted_by, reverted_at, \
   comment, before_json, after_json";

pub struct RawReversion {
  pub reversion_id: String,
  pub case_id:      String,
  pub reverted_by:  String,
  pub reverted_at:  String,
  pub comment:      String,
  pub before_json:  String,
  pub after_json:   String,
}

impl RawReversion {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      reversion_id: row.get(0)?,
      case_id:      row.get(1)?,
      reverted_by:  row.get(2)?,
      reverted_at:  row.get(3)?,
      comment:      row.get(4)?,
      before_json:  row.get(5)?,
      after_json:   row.get(6)?,
    })
  }

  pub fn into_reversion(self) -> Result<NoveltyReversion> {
    Ok(NoveltyReversion {
      reversion_id: decode_uuid(&self.reversion_id)?,
      case_id:      decode_uuid(&self.case_id)?,
      reverted_by:  self.reverted_by,
      reverted_at:  decode_dt(&self.reverted_at)?,
      comment:      self.comment,
      before:       decode_json(&self.before_json)?,
      after:        decode_json(&self.after_json)?,
    })
  }
}

pub struct RawDocumentRule {
  pub rule_id:       String,
  pub novelty_type:  String,
  pub reason_id:     Option<String>,
  pub document_type: String,
  pub active:        bool,
}

impl RawDocumentRule {
  pub fn into_rule(self) -> Result<DocumentRule> {
    Ok(DocumentRule {
      rule_id:       decode_uuid(&self.rule_id)?,
      novelty_type:  decode_code("novelty type", &self.novelty_type)?,
      reason_id:     decode_opt_uuid(self.reason_id)?,
      document_type: self.document_type,
      active:        self.active,
    })
  }
}

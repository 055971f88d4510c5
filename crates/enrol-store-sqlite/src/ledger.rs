//! [`SqlLedger`]: the engine's ledger traits over an open SQLite
//! connection.
//!
//! The store opens an `IMMEDIATE` transaction, wraps it in a ledger, hands
//! it to the engine and commits only when the engine succeeds. Holding the
//! writer lock for the whole unit of work is what serialises competing
//! executions against the same case and the same groups.

use std::collections::BTreeSet;

use enrol_core::{
  capacity::{BucketKey, CapacityBucket, GroupCapacityOverride},
  case::{CaseTransition, NoveltyCase, NoveltyType},
  documents::DocumentRule,
  execution::{NoveltyExecution, NoveltyReversion},
  ledger::{CaseLedger, EnrollmentLedger},
  school::{Enrollment, Grade, Group, Student},
};
use rusqlite::{OptionalExtension as _, params};
use uuid::Uuid;

use crate::{
  Error,
  encode::{
    CASE_COLUMNS, ENROLLMENT_COLUMNS, EXECUTION_COLUMNS, GROUP_COLUMNS, REVERSION_COLUMNS,
    RawCase, RawDocumentRule, RawEnrollment, RawExecution, RawGrade, RawGroup,
    RawReversion, RawStudent, RawTransition, TRANSITION_COLUMNS, encode_dt, encode_json,
    encode_uuid,
  },
};

type CoreResult<T> = enrol_core::Result<T>;

/// Map any store-level failure into the core taxonomy.
fn db<E: Into<Error>>(e: E) -> enrol_core::Error {
  let e: Error = e.into();
  e.into()
}

pub struct SqlLedger<'a> {
  conn: &'a rusqlite::Connection,
}

impl<'a> SqlLedger<'a> {
  pub fn new(conn: &'a rusqlite::Connection) -> Self { Self { conn } }

  // ── Registry writes (administrative, not part of the engine traits) ──────

  pub fn insert_student(&self, s: &Student) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT INTO students (student_id, institution_id, full_name, user_active)
         VALUES (?1, ?2, ?3, ?4)",
        params![
          encode_uuid(s.student_id),
          encode_uuid(s.institution_id),
          s.full_name,
          s.user_active
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  pub fn insert_grade(&self, g: &Grade) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT INTO grades (grade_id, name, level, is_terminal) VALUES (?1, ?2, ?3, ?4)",
        params![encode_uuid(g.grade_id), g.name, g.level, g.is_terminal],
      )
      .map_err(db)?;
    Ok(())
  }

  pub fn insert_group(&self, g: &Group) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT INTO class_groups (
           group_id, campus_id, grade_id, academic_year, shift, modality, name, base_capacity
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
          encode_uuid(g.group_id),
          encode_uuid(g.campus_id),
          encode_uuid(g.grade_id),
          g.academic_year,
          g.shift,
          g.modality,
          g.name,
          g.base_capacity,
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  pub fn put_capacity_bucket(&self, b: &CapacityBucket) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT INTO capacity_buckets (
           campus_id, grade_id, academic_year, shift, modality, capacity, active
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (campus_id, grade_id, academic_year, shift, modality)
         DO UPDATE SET capacity = excluded.capacity, active = excluded.active",
        params![
          encode_uuid(b.key.campus_id),
          encode_uuid(b.key.grade_id),
          b.key.academic_year,
          b.key.shift,
          b.key.modality,
          b.capacity,
          b.active,
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  pub fn put_group_override(&self, o: &GroupCapacityOverride) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT INTO group_capacity_overrides (group_id, capacity, active)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (group_id)
         DO UPDATE SET capacity = excluded.capacity, active = excluded.active",
        params![encode_uuid(o.group_id), o.capacity, o.active],
      )
      .map_err(db)?;
    Ok(())
  }

  pub fn insert_document_rule(&self, r: &DocumentRule) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT INTO document_rules (rule_id, novelty_type, reason_id, document_type, active)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          encode_uuid(r.rule_id),
          r.novelty_type.as_ref(),
          r.reason_id.map(encode_uuid),
          r.document_type,
          r.active,
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  pub fn attach_document(&self, case_id: Uuid, document_type: &str) -> CoreResult<()> {
    self.case(case_id)?;
    self
      .conn
      .execute(
        "INSERT INTO case_documents (case_id, document_type, attached_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (case_id, document_type) DO NOTHING",
        params![encode_uuid(case_id), document_type, encode_dt(chrono::Utc::now())],
      )
      .map_err(db)?;
    Ok(())
  }

  /// Remove a case that never received a radicado, with its log and
  /// attachments.
  pub fn delete_unfiled_case(&self, case_id: Uuid) -> CoreResult<()> {
    let case = self.case(case_id)?;
    if case.radicado.is_some() {
      return Err(enrol_core::Error::InvalidState(format!(
        "case {case_id} has been filed and cannot be deleted"
      )));
    }
    let id = encode_uuid(case_id);
    for sql in [
      "DELETE FROM case_documents WHERE case_id = ?1",
      "DELETE FROM case_transitions WHERE case_id = ?1",
      "DELETE FROM novelty_cases WHERE case_id = ?1",
    ] {
      self.conn.execute(sql, params![id]).map_err(db)?;
    }
    Ok(())
  }

  pub fn transitions(&self, case_id: Uuid) -> CoreResult<Vec<CaseTransition>> {
    let mut stmt = self
      .conn
      .prepare(&format!(
        "SELECT {TRANSITION_COLUMNS} FROM case_transitions WHERE case_id = ?1 ORDER BY rowid"
      ))
      .map_err(db)?;
    let raws = stmt
      .query_map(params![encode_uuid(case_id)], RawTransition::from_row)
      .map_err(db)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(db)?;
    raws
      .into_iter()
      .map(|r| r.into_transition().map_err(db))
      .collect()
  }

  pub fn find_case(&self, case_id: Uuid) -> CoreResult<Option<NoveltyCase>> {
    let raw = self
      .conn
      .query_row(
        &format!("SELECT {CASE_COLUMNS} FROM novelty_cases WHERE case_id = ?1"),
        params![encode_uuid(case_id)],
        RawCase::from_row,
      )
      .optional()
      .map_err(db)?;
    raw.map(|r| r.into_case().map_err(db)).transpose()
  }

  fn find_execution(&self, column: &str, value: &str) -> CoreResult<Option<NoveltyExecution>> {
    let raw = self
      .conn
      .query_row(
        &format!("SELECT {EXECUTION_COLUMNS} FROM novelty_executions WHERE {column} = ?1"),
        params![value],
        RawExecution::from_row,
      )
      .optional()
      .map_err(db)?;
    raw.map(|r| r.into_execution().map_err(db)).transpose()
  }
}

// ─── EnrollmentLedger ────────────────────────────────────────────────────────

impl EnrollmentLedger for SqlLedger<'_> {
  fn student(&self, student_id: Uuid) -> CoreResult<Student> {
    let raw = self
      .conn
      .query_row(
        "SELECT student_id, institution_id, full_name, user_active
         FROM students WHERE student_id = ?1",
        params![encode_uuid(student_id)],
        |row| {
          Ok(RawStudent {
            student_id:     row.get(0)?,
            institution_id: row.get(1)?,
            full_name:      row.get(2)?,
            user_active:    row.get(3)?,
          })
        },
      )
      .optional()
      .map_err(db)?
      .ok_or(enrol_core::Error::StudentNotFound(student_id))?;
    raw.into_student().map_err(db)
  }

  fn set_user_active(&mut self, student_id: Uuid, active: bool) -> CoreResult<()> {
    let changed = self
      .conn
      .execute(
        "UPDATE students SET user_active = ?2 WHERE student_id = ?1",
        params![encode_uuid(student_id), active],
      )
      .map_err(db)?;
    if changed == 0 {
      return Err(enrol_core::Error::StudentNotFound(student_id));
    }
    Ok(())
  }

  fn enrollments(&self, student_id: Uuid) -> CoreResult<Vec<Enrollment>> {
    let mut stmt = self
      .conn
      .prepare(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
         WHERE student_id = ?1
         ORDER BY academic_year, updated_at, enrollment_id"
      ))
      .map_err(db)?;
    let raws = stmt
      .query_map(params![encode_uuid(student_id)], RawEnrollment::from_row)
      .map_err(db)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(db)?;
    raws
      .into_iter()
      .map(|r| r.into_enrollment().map_err(db))
      .collect()
  }

  fn insert_enrollment(&mut self, e: &Enrollment) -> CoreResult<()> {
    self
      .conn
      .execute(
        &format!(
          "INSERT INTO enrollments ({ENROLLMENT_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
          encode_uuid(e.enrollment_id),
          encode_uuid(e.student_id),
          encode_uuid(e.campus_id),
          encode_uuid(e.grade_id),
          e.group_id.map(encode_uuid),
          e.academic_year,
          e.status.as_ref(),
          encode_dt(e.updated_at),
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  fn update_enrollment(&mut self, e: &Enrollment) -> CoreResult<()> {
    self
      .conn
      .execute(
        "UPDATE enrollments
         SET student_id = ?2, campus_id = ?3, grade_id = ?4, group_id = ?5,
             academic_year = ?6, status = ?7, updated_at = ?8
         WHERE enrollment_id = ?1",
        params![
          encode_uuid(e.enrollment_id),
          encode_uuid(e.student_id),
          encode_uuid(e.campus_id),
          encode_uuid(e.grade_id),
          e.group_id.map(encode_uuid),
          e.academic_year,
          e.status.as_ref(),
          encode_dt(e.updated_at),
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  fn grade(&self, grade_id: Uuid) -> CoreResult<Grade> {
    let raw = self
      .conn
      .query_row(
        "SELECT grade_id, name, level, is_terminal FROM grades WHERE grade_id = ?1",
        params![encode_uuid(grade_id)],
        |row| {
          Ok(RawGrade {
            grade_id:    row.get(0)?,
            name:        row.get(1)?,
            level:       row.get(2)?,
            is_terminal: row.get(3)?,
          })
        },
      )
      .optional()
      .map_err(db)?
      .ok_or(enrol_core::Error::GradeNotFound(grade_id))?;
    raw.into_grade().map_err(db)
  }

  fn group(&self, group_id: Uuid) -> CoreResult<Group> {
    let raw = self
      .conn
      .query_row(
        &format!("SELECT {GROUP_COLUMNS} FROM class_groups WHERE group_id = ?1"),
        params![encode_uuid(group_id)],
        RawGroup::from_row,
      )
      .optional()
      .map_err(db)?
      .ok_or(enrol_core::Error::GroupNotFound(group_id))?;
    raw.into_group().map_err(db)
  }

  fn capacity_bucket(&self, key: &BucketKey) -> CoreResult<Option<CapacityBucket>> {
    let row: Option<(u32, bool)> = self
      .conn
      .query_row(
        "SELECT capacity, active FROM capacity_buckets
         WHERE campus_id = ?1 AND grade_id = ?2 AND academic_year = ?3
           AND shift = ?4 AND modality = ?5",
        params![
          encode_uuid(key.campus_id),
          encode_uuid(key.grade_id),
          key.academic_year,
          key.shift,
          key.modality,
        ],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(db)?;
    Ok(row.map(|(capacity, active)| CapacityBucket { key: key.clone(), capacity, active }))
  }

  fn group_override(&self, group_id: Uuid) -> CoreResult<Option<GroupCapacityOverride>> {
    let row: Option<(u32, bool)> = self
      .conn
      .query_row(
        "SELECT capacity, active FROM group_capacity_overrides WHERE group_id = ?1",
        params![encode_uuid(group_id)],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(db)?;
    Ok(row.map(|(capacity, active)| GroupCapacityOverride { group_id, capacity, active }))
  }

  fn count_active_occupants(&self, group_id: Uuid, exclude: Option<Uuid>) -> CoreResult<u32> {
    self
      .conn
      .query_row(
        "SELECT COUNT(*) FROM enrollments
         WHERE group_id = ?1 AND status = 'active'
           AND (?2 IS NULL OR enrollment_id != ?2)",
        params![encode_uuid(group_id), exclude.map(encode_uuid)],
        |row| row.get(0),
      )
      .map_err(db)
  }
}

// ─── CaseLedger ──────────────────────────────────────────────────────────────

impl CaseLedger for SqlLedger<'_> {
  fn insert_case(&mut self, c: &NoveltyCase) -> CoreResult<()> {
    self
      .conn
      .execute(
        &format!(
          "INSERT INTO novelty_cases ({CASE_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
          encode_uuid(c.case_id),
          encode_uuid(c.student_id),
          encode_uuid(c.institution_id),
          c.novelty_type.as_ref(),
          c.reason_id.map(encode_uuid),
          c.status.as_ref(),
          c.radicado.as_ref().map(|r| r.number.clone()),
          c.radicado.as_ref().map(|r| r.year),
          c.radicado.as_ref().map(|r| r.sequence),
          encode_dt(c.created_at),
          encode_dt(c.requested_at),
          c.filed_at.map(encode_dt),
          c.executed_at.map(encode_dt),
          c.closed_at.map(encode_dt),
          encode_json(&c.payload),
          c.idempotency_key,
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  fn case(&self, case_id: Uuid) -> CoreResult<NoveltyCase> {
    self
      .find_case(case_id)?
      .ok_or(enrol_core::Error::CaseNotFound(case_id))
  }

  fn update_case(&mut self, c: &NoveltyCase) -> CoreResult<()> {
    let changed = self
      .conn
      .execute(
        "UPDATE novelty_cases
         SET status = ?2, radicado = ?3, radicado_year = ?4, radicado_seq = ?5,
             filed_at = ?6, executed_at = ?7, closed_at = ?8
         WHERE case_id = ?1",
        params![
          encode_uuid(c.case_id),
          c.status.as_ref(),
          c.radicado.as_ref().map(|r| r.number.clone()),
          c.radicado.as_ref().map(|r| r.year),
          c.radicado.as_ref().map(|r| r.sequence),
          c.filed_at.map(encode_dt),
          c.executed_at.map(encode_dt),
          c.closed_at.map(encode_dt),
        ],
      )
      .map_err(db)?;
    if changed == 0 {
      return Err(enrol_core::Error::CaseNotFound(c.case_id));
    }
    Ok(())
  }

  fn append_transition(&mut self, t: &CaseTransition) -> CoreResult<()> {
    self
      .conn
      .execute(
        &format!(
          "INSERT INTO case_transitions ({TRANSITION_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
          encode_uuid(t.transition_id),
          encode_uuid(t.case_id),
          t.from_status.map(|s| s.as_ref().to_owned()),
          t.to_status.as_ref(),
          t.actor_id,
          t.actor_role,
          t.comment,
          t.origin,
          encode_dt(t.recorded_at),
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  fn next_radicado_sequence(&mut self, institution_id: Uuid, year: i32) -> CoreResult<u32> {
    self
      .conn
      .query_row(
        "INSERT INTO radicado_counters (institution_id, year, last_sequence)
         VALUES (?1, ?2, 1)
         ON CONFLICT (institution_id, year)
         DO UPDATE SET last_sequence = last_sequence + 1
         RETURNING last_sequence",
        params![encode_uuid(institution_id), year],
        |row| row.get(0),
      )
      .map_err(db)
  }

  fn document_rules(&self, novelty_type: NoveltyType) -> CoreResult<Vec<DocumentRule>> {
    let mut stmt = self
      .conn
      .prepare(
        "SELECT rule_id, novelty_type, reason_id, document_type, active
         FROM document_rules WHERE novelty_type = ?1",
      )
      .map_err(db)?;
    let raws = stmt
      .query_map(params![novelty_type.as_ref()], |row| {
        Ok(RawDocumentRule {
          rule_id:       row.get(0)?,
          novelty_type:  row.get(1)?,
          reason_id:     row.get(2)?,
          document_type: row.get(3)?,
          active:        row.get(4)?,
        })
      })
      .map_err(db)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(db)?;
    raws.into_iter().map(|r| r.into_rule().map_err(db)).collect()
  }

  fn attached_document_types(&self, case_id: Uuid) -> CoreResult<BTreeSet<String>> {
    let mut stmt = self
      .conn
      .prepare("SELECT document_type FROM case_documents WHERE case_id = ?1")
      .map_err(db)?;
    stmt
      .query_map(params![encode_uuid(case_id)], |row| row.get(0))
      .map_err(db)?
      .collect::<rusqlite::Result<BTreeSet<String>>>()
      .map_err(db)
  }

  fn execution_for_case(&self, case_id: Uuid) -> CoreResult<Option<NoveltyExecution>> {
    self.find_execution("case_id", &encode_uuid(case_id))
  }

  fn execution_by_key(&self, idempotency_key: &str) -> CoreResult<Option<NoveltyExecution>> {
    self.find_execution("idempotency_key", idempotency_key)
  }

  fn insert_execution(&mut self, x: &NoveltyExecution) -> CoreResult<()> {
    self
      .conn
      .execute(
        &format!(
          "INSERT INTO novelty_executions ({EXECUTION_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
          encode_uuid(x.execution_id),
          encode_uuid(x.case_id),
          x.idempotency_key,
          x.executed_by,
          encode_dt(x.executed_at),
          encode_json(&x.before),
          encode_json(&x.after),
        ],
      )
      .map_err(db)?;
    Ok(())
  }

  fn reversion_for_case(&self, case_id: Uuid) -> CoreResult<Option<NoveltyReversion>> {
    let raw = self
      .conn
      .query_row(
        &format!("SELECT {REVERSION_COLUMNS} FROM novelty_reversions WHERE case_id = ?1"),
        params![encode_uuid(case_id)],
        RawReversion::from_row,
      )
      .optional()
      .map_err(db)?;
    raw.map(|r| r.into_reversion().map_err(db)).transpose()
  }

  fn insert_reversion(&mut self, r: &NoveltyReversion) -> CoreResult<()> {
    self
      .conn
      .execute(
        &format!(
          "INSERT INTO novelty_reversions ({REVERSION_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
          encode_uuid(r.reversion_id),
          encode_uuid(r.case_id),
          r.reverted_by,
          encode_dt(r.reverted_at),
          r.comment,
          encode_json(&r.before),
          encode_json(&r.after),
        ],
      )
      .map_err(db)?;
    Ok(())
  }
}

//! [`SqliteStore`], the SQLite implementation of [`NoveltyStore`].

use std::{path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use enrol_core::{
  capacity::{self, CapacityBucket, GroupCapacityOverride, capacity_lock_keys},
  case::{Actor, CaseStatus, CaseTransition, NewCase, NoveltyCase},
  documents::{DocumentRule, missing_required_documents},
  engine::{
    Applied,
    execute::{ExecuteRequest, execute, existing_execution},
    handlers::handler_for,
    revert::revert,
    workflow,
  },
  execution::{NoveltyExecution, NoveltyReversion},
  ledger::{CaseLedger, EnrollmentLedger},
  lock::LockService,
  notify::{LogNotifier, Notifier, announce},
  radicado::DEFAULT_PREFIX,
  school::{Enrollment, Grade, Group, Student},
  snapshot::StudentSnapshot,
  store::{ExecutionOutcome, NoveltyStore, ReversionOutcome, TransitionOutcome},
};
use rusqlite::TransactionBehavior;
use uuid::Uuid;

use crate::{
  Result,
  ledger::SqlLedger,
  lock::{LeaseLock, LeaseSettings, LockBackend},
  schema::SCHEMA,
};

/// Busy timeout applied to every connection unless overridden.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// An enrollment novelty store backed by a single SQLite file.
///
/// Clones share one connection, lock backend and notifier.
#[derive(Clone)]
pub struct SqliteStore {
  conn:            tokio_rusqlite::Connection,
  locks:           LockBackend,
  notifier:        Arc<dyn Notifier>,
  radicado_prefix: String,
}

/// What `execute_case` decided before taking any lock.
enum ExecutionPlan {
  Replay(ExecutionOutcome),
  Run { groups: Vec<Uuid>, lock_keys: Vec<String> },
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Private in-memory database with the schema applied.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let store = Self {
      conn,
      locks: LockBackend::default(),
      notifier: Arc::new(LogNotifier),
      radicado_prefix: DEFAULT_PREFIX.to_owned(),
    };
    store.set_busy_timeout(DEFAULT_BUSY_TIMEOUT).await?;
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// How long a writer waits on SQLite's lock before reporting contention.
  pub async fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(timeout)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub fn with_lock_backend(mut self, locks: LockBackend) -> Self {
    self.locks = locks;
    self
  }

  /// Switch to database leases on this store's own connection.
  pub fn with_lease_locks(self, settings: LeaseSettings) -> Self {
    let lease = LeaseLock::new(self.conn.clone(), settings);
    self.with_lock_backend(LockBackend::Lease(lease))
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_radicado_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.radicado_prefix = prefix.into();
    self
  }

  pub fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  pub fn lock_backend(&self) -> &LockBackend { &self.locks }

  // ── Units of work ─────────────────────────────────────────────────────────

  /// Run `f` inside an `IMMEDIATE` transaction, committing only if it
  /// returns `Ok`.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut SqlLedger<'_>) -> enrol_core::Result<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = f(&mut SqlLedger::new(&tx));
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?;
    Ok(outcome?)
  }

  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&SqlLedger<'_>) -> enrol_core::Result<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| Ok(f(&SqlLedger::new(conn))))
      .await?;
    Ok(outcome?)
  }

  fn announce(&self, case: &NoveltyCase, transition: Option<&CaseTransition>) {
    if let Some(transition) = transition {
      announce(&*self.notifier, case, transition);
    }
  }

  // ── Registry ──────────────────────────────────────────────────────────────

  pub async fn insert_student(&self, student: Student) -> Result<()> {
    self.write(move |l| l.insert_student(&student)).await
  }

  pub async fn get_student(&self, student_id: Uuid) -> Result<Student> {
    self.read(move |l| l.student(student_id)).await
  }

  pub async fn insert_grade(&self, grade: Grade) -> Result<()> {
    self.write(move |l| l.insert_grade(&grade)).await
  }

  pub async fn insert_group(&self, group: Group) -> Result<()> {
    self.write(move |l| l.insert_group(&group)).await
  }

  pub async fn get_group(&self, group_id: Uuid) -> Result<Group> {
    self.read(move |l| l.group(group_id)).await
  }

  pub async fn insert_enrollment(&self, enrollment: Enrollment) -> Result<()> {
    self.write(move |l| l.insert_enrollment(&enrollment)).await
  }

  pub async fn enrollments(&self, student_id: Uuid) -> Result<Vec<Enrollment>> {
    self.read(move |l| l.enrollments(student_id)).await
  }

  pub async fn student_snapshot(&self, student_id: Uuid) -> Result<StudentSnapshot> {
    self.read(move |l| StudentSnapshot::capture(l, student_id)).await
  }

  /// Insert or replace the macro bucket for its key.
  pub async fn put_capacity_bucket(&self, bucket: CapacityBucket) -> Result<()> {
    self.write(move |l| l.put_capacity_bucket(&bucket)).await
  }

  pub async fn put_group_override(&self, override_: GroupCapacityOverride) -> Result<()> {
    self.write(move |l| l.put_group_override(&override_)).await
  }

  pub async fn add_document_rule(&self, rule: DocumentRule) -> Result<()> {
    self.write(move |l| l.insert_document_rule(&rule)).await
  }

  pub async fn effective_capacity(&self, group_id: Uuid) -> Result<u32> {
    self
      .read(move |l| {
        let group = l.group(group_id)?;
        capacity::effective_capacity(l, &group)
      })
      .await
  }

  pub async fn count_active_occupants(&self, group_id: Uuid) -> Result<u32> {
    self
      .read(move |l| {
        let group = l.group(group_id)?;
        capacity::count_active_occupants(l, &group, None)
      })
      .await
  }
}

// ─── NoveltyStore impl ───────────────────────────────────────────────────────

impl NoveltyStore for SqliteStore {
  type Error = crate::Error;

  // ── Cases ─────────────────────────────────────────────────────────────────

  async fn create_case(&self, input: NewCase) -> Result<NoveltyCase> {
    let Applied { outcome, transition } = self
      .write(move |l| workflow::create_case(l, input, Utc::now()))
      .await?;
    tracing::info!(
      case_id = %outcome.case_id,
      novelty_type = %outcome.novelty_type,
      student_id = %outcome.student_id,
      "novelty case created"
    );
    self.announce(&outcome, transition.as_ref());
    Ok(outcome)
  }

  async fn get_case(&self, case_id: Uuid) -> Result<Option<NoveltyCase>> {
    self.read(move |l| l.find_case(case_id)).await
  }

  async fn delete_draft_case(&self, case_id: Uuid) -> Result<()> {
    self.write(move |l| l.delete_unfiled_case(case_id)).await?;
    tracing::info!(case_id = %case_id, "draft case deleted");
    Ok(())
  }

  async fn list_transitions(&self, case_id: Uuid) -> Result<Vec<CaseTransition>> {
    self
      .read(move |l| {
        l.case(case_id)?;
        l.transitions(case_id)
      })
      .await
  }

  // ── Workflow ──────────────────────────────────────────────────────────────

  async fn file_case(
    &self,
    case_id: Uuid,
    actor: Actor,
    comment: Option<String>,
  ) -> Result<NoveltyCase> {
    let prefix = self.radicado_prefix.clone();
    let Applied { outcome, transition } = self
      .write(move |l| {
        workflow::file_case(l, case_id, &actor, comment.as_deref(), &prefix, Utc::now())
      })
      .await?;
    tracing::info!(
      case_id = %case_id,
      radicado = outcome.radicado.as_ref().map(|r| r.number.as_str()),
      "case filed"
    );
    self.announce(&outcome, transition.as_ref());
    Ok(outcome)
  }

  async fn transition_case(
    &self,
    case_id: Uuid,
    to: CaseStatus,
    actor: Actor,
    comment: Option<String>,
  ) -> Result<TransitionOutcome> {
    if to == CaseStatus::Filed {
      let case = self.file_case(case_id, actor, comment).await?;
      return Ok(TransitionOutcome { case, missing_documents: Vec::new() });
    }
    let Applied { outcome, transition } = self
      .write(move |l| {
        workflow::transition_case(l, case_id, to, &actor, comment.as_deref(), Utc::now())
      })
      .await?;
    tracing::info!(case_id = %case_id, status = %outcome.case.status, "case transitioned");
    self.announce(&outcome.case, transition.as_ref());
    Ok(outcome)
  }

  async fn execute_case(
    &self,
    case_id: Uuid,
    actor: Actor,
    comment: Option<String>,
    idempotency_key: Option<String>,
  ) -> Result<ExecutionOutcome> {
    let requested = idempotency_key.clone();
    let plan = self
      .read(move |l| {
        if let Some(outcome) = existing_execution(l, case_id, requested.as_deref())? {
          return Ok(ExecutionPlan::Replay(outcome));
        }
        let case = l.case(case_id)?;
        if case.status != CaseStatus::Approved {
          // The engine reports the state error; nothing to lock.
          return Ok(ExecutionPlan::Run { groups: Vec::new(), lock_keys: Vec::new() });
        }
        let groups = handler_for(case.novelty_type).claimed_groups(l, &case)?;
        let mut lock_keys = Vec::new();
        for group_id in &groups {
          lock_keys.extend(capacity_lock_keys(&l.group(*group_id)?));
        }
        Ok(ExecutionPlan::Run { groups, lock_keys })
      })
      .await?;

    let (groups, lock_keys) = match plan {
      ExecutionPlan::Replay(outcome) => {
        tracing::info!(case_id = %case_id, "execution replayed");
        return Ok(outcome);
      }
      ExecutionPlan::Run { groups, lock_keys } => (groups, lock_keys),
    };

    let held = self.locks.acquire(lock_keys).await?;
    let result = self
      .write(move |l| {
        execute(l, ExecuteRequest {
          case_id,
          actor: &actor,
          comment: comment.as_deref(),
          idempotency_key: idempotency_key.as_deref(),
          locked_groups: &groups,
          now: Utc::now(),
        })
      })
      .await;
    if let Err(e) = self.locks.release(held).await {
      tracing::warn!(case_id = %case_id, error = %e, "failed to release capacity locks");
    }

    let Applied { outcome, transition } = result?;
    match &transition {
      Some(_) => tracing::info!(
        case_id = %case_id,
        execution_id = %outcome.execution.execution_id,
        idempotency_key = %outcome.execution.idempotency_key,
        "case executed"
      ),
      None => tracing::info!(case_id = %case_id, "execution replayed"),
    }
    self.announce(&outcome.case, transition.as_ref());
    Ok(outcome)
  }

  async fn revert_case(
    &self,
    case_id: Uuid,
    actor: Actor,
    comment: String,
  ) -> Result<ReversionOutcome> {
    let Applied { outcome, transition } = self
      .write(move |l| revert(l, case_id, &actor, &comment, Utc::now()))
      .await?;
    if transition.is_some() {
      tracing::info!(
        case_id = %case_id,
        reversion_id = %outcome.reversion.reversion_id,
        "case reverted"
      );
    }
    self.announce(&outcome.case, transition.as_ref());
    Ok(outcome)
  }

  async fn get_execution(&self, case_id: Uuid) -> Result<Option<NoveltyExecution>> {
    self.read(move |l| l.execution_for_case(case_id)).await
  }

  async fn get_reversion(&self, case_id: Uuid) -> Result<Option<NoveltyReversion>> {
    self.read(move |l| l.reversion_for_case(case_id)).await
  }

  // ── Documents ─────────────────────────────────────────────────────────────

  async fn attach_document(&self, case_id: Uuid, document_type: String) -> Result<()> {
    let document_type = document_type.trim().to_owned();
    if document_type.is_empty() {
      return Err(
        enrol_core::Error::InvalidPayload("document_type must not be empty".into()).into(),
      );
    }
    self
      .write(move |l| l.attach_document(case_id, &document_type))
      .await
  }

  async fn missing_documents(&self, case_id: Uuid) -> Result<Vec<String>> {
    self
      .read(move |l| {
        let case = l.case(case_id)?;
        missing_required_documents(l, &case)
      })
      .await
  }
}

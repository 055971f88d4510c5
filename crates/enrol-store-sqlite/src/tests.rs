//! Integration tests for `SqliteStore` against an in-memory database.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use enrol_core::{
  capacity::{BucketKey, CapacityBucket, GroupCapacityOverride},
  case::{Actor, CaseStatus, NewCase, NoveltyCase, NoveltyType},
  documents::DocumentRule,
  execution::derive_idempotency_key,
  lock::LockService,
  school::{Enrollment, EnrollmentStatus, Grade, Group, Student},
  snapshot::StudentSnapshot,
  store::NoveltyStore,
};
use serde_json::json;
use uuid::Uuid;

use crate::{Error, LeaseLock, LeaseSettings, SqliteStore};

// ─── Fixtures ────────────────────────────────────────────────────────────────

struct School {
  store:          SqliteStore,
  institution_id: Uuid,
  campus_id:      Uuid,
  grade:          Grade,
  final_grade:    Grade,
  year:           i32,
}

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn school() -> School { school_on(store().await).await }

async fn school_on(store: SqliteStore) -> School {
  let grade = Grade {
    grade_id:    Uuid::new_v4(),
    name:        "Seventh".into(),
    level:       7,
    is_terminal: false,
  };
  let final_grade = Grade {
    grade_id:    Uuid::new_v4(),
    name:        "Eleventh".into(),
    level:       11,
    is_terminal: true,
  };
  store.insert_grade(grade.clone()).await.unwrap();
  store.insert_grade(final_grade.clone()).await.unwrap();
  School {
    store,
    institution_id: Uuid::new_v4(),
    campus_id: Uuid::new_v4(),
    grade,
    final_grade,
    year: 2026,
  }
}

impl School {
  async fn group(&self, grade: &Grade, base_capacity: u32) -> Group {
    let group = Group {
      group_id: Uuid::new_v4(),
      campus_id: self.campus_id,
      grade_id: grade.grade_id,
      academic_year: self.year,
      shift: "morning".into(),
      modality: "in_person".into(),
      name: format!("{}-{}", grade.level, &Uuid::new_v4().to_string()[..4]),
      base_capacity,
    };
    self.store.insert_group(group.clone()).await.unwrap();
    group
  }

  /// A student with one active enrollment in `group`.
  async fn enrolled(&self, group: &Group) -> (Student, Enrollment) {
    let student = Student {
      student_id:     Uuid::new_v4(),
      institution_id: self.institution_id,
      full_name:      "Ana Torres".into(),
      user_active:    true,
    };
    self.store.insert_student(student.clone()).await.unwrap();
    let enrollment = Enrollment {
      enrollment_id: Uuid::new_v4(),
      student_id:    student.student_id,
      campus_id:     group.campus_id,
      grade_id:      group.grade_id,
      group_id:      Some(group.group_id),
      academic_year: group.academic_year,
      status:        EnrollmentStatus::Active,
      updated_at:    Utc::now(),
    };
    self.store.insert_enrollment(enrollment.clone()).await.unwrap();
    (student, enrollment)
  }

  fn new_case(
    &self,
    student: &Student,
    novelty_type: NoveltyType,
    payload: serde_json::Value,
  ) -> NewCase {
    NewCase {
      student_id: student.student_id,
      institution_id: self.institution_id,
      novelty_type: novelty_type.to_string(),
      reason_id: None,
      payload,
      idempotency_key: None,
      requested_at: None,
      actor: secretary(),
    }
  }

  /// Create, file, review and approve a case.
  async fn approved(
    &self,
    student: &Student,
    novelty_type: NoveltyType,
    payload: serde_json::Value,
  ) -> NoveltyCase {
    let s = &self.store;
    let case = s.create_case(self.new_case(student, novelty_type, payload)).await.unwrap();
    s.file_case(case.case_id, secretary(), None).await.unwrap();
    s.transition_case(case.case_id, CaseStatus::InReview, coordinator(), None)
      .await
      .unwrap();
    let outcome = s
      .transition_case(case.case_id, CaseStatus::Approved, coordinator(), None)
      .await
      .unwrap();
    assert_eq!(outcome.case.status, CaseStatus::Approved);
    outcome.case
  }
}

fn secretary() -> Actor { Actor::new("u-secretary", "secretary") }

fn coordinator() -> Actor { Actor::new("u-coordinator", "coordinator") }

fn admin() -> Actor { Actor::new("u-admin", "admin") }

fn core_err(e: Error) -> enrol_core::Error {
  match e {
    Error::Core(e) => e,
    other => panic!("expected a core error, got {other}"),
  }
}

// ─── Creation and filing ─────────────────────────────────────────────────────

#[tokio::test]
async fn create_case_starts_in_draft_with_a_creation_row() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;

  let case = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();
  assert_eq!(case.status, CaseStatus::Draft);
  assert!(case.radicado.is_none());

  let log = sc.store.list_transitions(case.case_id).await.unwrap();
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].from_status, None);
  assert_eq!(log[0].to_status, CaseStatus::Draft);
}

#[tokio::test]
async fn unknown_novelty_type_is_rejected() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let mut input = sc.new_case(&student, NoveltyType::Withdrawal, json!(null));
  input.novelty_type = "expulsion".into();

  let err = core_err(sc.store.create_case(input).await.unwrap_err());
  assert!(matches!(err, enrol_core::Error::UnknownNoveltyType(code) if code == "expulsion"));
}

#[tokio::test]
async fn filing_assigns_sequential_radicados() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;

  let mut numbers = Vec::new();
  for _ in 0..3 {
    let case = sc
      .store
      .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
      .await
      .unwrap();
    let filed = sc.store.file_case(case.case_id, secretary(), None).await.unwrap();
    assert_eq!(filed.status, CaseStatus::Filed);
    assert!(filed.filed_at.is_some());
    numbers.push(filed.radicado.unwrap());
  }

  let year = Utc::now().format("%Y").to_string();
  assert_eq!(numbers[0].number, format!("NOV-{year}-000001"));
  assert_eq!(
    numbers.iter().map(|r| r.sequence).collect::<Vec<_>>(),
    vec![1, 2, 3]
  );
}

#[tokio::test]
async fn filing_twice_is_an_invalid_transition() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();
  let first = sc.store.file_case(case.case_id, secretary(), None).await.unwrap();

  let err = core_err(sc.store.file_case(case.case_id, secretary(), None).await.unwrap_err());
  assert!(matches!(
    err,
    enrol_core::Error::InvalidTransition { from: CaseStatus::Filed, to: CaseStatus::Filed }
  ));
  let reread = sc.store.get_case(case.case_id).await.unwrap().unwrap();
  assert_eq!(reread.radicado, first.radicado);
}

#[tokio::test]
async fn transition_to_filed_goes_through_filing() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();

  let outcome = sc
    .store
    .transition_case(case.case_id, CaseStatus::Filed, secretary(), None)
    .await
    .unwrap();
  assert_eq!(outcome.case.status, CaseStatus::Filed);
  assert_eq!(outcome.case.radicado.map(|r| r.sequence), Some(1));
}

#[tokio::test]
async fn concurrent_filing_never_repeats_a_number() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let store = Arc::new(sc.store.clone());

  let mut case_ids = Vec::new();
  for _ in 0..12 {
    let case = store
      .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
      .await
      .unwrap();
    case_ids.push(case.case_id);
  }

  let tasks: Vec<_> = case_ids
    .into_iter()
    .map(|id| {
      let store = Arc::clone(&store);
      tokio::spawn(async move { store.file_case(id, secretary(), None).await })
    })
    .collect();

  let mut sequences = Vec::new();
  for task in tasks {
    let filed = task.await.unwrap().unwrap();
    sequences.push(filed.radicado.unwrap().sequence);
  }
  sequences.sort_unstable();
  assert_eq!(sequences, (1..=12).collect::<Vec<u32>>());
}

#[tokio::test]
async fn custom_radicado_prefix_is_used() {
  let sc = school().await;
  let store = sc.store.clone().with_radicado_prefix("RAD");
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();
  let filed = store.file_case(case.case_id, secretary(), None).await.unwrap();
  assert!(filed.radicado.unwrap().number.starts_with("RAD-"));
}

// ─── Transitions ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn transitions_outside_the_table_are_refused() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();

  let err = core_err(
    sc.store
      .transition_case(case.case_id, CaseStatus::Approved, coordinator(), None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(
    err,
    enrol_core::Error::InvalidTransition { from: CaseStatus::Draft, to: CaseStatus::Approved }
  ));
  assert_eq!(sc.store.list_transitions(case.case_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rejection_requires_a_comment() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();
  sc.store.file_case(case.case_id, secretary(), None).await.unwrap();

  let err = core_err(
    sc.store
      .transition_case(case.case_id, CaseStatus::Rejected, coordinator(), Some("   ".into()))
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::CommentRequired(CaseStatus::Rejected)));

  let outcome = sc
    .store
    .transition_case(
      case.case_id,
      CaseStatus::Rejected,
      coordinator(),
      Some("duplicate request".into()),
    )
    .await
    .unwrap();
  assert_eq!(outcome.case.status, CaseStatus::Rejected);

  let log = sc.store.list_transitions(case.case_id).await.unwrap();
  let last = log.last().unwrap();
  assert_eq!(last.comment.as_deref(), Some("duplicate request"));
  assert_eq!(last.actor_role, "coordinator");
}

#[tokio::test]
async fn approval_without_documents_goes_to_pending_docs() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  sc.store
    .add_document_rule(DocumentRule {
      rule_id:       Uuid::new_v4(),
      novelty_type:  NoveltyType::Withdrawal,
      reason_id:     None,
      document_type: "guardian_letter".into(),
      active:        true,
    })
    .await
    .unwrap();

  let case = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();
  sc.store.file_case(case.case_id, secretary(), None).await.unwrap();
  sc.store
    .transition_case(case.case_id, CaseStatus::InReview, coordinator(), None)
    .await
    .unwrap();

  let outcome = sc
    .store
    .transition_case(case.case_id, CaseStatus::Approved, coordinator(), None)
    .await
    .unwrap();
  assert_eq!(outcome.case.status, CaseStatus::PendingDocs);
  assert_eq!(outcome.missing_documents, vec!["guardian_letter".to_owned()]);

  sc.store
    .attach_document(case.case_id, "guardian_letter".into())
    .await
    .unwrap();
  assert!(sc.store.missing_documents(case.case_id).await.unwrap().is_empty());

  sc.store
    .transition_case(case.case_id, CaseStatus::InReview, coordinator(), None)
    .await
    .unwrap();
  let outcome = sc
    .store
    .transition_case(case.case_id, CaseStatus::Approved, coordinator(), None)
    .await
    .unwrap();
  assert_eq!(outcome.case.status, CaseStatus::Approved);
  assert!(outcome.missing_documents.is_empty());
}

#[tokio::test]
async fn executed_status_is_only_reachable_through_execute() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;

  let err = core_err(
    sc.store
      .transition_case(case.case_id, CaseStatus::Executed, coordinator(), None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::InvalidTransition { .. }));
}

// ─── Drafts ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn only_unfiled_drafts_can_be_deleted() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;

  let draft = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();
  sc.store.delete_draft_case(draft.case_id).await.unwrap();
  assert!(sc.store.get_case(draft.case_id).await.unwrap().is_none());

  let filed = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();
  sc.store.file_case(filed.case_id, secretary(), None).await.unwrap();
  let err = core_err(sc.store.delete_draft_case(filed.case_id).await.unwrap_err());
  assert!(matches!(err, enrol_core::Error::InvalidState(_)));
  assert_eq!(sc.store.list_transitions(filed.case_id).await.unwrap().len(), 2);
}

// ─── Execution ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn withdrawal_deactivates_user_and_enrollments() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, enrollment) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;

  let outcome = sc
    .store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();
  assert_eq!(outcome.case.status, CaseStatus::Executed);
  assert!(outcome.case.executed_at.is_some());

  let after = sc.store.get_student(student.student_id).await.unwrap();
  assert!(!after.user_active);
  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments[0].enrollment_id, enrollment.enrollment_id);
  assert_eq!(enrollments[0].status, EnrollmentStatus::Withdrawn);

  let before = StudentSnapshot::from_json(&outcome.execution.before).unwrap();
  assert!(before.user_active);
  assert_eq!(before.enrollments[0].status, EnrollmentStatus::Active);
}

#[tokio::test]
async fn execution_is_idempotent_per_case() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;

  let first = sc
    .store
    .execute_case(case.case_id, coordinator(), None, Some("K1".into()))
    .await
    .unwrap();
  let again = sc
    .store
    .execute_case(case.case_id, coordinator(), None, Some("K1".into()))
    .await
    .unwrap();
  let other_key = sc
    .store
    .execute_case(case.case_id, coordinator(), None, Some("K2".into()))
    .await
    .unwrap();

  assert_eq!(first.execution.idempotency_key, "K1");
  assert_eq!(again.execution.execution_id, first.execution.execution_id);
  assert_eq!(other_key.execution.execution_id, first.execution.execution_id);

  let executed_rows = sc
    .store
    .list_transitions(case.case_id)
    .await
    .unwrap()
    .into_iter()
    .filter(|t| t.to_status == CaseStatus::Executed)
    .count();
  assert_eq!(executed_rows, 1);
}

#[tokio::test]
async fn execution_key_is_derived_from_the_case_when_absent() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;

  let outcome = sc
    .store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();
  assert_eq!(outcome.execution.idempotency_key, derive_idempotency_key(case.case_id));
}

#[tokio::test]
async fn concurrent_executions_of_one_case_record_once() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;
  let store = Arc::new(sc.store.clone());

  let tasks: Vec<_> = (0..4)
    .map(|_| {
      let store = Arc::clone(&store);
      tokio::spawn(async move {
        store.execute_case(case.case_id, coordinator(), None, Some("K".into())).await
      })
    })
    .collect();

  let mut ids = Vec::new();
  for task in tasks {
    ids.push(task.await.unwrap().unwrap().execution.execution_id);
  }
  ids.dedup();
  assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn executing_an_unapproved_case_is_an_invalid_state() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc
    .store
    .create_case(sc.new_case(&student, NoveltyType::Withdrawal, json!(null)))
    .await
    .unwrap();

  let err = core_err(
    sc.store
      .execute_case(case.case_id, coordinator(), None, None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::InvalidState(_)));
  assert!(sc.store.get_execution(case.case_id).await.unwrap().is_none());
}

#[tokio::test]
async fn documents_removed_after_approval_block_execution() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;
  sc.store
    .add_document_rule(DocumentRule {
      rule_id:       Uuid::new_v4(),
      novelty_type:  NoveltyType::Withdrawal,
      reason_id:     None,
      document_type: "id_copy".into(),
      active:        true,
    })
    .await
    .unwrap();

  let err = core_err(
    sc.store
      .execute_case(case.case_id, coordinator(), None, None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::MissingDocuments(ref m) if m == &["id_copy"]));
  let reread = sc.store.get_case(case.case_id).await.unwrap().unwrap();
  assert_eq!(reread.status, CaseStatus::Approved);
}

#[tokio::test]
async fn transfer_moves_the_enrollment() {
  let sc = school().await;
  let from = sc.group(&sc.grade, 30).await;
  let to = sc.group(&sc.grade, 30).await;
  let (student, enrollment) = sc.enrolled(&from).await;
  let case = sc
    .approved(
      &student,
      NoveltyType::InternalTransfer,
      json!({ "destination_group_id": to.group_id }),
    )
    .await;

  sc.store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();
  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments[0].enrollment_id, enrollment.enrollment_id);
  assert_eq!(enrollments[0].group_id, Some(to.group_id));
  assert_eq!(sc.store.count_active_occupants(to.group_id).await.unwrap(), 1);
  assert_eq!(sc.store.count_active_occupants(from.group_id).await.unwrap(), 0);
}

#[tokio::test]
async fn transfer_into_a_full_group_changes_nothing() {
  let sc = school().await;
  let from = sc.group(&sc.grade, 30).await;
  let to = sc.group(&sc.grade, 30).await;
  sc.store
    .put_group_override(GroupCapacityOverride {
      group_id: to.group_id,
      capacity: 1,
      active:   true,
    })
    .await
    .unwrap();
  sc.enrolled(&to).await;
  let (student, _) = sc.enrolled(&from).await;
  let case = sc
    .approved(
      &student,
      NoveltyType::InternalTransfer,
      json!({ "destination_group_id": to.group_id }),
    )
    .await;

  let err = core_err(
    sc.store
      .execute_case(case.case_id, coordinator(), None, None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(
    err,
    enrol_core::Error::CapacityExceeded { capacity: 1, occupied: 1, .. }
  ));

  let reread = sc.store.get_case(case.case_id).await.unwrap().unwrap();
  assert_eq!(reread.status, CaseStatus::Approved);
  assert!(sc.store.get_execution(case.case_id).await.unwrap().is_none());
  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments[0].group_id, Some(from.group_id));
}

#[tokio::test]
async fn bucket_capacity_caps_the_group() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  sc.store
    .put_capacity_bucket(CapacityBucket {
      key:      BucketKey::for_group(&group),
      capacity: 2,
      active:   true,
    })
    .await
    .unwrap();
  assert_eq!(sc.store.effective_capacity(group.group_id).await.unwrap(), 2);

  sc.store
    .put_capacity_bucket(CapacityBucket {
      key:      BucketKey::for_group(&group),
      capacity: 2,
      active:   false,
    })
    .await
    .unwrap();
  assert_eq!(sc.store.effective_capacity(group.group_id).await.unwrap(), 30);
}

#[tokio::test]
async fn transfer_to_another_grade_is_an_invalid_destination() {
  let sc = school().await;
  let from = sc.group(&sc.grade, 30).await;
  let elsewhere = sc.group(&sc.final_grade, 30).await;
  let (student, _) = sc.enrolled(&from).await;
  let case = sc
    .approved(
      &student,
      NoveltyType::InternalTransfer,
      json!({ "destination_group_id": elsewhere.group_id }),
    )
    .await;

  let err = core_err(
    sc.store
      .execute_case(case.case_id, coordinator(), None, None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::InvalidDestination(_)));
}

#[tokio::test]
async fn last_seat_goes_to_exactly_one_transfer() {
  let sc = school().await;
  let from = sc.group(&sc.grade, 30).await;
  let to = sc.group(&sc.grade, 1).await;
  let (a, _) = sc.enrolled(&from).await;
  let (b, _) = sc.enrolled(&from).await;
  let payload = json!({ "destination_group_id": to.group_id });
  let case_a = sc.approved(&a, NoveltyType::InternalTransfer, payload.clone()).await;
  let case_b = sc.approved(&b, NoveltyType::InternalTransfer, payload).await;
  let store = Arc::new(sc.store.clone());

  let tasks: Vec<_> = [case_a.case_id, case_b.case_id]
    .into_iter()
    .map(|id| {
      let store = Arc::clone(&store);
      tokio::spawn(async move { store.execute_case(id, coordinator(), None, None).await })
    })
    .collect();

  let mut succeeded = 0;
  let mut full = 0;
  for task in tasks {
    match task.await.unwrap() {
      Ok(_) => succeeded += 1,
      Err(Error::Core(enrol_core::Error::CapacityExceeded { .. })) => full += 1,
      Err(other) => panic!("unexpected error: {other}"),
    }
  }
  assert_eq!((succeeded, full), (1, 1));
  assert_eq!(store.count_active_occupants(to.group_id).await.unwrap(), 1);
}

#[tokio::test]
async fn last_seat_holds_across_separate_connections() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("enrol.db");
  let sc = school_on(SqliteStore::open(&path).await.unwrap()).await;
  let from = sc.group(&sc.grade, 30).await;
  let to = sc.group(&sc.grade, 1).await;

  let payload = json!({ "destination_group_id": to.group_id });
  let mut case_ids = Vec::new();
  for _ in 0..5 {
    let (student, _) = sc.enrolled(&from).await;
    let case = sc
      .approved(&student, NoveltyType::InternalTransfer, payload.clone())
      .await;
    case_ids.push(case.case_id);
  }

  let (returning, _) = sc.enrolled(&from).await;
  let withdrawal = sc.approved(&returning, NoveltyType::Withdrawal, json!(null)).await;
  sc.store
    .execute_case(withdrawal.case_id, coordinator(), None, None)
    .await
    .unwrap();
  let readmission = sc
    .approved(&returning, NoveltyType::ReAdmission, json!({ "group_id": to.group_id }))
    .await;
  case_ids.push(readmission.case_id);

  let mut tasks = Vec::new();
  for case_id in case_ids {
    let store = SqliteStore::open(&path).await.unwrap();
    tasks.push(tokio::spawn(async move {
      store.execute_case(case_id, coordinator(), None, None).await
    }));
  }

  let mut succeeded = 0;
  let mut full = 0;
  for task in tasks {
    match task.await.unwrap() {
      Ok(_) => succeeded += 1,
      Err(Error::Core(enrol_core::Error::CapacityExceeded { .. })) => full += 1,
      Err(other) => panic!("unexpected error: {other}"),
    }
  }
  assert_eq!((succeeded, full), (1, 5));
  assert_eq!(sc.store.count_active_occupants(to.group_id).await.unwrap(), 1);
}

#[tokio::test]
async fn re_admission_into_a_full_group_is_refused() {
  let sc = school().await;
  let home = sc.group(&sc.grade, 30).await;
  let full = sc.group(&sc.grade, 1).await;
  sc.enrolled(&full).await;
  let (student, enrollment) = sc.enrolled(&home).await;
  let withdrawal = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;
  sc.store
    .execute_case(withdrawal.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let readmission = sc
    .approved(&student, NoveltyType::ReAdmission, json!({ "group_id": full.group_id }))
    .await;
  let err = core_err(
    sc.store
      .execute_case(readmission.case_id, coordinator(), None, None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(
    err,
    enrol_core::Error::CapacityExceeded { capacity: 1, occupied: 1, .. }
  ));

  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments.len(), 1);
  assert_eq!(enrollments[0].enrollment_id, enrollment.enrollment_id);
  assert_eq!(enrollments[0].status, EnrollmentStatus::Withdrawn);
  assert_eq!(enrollments[0].group_id, Some(home.group_id));
}

#[tokio::test]
async fn re_admission_into_another_grade_leaves_the_old_group() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, enrollment) = sc.enrolled(&group).await;
  let withdrawal = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;
  sc.store
    .execute_case(withdrawal.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let readmission = sc
    .approved(
      &student,
      NoveltyType::ReAdmission,
      json!({ "academic_year": sc.year, "grade_id": sc.final_grade.grade_id }),
    )
    .await;
  sc.store
    .execute_case(readmission.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments.len(), 1);
  assert_eq!(enrollments[0].enrollment_id, enrollment.enrollment_id);
  assert_eq!(enrollments[0].status, EnrollmentStatus::Active);
  assert_eq!(enrollments[0].grade_id, sc.final_grade.grade_id);
  assert_eq!(enrollments[0].group_id, None);
  assert_eq!(sc.store.count_active_occupants(group.group_id).await.unwrap(), 0);
}

#[tokio::test]
async fn re_admission_reactivates_the_withdrawn_enrollment() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, enrollment) = sc.enrolled(&group).await;
  let withdrawal = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;
  sc.store
    .execute_case(withdrawal.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let readmission = sc
    .approved(&student, NoveltyType::ReAdmission, json!({ "academic_year": sc.year }))
    .await;
  sc.store
    .execute_case(readmission.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments.len(), 1);
  assert_eq!(enrollments[0].enrollment_id, enrollment.enrollment_id);
  assert_eq!(enrollments[0].status, EnrollmentStatus::Active);
  assert_eq!(enrollments[0].group_id, Some(group.group_id));
  assert!(sc.store.get_student(student.student_id).await.unwrap().user_active);
}

#[tokio::test]
async fn re_admission_of_an_active_student_is_refused() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc
    .approved(&student, NoveltyType::ReAdmission, json!({ "group_id": group.group_id }))
    .await;

  let err = core_err(
    sc.store
      .execute_case(case.case_id, coordinator(), None, None)
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::InvalidState(_)));
}

#[tokio::test]
async fn graduation_requires_the_terminal_grade() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;

  let err = core_err(
    sc.store
      .create_case(sc.new_case(&student, NoveltyType::Graduation, json!(null)))
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::InvalidState(_)));
}

#[tokio::test]
async fn graduation_skips_the_document_gate() {
  let sc = school().await;
  let group = sc.group(&sc.final_grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  sc.store
    .add_document_rule(DocumentRule {
      rule_id:       Uuid::new_v4(),
      novelty_type:  NoveltyType::Graduation,
      reason_id:     None,
      document_type: "transcript".into(),
      active:        true,
    })
    .await
    .unwrap();

  let case = sc.approved(&student, NoveltyType::Graduation, json!(null)).await;
  sc.store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments[0].status, EnrollmentStatus::Graduated);
  assert!(!sc.store.get_student(student.student_id).await.unwrap().user_active);
}

// ─── Reversal ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reverting_a_transfer_restores_the_original_group() {
  let sc = school().await;
  let from = sc.group(&sc.grade, 30).await;
  let to = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&from).await;
  let case = sc
    .approved(
      &student,
      NoveltyType::InternalTransfer,
      json!({ "destination_group_id": to.group_id }),
    )
    .await;
  let executed = sc
    .store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let outcome = sc
    .store
    .revert_case(case.case_id, admin(), "transfer entered by mistake".into())
    .await
    .unwrap();
  assert_eq!(outcome.case.status, CaseStatus::Reverted);
  assert_eq!(outcome.reversion.comment, "transfer entered by mistake");

  let restored = sc.store.student_snapshot(student.student_id).await.unwrap();
  let before = StudentSnapshot::from_json(&executed.execution.before).unwrap();
  assert_eq!(restored, before);
  assert_eq!(restored.enrollments[0].group_id, Some(from.group_id));

  // The execution row stays as it was.
  let execution = sc.store.get_execution(case.case_id).await.unwrap().unwrap();
  assert_eq!(execution, executed.execution);
}

#[tokio::test]
async fn reverting_twice_returns_the_first_reversion() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;
  sc.store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let first = sc
    .store
    .revert_case(case.case_id, admin(), "wrong student".into())
    .await
    .unwrap();
  let second = sc
    .store
    .revert_case(case.case_id, admin(), "again".into())
    .await
    .unwrap();
  assert_eq!(first.reversion.reversion_id, second.reversion.reversion_id);
  assert!(sc.store.get_student(student.student_id).await.unwrap().user_active);

  let reverted_rows = sc
    .store
    .list_transitions(case.case_id)
    .await
    .unwrap()
    .into_iter()
    .filter(|t| t.to_status == CaseStatus::Reverted)
    .count();
  assert_eq!(reverted_rows, 1);
}

#[tokio::test]
async fn revert_requires_an_executed_case_and_a_comment() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&group).await;
  let case = sc.approved(&student, NoveltyType::Withdrawal, json!(null)).await;

  let err = core_err(
    sc.store
      .revert_case(case.case_id, admin(), "too early".into())
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::InvalidState(_)));

  sc.store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();
  let err = core_err(
    sc.store
      .revert_case(case.case_id, admin(), " ".into())
      .await
      .unwrap_err(),
  );
  assert!(matches!(err, enrol_core::Error::CommentRequired(CaseStatus::Reverted)));
  assert!(sc.store.get_reversion(case.case_id).await.unwrap().is_none());
}

#[tokio::test]
async fn reverted_re_admission_withdraws_the_new_enrollment() {
  let sc = school().await;
  let group = sc.group(&sc.grade, 30).await;
  let student = Student {
    student_id:     Uuid::new_v4(),
    institution_id: sc.institution_id,
    full_name:      "Luis Pardo".into(),
    user_active:    false,
  };
  sc.store.insert_student(student.clone()).await.unwrap();

  let case = sc
    .approved(&student, NoveltyType::ReAdmission, json!({ "group_id": group.group_id }))
    .await;
  sc.store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();
  assert_eq!(sc.store.count_active_occupants(group.group_id).await.unwrap(), 1);

  sc.store
    .revert_case(case.case_id, admin(), "re-admitted in error".into())
    .await
    .unwrap();
  let enrollments = sc.store.enrollments(student.student_id).await.unwrap();
  assert_eq!(enrollments.len(), 1);
  assert_eq!(enrollments[0].status, EnrollmentStatus::Withdrawn);
  assert_eq!(sc.store.count_active_occupants(group.group_id).await.unwrap(), 0);
  assert!(!sc.store.get_student(student.student_id).await.unwrap().user_active);
}

// ─── Leases ──────────────────────────────────────────────────────────────────

fn quick_leases(ttl: Duration) -> LeaseSettings {
  LeaseSettings {
    ttl,
    wait_timeout: Duration::from_millis(150),
    retry_interval: Duration::from_millis(10),
  }
}

#[tokio::test]
async fn held_lease_times_out_a_second_caller() {
  let s = store().await;
  let lock = LeaseLock::new(s.connection().clone(), quick_leases(Duration::from_secs(30)));

  let held = lock.acquire(vec!["capacity:group:g1".into()]).await.unwrap();
  let err = lock
    .acquire(vec!["capacity:group:g0".into(), "capacity:group:g1".into()])
    .await
    .unwrap_err();
  assert!(matches!(err, enrol_core::Error::LockTimeout(_)));

  // The partially acquired key was handed back.
  let g0 = lock.acquire(vec!["capacity:group:g0".into()]).await.unwrap();
  lock.release(g0).await.unwrap();

  lock.release(held).await.unwrap();
  let again = lock.acquire(vec!["capacity:group:g1".into()]).await.unwrap();
  lock.release(again).await.unwrap();
}

#[tokio::test]
async fn expired_lease_is_reclaimed() {
  let s = store().await;
  let lock = LeaseLock::new(s.connection().clone(), quick_leases(Duration::from_millis(20)));

  let _abandoned = lock.acquire(vec!["capacity:group:g1".into()]).await.unwrap();
  tokio::time::sleep(Duration::from_millis(40)).await;
  let reclaimed = lock.acquire(vec!["capacity:group:g1".into()]).await.unwrap();
  lock.release(reclaimed).await.unwrap();
}

#[tokio::test]
async fn release_continues_past_a_failed_key() {
  let s = store().await;
  let lock = LeaseLock::new(s.connection().clone(), quick_leases(Duration::from_secs(30)));
  let held = lock
    .acquire(vec!["capacity:group:a".into(), "capacity:group:b".into()])
    .await
    .unwrap();

  // "b" is released first and refuses to go.
  s.connection()
    .call(|conn| {
      conn.execute_batch(
        "CREATE TRIGGER stuck_lease BEFORE DELETE ON lock_leases
         WHEN old.lock_key = 'capacity:group:b'
         BEGIN SELECT RAISE(ABORT, 'stuck'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  assert!(lock.release(held).await.is_err());

  let remaining: Vec<String> = s
    .connection()
    .call(|conn| {
      let mut stmt = conn.prepare("SELECT lock_key FROM lock_leases ORDER BY lock_key")?;
      let keys = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
      Ok(keys)
    })
    .await
    .unwrap();
  assert_eq!(remaining, vec!["capacity:group:b".to_owned()]);
}

#[tokio::test]
async fn leases_are_shared_between_connections_to_one_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("enrol.db");
  let a = SqliteStore::open(&path).await.unwrap();
  let b = SqliteStore::open(&path).await.unwrap();
  let settings = quick_leases(Duration::from_secs(30));
  let lock_a = LeaseLock::new(a.connection().clone(), settings);
  let lock_b = LeaseLock::new(b.connection().clone(), settings);

  let held = lock_a.acquire(vec!["capacity:group:g1".into()]).await.unwrap();
  let err = lock_b
    .acquire(vec!["capacity:group:g1".into()])
    .await
    .unwrap_err();
  assert!(matches!(err, enrol_core::Error::LockTimeout(_)));
  lock_a.release(held).await.unwrap();
  let taken = lock_b.acquire(vec!["capacity:group:g1".into()]).await.unwrap();
  lock_b.release(taken).await.unwrap();
}

#[tokio::test]
async fn execution_under_lease_locks_releases_its_leases() {
  let sc = school().await;
  let store = sc.store.clone().with_lease_locks(quick_leases(Duration::from_secs(30)));
  let from = sc.group(&sc.grade, 30).await;
  let to = sc.group(&sc.grade, 30).await;
  let (student, _) = sc.enrolled(&from).await;
  let case = sc
    .approved(
      &student,
      NoveltyType::InternalTransfer,
      json!({ "destination_group_id": to.group_id }),
    )
    .await;

  store
    .execute_case(case.case_id, coordinator(), None, None)
    .await
    .unwrap();

  let leftover: i64 = store
    .connection()
    .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM lock_leases", [], |r| r.get(0))?))
    .await
    .unwrap();
  assert_eq!(leftover, 0);
}

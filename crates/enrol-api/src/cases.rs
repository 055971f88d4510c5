//! Handlers for `/cases` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/cases` | Body: [`CreateCaseBody`]; returns 201 + the draft case |
//! | `GET`    | `/cases/:id` | 404 if not found |
//! | `DELETE` | `/cases/:id` | Unfiled drafts only; 204 |
//! | `GET`    | `/cases/:id/transitions` | Oldest first |
//! | `POST`   | `/cases/:id/file` | Assigns the radicado |
//! | `POST`   | `/cases/:id/transition` | Body: `{"to":"in_review", ...}` |
//! | `POST`   | `/cases/:id/execute` | `Idempotency-Key` header or body field |
//! | `POST`   | `/cases/:id/revert` | Body: `{"comment":"..."}` (required) |
//! | `GET`    | `/cases/:id/execution` | 404 until executed |
//! | `GET`    | `/cases/:id/reversion` | 404 until reverted |
//! | `POST`   | `/cases/:id/documents` | Body: `{"document_type":"..."}`; 204 |
//! | `GET`    | `/cases/:id/documents/missing` | Required types not yet attached |

use std::sync::Arc;

use axum::{
  Extension, Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use enrol_core::{
  case::{Actor, CaseStatus, CaseTransition, NewCase, NoveltyCase},
  execution::{NoveltyExecution, NoveltyReversion},
  store::{ExecutionOutcome, NoveltyStore, ReversionOutcome, TransitionOutcome},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Actor fields accepted in any mutating request body.
#[derive(Debug, Default, Deserialize)]
pub struct ActorFields {
  pub actor_id:   Option<String>,
  pub actor_role: Option<String>,
}

impl ActorFields {
  /// A request extension set by an outer auth layer wins over the body.
  fn resolve(self, asserted: Option<Extension<Actor>>) -> Result<Actor, ApiError> {
    if let Some(Extension(actor)) = asserted {
      return Ok(actor);
    }
    match (self.actor_id, self.actor_role) {
      (Some(id), Some(role)) if !id.trim().is_empty() && !role.trim().is_empty() => {
        Ok(Actor::new(id, role))
      }
      _ => Err(ApiError::BadRequest("actor_id and actor_role are required".into())),
    }
  }
}

// ─── Create ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateCaseBody {
  pub student_id:      Uuid,
  pub institution_id:  Uuid,
  pub novelty_type:    String,
  pub reason_id:       Option<Uuid>,
  #[serde(default)]
  pub payload:         serde_json::Value,
  pub idempotency_key: Option<String>,
  pub requested_at:    Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub actor:           ActorFields,
}

/// `POST /cases`: 201 with the stored [`NoveltyCase`].
pub async fn create<S>(
  State(store): State<Arc<S>>,
  asserted: Option<Extension<Actor>>,
  Json(body): Json<CreateCaseBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: NoveltyStore,
{
  let actor = body.actor.resolve(asserted)?;
  let input = NewCase {
    student_id: body.student_id,
    institution_id: body.institution_id,
    novelty_type: body.novelty_type,
    reason_id: body.reason_id,
    payload: body.payload,
    idempotency_key: body.idempotency_key,
    requested_at: body.requested_at,
    actor,
  };
  let case = store.create_case(input).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(case)))
}

// ─── Read ────────────────────────────────────────────────────────────────────

/// `GET /cases/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<NoveltyCase>, ApiError>
where
  S: NoveltyStore,
{
  let case = store
    .get_case(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("case {id} not found")))?;
  Ok(Json(case))
}

/// `DELETE /cases/:id`
pub async fn delete_draft<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: NoveltyStore,
{
  store.delete_draft_case(id).await.map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

/// `GET /cases/:id/transitions`
pub async fn transitions<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<CaseTransition>>, ApiError>
where
  S: NoveltyStore,
{
  let log = store.list_transitions(id).await.map_err(ApiError::store)?;
  Ok(Json(log))
}

// ─── Workflow ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CommentBody {
  pub comment: Option<String>,
  #[serde(flatten)]
  pub actor:   ActorFields,
}

/// `POST /cases/:id/file`
pub async fn file<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  asserted: Option<Extension<Actor>>,
  Json(body): Json<CommentBody>,
) -> Result<Json<NoveltyCase>, ApiError>
where
  S: NoveltyStore,
{
  let actor = body.actor.resolve(asserted)?;
  let case = store
    .file_case(id, actor, body.comment)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(case))
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
  pub to:      CaseStatus,
  pub comment: Option<String>,
  #[serde(flatten)]
  pub actor:   ActorFields,
}

/// `POST /cases/:id/transition`. An approval may come back as
/// `pending_docs` with the missing document types listed.
pub async fn transition<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  asserted: Option<Extension<Actor>>,
  Json(body): Json<TransitionBody>,
) -> Result<Json<TransitionOutcome>, ApiError>
where
  S: NoveltyStore,
{
  let actor = body.actor.resolve(asserted)?;
  let outcome = store
    .transition_case(id, body.to, actor, body.comment)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
  pub comment:         Option<String>,
  pub idempotency_key: Option<String>,
  #[serde(flatten)]
  pub actor:           ActorFields,
}

/// `POST /cases/:id/execute`. Replays answer 200 with the stored execution.
pub async fn execute<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  headers: HeaderMap,
  asserted: Option<Extension<Actor>>,
  Json(body): Json<ExecuteBody>,
) -> Result<Json<ExecutionOutcome>, ApiError>
where
  S: NoveltyStore,
{
  let actor = body.actor.resolve(asserted)?;
  let header_key = headers
    .get(IDEMPOTENCY_KEY_HEADER)
    .map(|v| {
      v.to_str()
        .map(str::to_owned)
        .map_err(|_| ApiError::BadRequest("Idempotency-Key is not valid text".into()))
    })
    .transpose()?;
  let key = header_key.or(body.idempotency_key);

  let outcome = store
    .execute_case(id, actor, body.comment, key)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(outcome))
}

/// `POST /cases/:id/revert`
pub async fn revert<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  asserted: Option<Extension<Actor>>,
  Json(body): Json<CommentBody>,
) -> Result<Json<ReversionOutcome>, ApiError>
where
  S: NoveltyStore,
{
  let actor = body.actor.resolve(asserted)?;
  let outcome = store
    .revert_case(id, actor, body.comment.unwrap_or_default())
    .await
    .map_err(ApiError::store)?;
  Ok(Json(outcome))
}

/// `GET /cases/:id/execution`
pub async fn execution<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<NoveltyExecution>, ApiError>
where
  S: NoveltyStore,
{
  let execution = store
    .get_execution(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("case {id} has not been executed")))?;
  Ok(Json(execution))
}

/// `GET /cases/:id/reversion`
pub async fn reversion<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<NoveltyReversion>, ApiError>
where
  S: NoveltyStore,
{
  let reversion = store
    .get_reversion(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("case {id} has not been reverted")))?;
  Ok(Json(reversion))
}

// ─── Documents ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AttachBody {
  pub document_type: String,
}

/// `POST /cases/:id/documents`
pub async fn attach_document<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AttachBody>,
) -> Result<StatusCode, ApiError>
where
  S: NoveltyStore,
{
  store
    .attach_document(id, body.document_type)
    .await
    .map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

/// `GET /cases/:id/documents/missing`
pub async fn missing_documents<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<String>>, ApiError>
where
  S: NoveltyStore,
{
  let missing = store.missing_documents(id).await.map_err(ApiError::store)?;
  Ok(Json(missing))
}

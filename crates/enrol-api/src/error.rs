//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Workflow failures are answered with `{"error": kind, "message": text}`
//! plus `missing_documents` when the document gate refused the request.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use enrol_core::NoveltyError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// A typed workflow error raised by the engine.
  #[error("{message}")]
  Workflow {
    status:            StatusCode,
    kind:              &'static str,
    message:           String,
    missing_documents: Option<Vec<String>>,
  },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Status code for a workflow error, or `None` for internal failures.
pub fn status_for(e: &enrol_core::Error) -> Option<StatusCode> {
  use enrol_core::Error::*;
  let status = match e {
    InvalidTransition { .. } | InvalidState(_) | CapacityExceeded { .. } => StatusCode::CONFLICT,
    MissingDocuments(_)
    | CommentRequired(_)
    | InvalidPayload(_)
    | InvalidDestination(_)
    | UnknownNoveltyType(_) => StatusCode::UNPROCESSABLE_ENTITY,
    CaseNotFound(_) | StudentNotFound(_) | GroupNotFound(_) | GradeNotFound(_) => {
      StatusCode::NOT_FOUND
    }
    LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
    Serialization(_) | Backend(_) => return None,
  };
  Some(status)
}

impl ApiError {
  /// Classify a store error by the workflow error it carries, if any.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + NoveltyError + Send + Sync + 'static,
  {
    if let Some(core) = e.as_novelty()
      && let Some(status) = status_for(core)
    {
      return ApiError::Workflow {
        status,
        kind: core.kind(),
        message: core.to_string(),
        missing_documents: match core {
          enrol_core::Error::MissingDocuments(m) => Some(m.clone()),
          _ => None,
        },
      };
    }
    ApiError::Store(Box::new(e))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::NotFound(m) => {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found", "message": m })))
          .into_response()
      }
      ApiError::BadRequest(m) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad_request", "message": m })))
          .into_response()
      }
      ApiError::Workflow { status, kind, message, missing_documents } => {
        let mut body = json!({ "error": kind, "message": message });
        if let Some(missing) = missing_documents {
          body["missing_documents"] = json!(missing);
        }
        (status, Json(body)).into_response()
      }
      ApiError::Store(e) => {
        tracing::error!(error = %e, "store failure");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          Json(json!({ "error": "internal", "message": e.to_string() })),
        )
          .into_response()
      }
    }
  }
}

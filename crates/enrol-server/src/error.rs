//! Error types and axum `IntoResponse` implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized: {0}")]
  Unauthorized(String),
  #[error("forbidden: {0}")]
  Forbidden(String),
  #[error("bad request: {0}")]
  BadRequest(String),
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let (status, kind, message) = match self {
      Error::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m),
      Error::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m),
      Error::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
    };
    (status, Json(json!({ "error": kind, "message": message }))).into_response()
  }
}

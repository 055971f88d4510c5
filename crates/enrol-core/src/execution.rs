//! Execution and reversion records.
//!
//! Both are written exactly once per case and never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::case::NoveltyCase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyExecution {
  pub execution_id:    Uuid,
  pub case_id:         Uuid,
  /// Globally unique across executions.
  pub idempotency_key: String,
  pub executed_by:     String,
  pub executed_at:     DateTime<Utc>,
  pub before:          serde_json::Value,
  pub after:           serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyReversion {
  pub reversion_id: Uuid,
  pub case_id:      Uuid,
  pub reverted_by:  String,
  pub reverted_at:  DateTime<Utc>,
  pub comment:      String,
  pub before:       serde_json::Value,
  pub after:        serde_json::Value,
}

/// The key an execution is recorded under: the caller's key, else the one
/// stored on the case, else a digest of the case id. The derived key is
/// stable, so keyless retries of the same case collide on it.
pub fn effective_idempotency_key(case: &NoveltyCase, requested: Option<&str>) -> String {
  requested
    .filter(|k| !k.trim().is_empty())
    .or(case.idempotency_key.as_deref())
    .map_or_else(|| derive_idempotency_key(case.case_id), str::to_owned)
}

pub fn derive_idempotency_key(case_id: Uuid) -> String {
  let digest = Sha256::digest(format!("novelty-execution:{case_id}").as_bytes());
  hex::encode(digest)
}

//! HTTP server for the enrollment novelty engine.
//!
//! Wires the SQLite store, the lock backend and the JSON API together,
//! asserts the acting user from gateway headers, and traces every request.

pub mod auth;
pub mod error;

pub use error::Error;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use axum::{Json, Router, middleware, routing::get};
use enrol_core::{radicado::DEFAULT_PREFIX, store::NoveltyStore};
use enrol_store_sqlite::{LeaseSettings, SqliteStore};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `ENROL_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:            String,
  #[serde(default = "default_port")]
  pub port:            u16,
  #[serde(default = "default_store_path")]
  pub store_path:      PathBuf,
  #[serde(default = "default_prefix")]
  pub radicado_prefix: String,
  #[serde(default = "default_busy_timeout_ms")]
  pub busy_timeout_ms: u64,
  /// Roles allowed to revert executed cases.
  #[serde(default = "default_elevated_roles")]
  pub elevated_roles:  Vec<String>,
  #[serde(default)]
  pub lock:            LockConfig,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8080 }
fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/enrol/enrol.db") }
fn default_prefix() -> String { DEFAULT_PREFIX.into() }
fn default_busy_timeout_ms() -> u64 { 5_000 }
fn default_elevated_roles() -> Vec<String> { vec!["admin".into()] }

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
  /// In-process; enough for a single server on one database file.
  #[default]
  Local,
  /// Database leases; required when several processes share the file.
  Lease,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
  pub backend:           LockKind,
  pub lease_ttl_ms:      u64,
  pub wait_timeout_ms:   u64,
  pub retry_interval_ms: u64,
}

impl Default for LockConfig {
  fn default() -> Self {
    let lease = LeaseSettings::default();
    Self {
      backend:           LockKind::Local,
      lease_ttl_ms:      lease.ttl.as_millis() as u64,
      wait_timeout_ms:   lease.wait_timeout.as_millis() as u64,
      retry_interval_ms: lease.retry_interval.as_millis() as u64,
    }
  }
}

impl LockConfig {
  pub fn lease_settings(&self) -> LeaseSettings {
    LeaseSettings {
      ttl:            Duration::from_millis(self.lease_ttl_ms),
      wait_timeout:   Duration::from_millis(self.wait_timeout_ms),
      retry_interval: Duration::from_millis(self.retry_interval_ms),
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

/// Apply the store-related settings of `config` to an opened store.
pub async fn configure_store(
  store: SqliteStore,
  config: &ServerConfig,
) -> enrol_store_sqlite::Result<SqliteStore> {
  store
    .set_busy_timeout(Duration::from_millis(config.busy_timeout_ms))
    .await?;
  let store = store.with_radicado_prefix(config.radicado_prefix.clone());
  Ok(match config.lock.backend {
    LockKind::Local => store,
    LockKind::Lease => store.with_lease_locks(config.lock.lease_settings()),
  })
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through the router.
pub struct AppState<S> {
  pub store:  Arc<S>,
  pub config: Arc<ServerConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), config: Arc::clone(&self.config) }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the server [`Router`]: `/health` plus the case API under `/api`.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: NoveltyStore + 'static,
{
  Router::new()
    .route("/health", get(health))
    .nest("/api", enrol_api::api_router(Arc::clone(&state.store)))
    .layer(middleware::from_fn_with_state(state.config, auth::assert_actor))
    .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

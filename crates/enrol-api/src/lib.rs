//! JSON REST API for enrollment novelty cases.
//!
//! Exposes an axum [`Router`] backed by any [`enrol_core::store::NoveltyStore`].
//! Authentication and role checks are the caller's responsibility; a caller
//! that has already established who is acting may insert an
//! [`enrol_core::case::Actor`] request extension, which takes precedence
//! over the actor fields of the request body.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", enrol_api::api_router(store.clone()))
//! ```

pub mod cases;
pub mod error;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use enrol_core::store::NoveltyStore;

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: NoveltyStore + 'static,
{
  Router::new()
    .route("/cases", post(cases::create::<S>))
    .route("/cases/{id}", get(cases::get_one::<S>).delete(cases::delete_draft::<S>))
    .route("/cases/{id}/transitions", get(cases::transitions::<S>))
    // Workflow
    .route("/cases/{id}/file", post(cases::file::<S>))
    .route("/cases/{id}/transition", post(cases::transition::<S>))
    .route("/cases/{id}/execute", post(cases::execute::<S>))
    .route("/cases/{id}/revert", post(cases::revert::<S>))
    .route("/cases/{id}/execution", get(cases::execution::<S>))
    .route("/cases/{id}/reversion", get(cases::reversion::<S>))
    // Documents
    .route("/cases/{id}/documents", post(cases::attach_document::<S>))
    .route("/cases/{id}/documents/missing", get(cases::missing_documents::<S>))
    .with_state(store)
}

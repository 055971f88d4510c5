//! Actor assertion from request headers.
//!
//! An upstream gateway authenticates the user and forwards who they are in
//! `X-Actor-Id`/`X-Actor-Role`. The middleware turns those into an
//! [`Actor`] request extension, which the API prefers over any actor named
//! in the body, and refuses reversions to roles outside `elevated_roles`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
  extract::{ConnectInfo, Request, State},
  http::{HeaderMap, Method},
  middleware::Next,
  response::{IntoResponse, Response},
};
use enrol_core::case::Actor;

use crate::{ServerConfig, error::Error};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
}

/// Read the asserted actor from headers. Both headers or neither.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Option<Actor>, Error> {
  match (header_text(headers, ACTOR_ID_HEADER), header_text(headers, ACTOR_ROLE_HEADER)) {
    (Some(id), Some(role)) => Ok(Some(Actor::new(id, role))),
    (None, None) => Ok(None),
    _ => Err(Error::BadRequest(
      "X-Actor-Id and X-Actor-Role must be sent together".into(),
    )),
  }
}

/// Client address: the first `X-Forwarded-For` hop, else the peer address.
fn origin(req: &Request) -> Option<String> {
  if let Some(forwarded) = header_text(req.headers(), FORWARDED_FOR_HEADER) {
    return forwarded.split(',').next().map(|hop| hop.trim().to_owned());
  }
  req
    .extensions()
    .get::<ConnectInfo<SocketAddr>>()
    .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn is_revert(req: &Request) -> bool {
  req.method() == Method::POST && req.uri().path().trim_end_matches('/').ends_with("/revert")
}

/// Middleware: attach the header actor and gate reversions.
pub async fn assert_actor(
  State(config): State<Arc<ServerConfig>>,
  mut req: Request,
  next: Next,
) -> Response {
  let actor = match actor_from_headers(req.headers()) {
    Ok(actor) => actor,
    Err(e) => return e.into_response(),
  };
  let actor = actor.map(|a| match origin(&req) {
    Some(origin) => a.with_origin(origin),
    None => a,
  });

  if is_revert(&req) {
    let Some(actor) = &actor else {
      return Error::Unauthorized("reversions require X-Actor-Id and X-Actor-Role".into())
        .into_response();
    };
    if !config.elevated_roles.iter().any(|r| r == &actor.role) {
      tracing::warn!(actor_id = %actor.actor_id, role = %actor.role, "reversion refused");
      return Error::Forbidden(format!("role {} may not revert cases", actor.role))
        .into_response();
    }
  }

  if let Some(actor) = actor {
    req.extensions_mut().insert(actor);
  }
  next.run(req).await
}

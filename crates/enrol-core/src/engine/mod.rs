//! The synchronous workflow engine.
//!
//! Every function here runs inside one ledger (one transaction). Lock
//! acquisition, commit and notification are the caller's job; the engine
//! reports which transition it recorded so the caller can announce it after
//! commit.

pub mod execute;
pub mod handlers;
pub mod revert;
pub mod workflow;

use crate::case::CaseTransition;

/// Result of an engine call plus the transition it appended, if any.
/// Idempotent replays carry no transition.
#[derive(Debug, Clone)]
pub struct Applied<T> {
  pub outcome:    T,
  pub transition: Option<CaseTransition>,
}

impl<T> Applied<T> {
  pub fn recorded(outcome: T, transition: CaseTransition) -> Self {
    Self { outcome, transition: Some(transition) }
  }

  pub fn replayed(outcome: T) -> Self { Self { outcome, transition: None } }
}

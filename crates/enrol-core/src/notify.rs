//! Best-effort notification seam.
//!
//! Delivery lives outside the engine. Callers log a failed `notify` and
//! carry on; a notification never fails the operation that triggered it.

use serde::Serialize;
use uuid::Uuid;

use crate::case::{CaseStatus, CaseTransition, NoveltyCase};

pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

pub trait Notifier: Send + Sync {
  fn notify(
    &self,
    recipients: &[&str],
    event: &str,
    payload: &serde_json::Value,
  ) -> Result<(), NotifyError>;
}

/// Emits each notification as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(
    &self,
    recipients: &[&str],
    event: &str,
    payload: &serde_json::Value,
  ) -> Result<(), NotifyError> {
    tracing::info!(?recipients, event, %payload, "notification");
    Ok(())
  }
}

/// Payload sent when a case changes status.
#[derive(Debug, Serialize)]
pub struct StatusChanged<'a> {
  pub case_id:     Uuid,
  pub radicado:    Option<&'a str>,
  pub from_status: Option<CaseStatus>,
  pub to_status:   CaseStatus,
  pub actor_id:    &'a str,
  pub comment:     Option<&'a str>,
}

impl<'a> StatusChanged<'a> {
  pub fn new(case: &'a NoveltyCase, transition: &'a CaseTransition) -> Self {
    Self {
      case_id:     case.case_id,
      radicado:    case.radicado.as_ref().map(|r| r.number.as_str()),
      from_status: transition.from_status,
      to_status:   transition.to_status,
      actor_id:    &transition.actor_id,
      comment:     transition.comment.as_deref(),
    }
  }
}

/// Send a status-change notification to the roles interested in the new
/// status, logging instead of propagating any failure.
pub fn announce<N>(notifier: &N, case: &NoveltyCase, transition: &CaseTransition)
where
  N: Notifier + ?Sized,
{
  let recipients = transition.to_status.interested_roles();
  if recipients.is_empty() {
    return;
  }
  let payload = match serde_json::to_value(StatusChanged::new(case, transition)) {
    Ok(v) => v,
    Err(e) => {
      tracing::warn!(case_id = %case.case_id, error = %e, "could not encode notification");
      return;
    }
  };
  let event = format!("novelty_case.{}", transition.to_status);
  if let Err(e) = notifier.notify(recipients, &event, &payload) {
    tracing::warn!(case_id = %case.case_id, event = %event, error = %e, "notification failed");
  }
}

//! Required-document gate.
//!
//! Rules are keyed by novelty type and, optionally, reason. A rule with no
//! reason is a baseline that applies to every case of its type.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, case::NoveltyCase, ledger::CaseLedger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRule {
  pub rule_id:       Uuid,
  pub novelty_type:  crate::case::NoveltyType,
  pub reason_id:     Option<Uuid>,
  /// Document-type code that must be attached, e.g. `"guardian_letter"`.
  pub document_type: String,
  pub active:        bool,
}

impl DocumentRule {
  fn applies_to(&self, reason_id: Option<Uuid>) -> bool {
    self.active && (self.reason_id.is_none() || self.reason_id == reason_id)
  }
}

/// Required codes for `reason_id` not present in `attached`, sorted.
pub fn missing_from(
  rules: &[DocumentRule],
  reason_id: Option<Uuid>,
  attached: &BTreeSet<String>,
) -> Vec<String> {
  rules
    .iter()
    .filter(|r| r.applies_to(reason_id))
    .map(|r| r.document_type.as_str())
    .collect::<BTreeSet<_>>()
    .into_iter()
    .filter(|code| !attached.contains(*code))
    .map(str::to_owned)
    .collect()
}

/// Documents still missing before `case` may be approved or executed.
/// Exempt types always report an empty set.
pub fn missing_required_documents<L>(ledger: &L, case: &NoveltyCase) -> Result<Vec<String>>
where
  L: CaseLedger + ?Sized,
{
  if !case.novelty_type.requires_documents() {
    return Ok(Vec::new());
  }
  let rules = ledger.document_rules(case.novelty_type)?;
  let attached = ledger.attached_document_types(case.case_id)?;
  Ok(missing_from(&rules, case.reason_id, &attached))
}

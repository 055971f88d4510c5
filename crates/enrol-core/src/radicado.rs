//! Per-institution, per-year filing numbers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, case::NoveltyCase, ledger::CaseLedger};

pub const DEFAULT_PREFIX: &str = "NOV";

/// A filing number: `{prefix}-{year}-{sequence:06}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Radicado {
  pub number:   String,
  pub year:     i32,
  pub sequence: u32,
}

impl Radicado {
  pub fn new(prefix: &str, year: i32, sequence: u32) -> Self {
    Self { number: format!("{prefix}-{year}-{sequence:06}"), year, sequence }
  }
}

/// Draw the next number for `(institution_id, year)`.
///
/// Must run on the same ledger that persists the `filed` transition so the
/// counter increment and the case update commit together.
pub fn issue_radicado<L>(
  ledger: &mut L,
  institution_id: Uuid,
  year: i32,
  prefix: &str,
) -> Result<Radicado>
where
  L: CaseLedger + ?Sized,
{
  let sequence = ledger.next_radicado_sequence(institution_id, year)?;
  Ok(Radicado::new(prefix, year, sequence))
}

/// Assign a radicado to a case that does not have one yet.
pub fn assign_radicado<L>(
  ledger: &mut L,
  case: &mut NoveltyCase,
  year: i32,
  prefix: &str,
) -> Result<()>
where
  L: CaseLedger + ?Sized,
{
  if let Some(existing) = &case.radicado {
    return Err(Error::InvalidState(format!(
      "case {} already has radicado {}",
      case.case_id, existing.number
    )));
  }
  case.radicado = Some(issue_radicado(ledger, case.institution_id, year, prefix)?);
  Ok(())
}

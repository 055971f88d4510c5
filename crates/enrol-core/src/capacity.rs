//! Capacity resolution.
//!
//! A group's effective ceiling is the most restrictive of its own base
//! capacity, an active per-group override, and an active macro bucket for
//! its (campus, grade, year, shift, modality). Nothing here takes locks:
//! callers must hold the keys from [`capacity_lock_keys`] before running
//! [`assert_capacity_available`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, ledger::EnrollmentLedger, school::Group};

/// Identity of a macro capacity bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
  pub campus_id:     Uuid,
  pub grade_id:      Uuid,
  pub academic_year: i32,
  pub shift:         String,
  pub modality:      String,
}

impl BucketKey {
  pub fn for_group(group: &Group) -> Self {
    Self {
      campus_id:     group.campus_id,
      grade_id:      group.grade_id,
      academic_year: group.academic_year,
      shift:         group.shift.clone(),
      modality:      group.modality.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityBucket {
  pub key:      BucketKey,
  pub capacity: u32,
  pub active:   bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCapacityOverride {
  pub group_id: Uuid,
  pub capacity: u32,
  pub active:   bool,
}

/// `min(base, override if active, bucket if active)`.
pub fn resolve_capacity(
  group: &Group,
  override_: Option<&GroupCapacityOverride>,
  bucket: Option<&CapacityBucket>,
) -> u32 {
  let overridden = override_.filter(|o| o.active).map(|o| o.capacity);
  let bucketed = bucket.filter(|b| b.active).map(|b| b.capacity);

  [Some(group.base_capacity), overridden, bucketed]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(group.base_capacity)
}

pub fn effective_capacity<L>(ledger: &L, group: &Group) -> Result<u32>
where
  L: EnrollmentLedger + ?Sized,
{
  let override_ = ledger.group_override(group.group_id)?;
  let bucket = ledger.capacity_bucket(&BucketKey::for_group(group))?;
  Ok(resolve_capacity(group, override_.as_ref(), bucket.as_ref()))
}

pub fn count_active_occupants<L>(
  ledger: &L,
  group: &Group,
  exclude_enrollment: Option<Uuid>,
) -> Result<u32>
where
  L: EnrollmentLedger + ?Sized,
{
  ledger.count_active_occupants(group.group_id, exclude_enrollment)
}

/// Fails with [`Error::CapacityExceeded`] when the group has no free seat.
pub fn assert_capacity_available<L>(
  ledger: &L,
  group: &Group,
  exclude_enrollment: Option<Uuid>,
) -> Result<()>
where
  L: EnrollmentLedger + ?Sized,
{
  let capacity = effective_capacity(ledger, group)?;
  let occupied = count_active_occupants(ledger, group, exclude_enrollment)?;
  if occupied >= capacity {
    return Err(Error::CapacityExceeded {
      group_id: group.group_id,
      capacity,
      occupied,
    });
  }
  Ok(())
}

/// Lock keys guarding a group's capacity, sorted for acquisition.
pub fn capacity_lock_keys(group: &Group) -> Vec<String> {
  let mut keys = vec![
    format!(
      "capacity:bucket:{}:{}:{}:{}:{}",
      group.campus_id, group.grade_id, group.academic_year, group.shift, group.modality
    ),
    format!("capacity:group:{}", group.group_id),
  ];
  keys.sort();
  keys
}

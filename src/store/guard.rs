//! Per-zone schedule invariants shared by every backend.
//!
//! All entries of a zone share one schedule type, and no two enabled entries
//! of a zone claim the same slot.

use crate::entry::{EntryId, ScheduleEntry};
use crate::error::{ClimateError, Result};

/// Checks `candidate` against the zone's `existing` entries. An entry being
/// updated is passed in `existing` too and skipped by id.
pub fn check(candidate: &ScheduleEntry, existing: &[ScheduleEntry], replacing: Option<EntryId>) -> Result<()> {
    let others = existing
        .iter()
        .filter(|e| e.zone == candidate.zone && Some(e.id) != replacing);

    for other in others {
        if other.schedule_type() != candidate.schedule_type() {
            return Err(ClimateError::InvalidScheduleEntry(format!(
                "zone {} already uses {} schedules (entry {}); remove them before adding {}",
                candidate.zone,
                other.schedule_type(),
                other.id,
                candidate.schedule_type()
            )));
        }
        if candidate.enabled && other.enabled && other.slot_key() == candidate.slot_key() {
            return Err(ClimateError::InvalidScheduleEntry(format!(
                "zone {} already has entry {} at {} {}",
                candidate.zone,
                other.id,
                candidate.day,
                candidate.time.format("%H:%M")
            )));
        }
    }
    Ok(())
}

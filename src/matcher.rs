use crate::entry::{EntryId, ScheduleEntry};
use crate::error::{ClimateError, Result};
use crate::slot::SlotGrid;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use climate_protocol::ZoneId;
use serde::Serialize;

/// The entry picked for a zone at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Selection {
    pub entry: EntryId,
    /// Local date the slot belongs to. Differs from the instant's date only
    /// for a lookback selection.
    pub date: NaiveDate,
    pub slot: NaiveTime,
    pub temperature: f64,
}

/// Picks at most one temperature for a zone at a local instant.
///
/// The instant is floored to the grid, then the applicable enabled entry with
/// the latest time at or before it wins. A value set at 08:00 therefore stays
/// in effect until the next entry of the same day; before the first entry of
/// the day nothing is selected and the last applied value stays.
#[derive(Debug, Clone, Copy)]
pub struct MatchEngine {
    grid: SlotGrid,
}

impl MatchEngine {
    pub fn new(grid: SlotGrid) -> MatchEngine {
        MatchEngine { grid }
    }

    pub fn grid(&self) -> SlotGrid {
        self.grid
    }

    pub fn select(
        &self,
        zone: ZoneId,
        entries: &[ScheduleEntry],
        instant: NaiveDateTime,
    ) -> Result<Option<Selection>> {
        check_single_type(zone, entries)?;
        let slot = self.grid.floor(instant.time());
        latest_on(zone, entries, instant.date(), Some(slot))
    }

    /// Like [`select`](Self::select), but when nothing applies yet today the
    /// last entry of the previous day carries over.
    pub fn select_with_lookback(
        &self,
        zone: ZoneId,
        entries: &[ScheduleEntry],
        instant: NaiveDateTime,
    ) -> Result<Option<Selection>> {
        if let Some(found) = self.select(zone, entries, instant)? {
            return Ok(Some(found));
        }
        match instant.date().pred_opt() {
            Some(yesterday) => latest_on(zone, entries, yesterday, None),
            None => Ok(None),
        }
    }
}

fn check_single_type(zone: ZoneId, entries: &[ScheduleEntry]) -> Result<()> {
    let mut enabled = entries.iter().filter(|e| e.enabled && e.zone == zone);
    if let Some(first) = enabled.next() {
        if let Some(other) = enabled.find(|e| e.schedule_type() != first.schedule_type()) {
            return Err(ClimateError::DataIntegrityViolation {
                zone,
                detail: format!(
                    "entry {} is {} but entry {} is {}",
                    first.id,
                    first.schedule_type(),
                    other.id,
                    other.schedule_type()
                ),
            });
        }
    }
    Ok(())
}

fn latest_on(
    zone: ZoneId,
    entries: &[ScheduleEntry],
    date: NaiveDate,
    not_after: Option<NaiveTime>,
) -> Result<Option<Selection>> {
    let weekday = date.weekday();
    let mut best: Vec<&ScheduleEntry> = Vec::new();
    for entry in entries.iter().filter(|e| {
        e.enabled
            && e.zone == zone
            && e.day.applies_on(weekday)
            && not_after.map_or(true, |limit| e.time <= limit)
    }) {
        match best.first().map(|current| current.time) {
            Some(time) if entry.time < time => {}
            Some(time) if entry.time == time => best.push(entry),
            _ => best = vec![entry],
        }
    }

    match best.as_slice() {
        [] => Ok(None),
        [entry] => Ok(Some(Selection {
            entry: entry.id,
            date,
            slot: entry.time,
            temperature: entry.temperature,
        })),
        [first, second, ..] => Err(ClimateError::DataIntegrityViolation {
            zone,
            detail: format!(
                "entries {} and {} both claim {} {}",
                first.id,
                second.id,
                date,
                first.time.format("%H:%M")
            ),
        }),
    }
}

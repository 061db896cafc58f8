use super::{guard, ModeStore, ScheduleStore};
use crate::entry::{EntryId, EntryUpdate, NewScheduleEntry, ScheduleEntry};
use crate::error::{ClimateError, Result, StoreError};
use crate::mode::TrackedMode;
use async_trait::async_trait;
use chrono::Weekday;
use climate_protocol::ZoneId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// Volatile store for tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
}

#[derive(Default)]
struct MemoryState {
    next_id: EntryId,
    entries: BTreeMap<EntryId, ScheduleEntry>,
    modes: BTreeMap<ZoneId, TrackedMode>,
    timezone: Option<String>,
}

impl MemoryState {
    fn zone_entries(&self, zone: ZoneId) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> =
            self.entries.values().filter(|e| e.zone == zone).cloned().collect();
        entries.sort_by_key(|e| (e.time, e.id));
        entries
    }

    fn insert(&mut self, new: NewScheduleEntry) -> Result<ScheduleEntry> {
        let candidate = new.into_entry(self.next_id + 1);
        guard::check(&candidate, &self.zone_entries(candidate.zone), None)?;
        self.next_id = candidate.id;
        self.entries.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// While offline every call fails as an unreachable backend would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Stores `entry` as given, skipping every invariant check. Stands in
    /// for rows damaged outside the store's control.
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&self, entry: ScheduleEntry) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(entry.id);
        state.entries.insert(entry.id, entry);
    }

    fn state(&self) -> Result<parking_lot::MutexGuard<'_, MemoryState>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()).into());
        }
        Ok(self.state.lock())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_entry(&self, entry: NewScheduleEntry) -> Result<ScheduleEntry> {
        self.state()?.insert(entry)
    }

    async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<ScheduleEntry> {
        let mut state = self.state()?;
        let current = state.entries.get(&id).ok_or(ClimateError::NotFound(id))?;
        let updated = update.apply_to(current);
        guard::check(&updated, &state.zone_entries(updated.zone), Some(id))?;
        state.entries.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_entry(&self, id: EntryId) -> Result<bool> {
        Ok(self.state()?.entries.remove(&id).is_some())
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<ScheduleEntry>> {
        Ok(self.state()?.entries.get(&id).cloned())
    }

    async fn entries(&self, zone: ZoneId) -> Result<Vec<ScheduleEntry>> {
        Ok(self.state()?.zone_entries(zone))
    }

    async fn enabled_entries(&self, zone: ZoneId) -> Result<Vec<ScheduleEntry>> {
        let mut entries = self.state()?.zone_entries(zone);
        entries.retain(|e| e.enabled);
        Ok(entries)
    }

    async fn enabled_entries_on(&self, zone: ZoneId, day: Weekday) -> Result<Vec<ScheduleEntry>> {
        let mut entries = self.state()?.zone_entries(zone);
        entries.retain(|e| e.enabled && e.day.applies_on(day));
        Ok(entries)
    }

    async fn clear_zone(&self, zone: ZoneId) -> Result<usize> {
        let mut state = self.state()?;
        let before = state.entries.len();
        state.entries.retain(|_, e| e.zone != zone);
        Ok(before - state.entries.len())
    }

    async fn replace_zone(&self, zone: ZoneId, entries: Vec<NewScheduleEntry>) -> Result<Vec<ScheduleEntry>> {
        if let Some(stray) = entries.iter().find(|e| e.zone != zone) {
            return Err(ClimateError::InvalidScheduleEntry(format!(
                "entry for zone {} in schedule of zone {}",
                stray.zone, zone
            )));
        }
        let mut state = self.state()?;
        // Build on a copy so a rejected entry leaves the old schedule intact.
        let mut staged = MemoryState {
            next_id: state.next_id,
            entries: state.entries.clone(),
            modes: BTreeMap::new(),
            timezone: None,
        };
        staged.entries.retain(|_, e| e.zone != zone);
        let created = entries
            .into_iter()
            .map(|e| staged.insert(e))
            .collect::<Result<Vec<_>>>()?;
        state.next_id = staged.next_id;
        state.entries = staged.entries;
        Ok(created)
    }

    async fn zones(&self) -> Result<Vec<ZoneId>> {
        let zones: BTreeSet<ZoneId> = self
            .state()?
            .entries
            .values()
            .filter(|e| e.enabled)
            .map(|e| e.zone)
            .collect();
        Ok(zones.into_iter().collect())
    }

    async fn timezone(&self) -> Result<Option<String>> {
        Ok(self.state()?.timezone.clone())
    }

    async fn set_timezone(&self, timezone: Option<&str>) -> Result<()> {
        self.state()?.timezone = timezone.map(str::to_owned);
        Ok(())
    }
}

#[async_trait]
impl ModeStore for MemoryStore {
    async fn load_modes(&self) -> Result<Vec<(ZoneId, TrackedMode)>> {
        Ok(self.state()?.modes.iter().map(|(z, m)| (*z, *m)).collect())
    }

    async fn save_mode(&self, zone: ZoneId, mode: TrackedMode) -> Result<()> {
        self.state()?.modes.insert(zone, mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::DaySelector;
    use chrono::NaiveTime;

    fn new_entry(zone: u32, day: DaySelector, h: u32, temperature: f64) -> NewScheduleEntry {
        NewScheduleEntry {
            zone: ZoneId(zone),
            day,
            time: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            temperature,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn exclusivity_until_zone_is_cleared() -> Result<()> {
        let store = MemoryStore::new();
        store.create_entry(new_entry(1, DaySelector::AllDay, 8, 20.0)).await?;
        let err = store.create_entry(new_entry(1, DaySelector::Weekend, 9, 21.0)).await;
        assert!(matches!(err, Err(ClimateError::InvalidScheduleEntry(_))));

        assert_eq!(store.clear_zone(ZoneId(1)).await?, 1);
        let created = store.create_entry(new_entry(1, DaySelector::Weekend, 9, 21.0)).await?;
        assert_eq!(created.day, DaySelector::Weekend);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_slot_rejected_unless_disabled() -> Result<()> {
        let store = MemoryStore::new();
        let first = store.create_entry(new_entry(1, DaySelector::AllDay, 8, 20.0)).await?;
        assert!(store.create_entry(new_entry(1, DaySelector::AllDay, 8, 22.0)).await.is_err());

        store.update_entry(first.id, EntryUpdate { enabled: Some(false), ..Default::default() }).await?;
        let second = store.create_entry(new_entry(1, DaySelector::AllDay, 8, 22.0)).await?;
        // Re-enabling the old one would now collide.
        let err = store.update_entry(first.id, EntryUpdate { enabled: Some(true), ..Default::default() }).await;
        assert!(err.is_err());
        assert_eq!(store.enabled_entries(ZoneId(1)).await?, vec![second]);
        Ok(())
    }

    #[tokio::test]
    async fn replace_zone_is_all_or_nothing() -> Result<()> {
        let store = MemoryStore::new();
        store.create_entry(new_entry(1, DaySelector::AllDay, 8, 20.0)).await?;

        let bad = vec![
            new_entry(1, DaySelector::Weekday, 7, 21.0),
            new_entry(1, DaySelector::Weekday, 7, 22.0),
        ];
        assert!(store.replace_zone(ZoneId(1), bad).await.is_err());
        assert_eq!(store.entries(ZoneId(1)).await?.len(), 1);

        let good = vec![
            new_entry(1, DaySelector::Weekday, 7, 21.0),
            new_entry(1, DaySelector::Weekend, 9, 22.0),
        ];
        let created = store.replace_zone(ZoneId(1), good).await?;
        assert_eq!(created.len(), 2);
        assert!(store.entries(ZoneId(1)).await?.iter().all(|e| e.day != DaySelector::AllDay));
        Ok(())
    }

    #[tokio::test]
    async fn day_query_and_zone_listing() -> Result<()> {
        let store = MemoryStore::new();
        store.create_entry(new_entry(1, DaySelector::Weekday, 7, 21.0)).await?;
        store.create_entry(new_entry(1, DaySelector::Weekend, 9, 22.0)).await?;
        let mut off = new_entry(2, DaySelector::AllDay, 9, 18.0);
        off.enabled = false;
        store.create_entry(off).await?;

        let saturday = store.enabled_entries_on(ZoneId(1), Weekday::Sat).await?;
        assert_eq!(saturday.len(), 1);
        assert_eq!(saturday[0].day, DaySelector::Weekend);
        assert_eq!(store.zones().await?, vec![ZoneId(1)]);
        Ok(())
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.zones().await,
            Err(ClimateError::Store(StoreError::Unavailable(_)))
        ));
        store.set_offline(false);
        assert!(store.zones().await.is_ok());
    }
}

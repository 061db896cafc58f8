//! Operator-facing facade over the scheduling core.
//!
//! [`ClimateService`] owns the shared pieces (store, mode tracker, controller
//! gate, time source) and hands out the two long-running tasks,
//! [`SchedulerLoop`] and [`ChangeReconciler`], wired to the same state.

use crate::config::ClimateConfig;
use crate::controller::ControllerGate;
use crate::entry::{EntryId, EntryRules, EntryUpdate, NewScheduleEntry, ScheduleEntry, ScheduleType};
use crate::error::{ClimateError, Result};
use crate::matcher::{MatchEngine, Selection};
use crate::mode::{ModeTracker, TrackedMode, ZoneGuard};
use crate::reconciler::ChangeReconciler;
use crate::scheduler::SchedulerLoop;
use crate::store::{ModeStore, ScheduleStore};
use crate::time_source::{Clock, TimeSource};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use climate_protocol::{ClimateController, DeviceMode, ZoneId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStatus {
    pub zone: ZoneId,
    pub mode: TrackedMode,
    /// What the device itself is set to.
    pub device_mode: DeviceMode,
    pub schedule_type: Option<ScheduleType>,
    pub entries: usize,
    pub pending_write_at: Option<DateTime<Utc>>,
    pub outstanding_writes: u32,
    pub last_applied: Option<Selection>,
    /// What the schedule selects right now.
    pub scheduled: Option<Selection>,
    pub schedule_error: Option<String>,
}

pub struct ClimateService {
    config: ClimateConfig,
    rules: EntryRules,
    engine: MatchEngine,
    store: Arc<dyn ScheduleStore>,
    modes: Arc<dyn ModeStore>,
    tracker: Arc<ModeTracker>,
    controller: ControllerGate,
    time: Arc<TimeSource>,
}

impl ClimateService {
    /// Builds the service over one backend that stores both schedules and modes.
    pub async fn open<S>(
        config: ClimateConfig,
        store: Arc<S>,
        controller: Arc<dyn ClimateController>,
        clock: Arc<dyn Clock>,
    ) -> Result<ClimateService>
    where
        S: ScheduleStore + ModeStore + 'static,
    {
        ClimateService::open_with(config, store.clone(), store, controller, clock).await
    }

    /// Restores persisted modes, so zones that were in AUTO before a restart
    /// catch up on the scheduler's first tick.
    pub async fn open_with(
        config: ClimateConfig,
        store: Arc<dyn ScheduleStore>,
        modes: Arc<dyn ModeStore>,
        controller: Arc<dyn ClimateController>,
        clock: Arc<dyn Clock>,
    ) -> Result<ClimateService> {
        let rules = config.validate()?;
        let sched = &config.scheduler;
        let window = chrono::Duration::seconds(sched.attribution_window().as_secs() as i64);

        let persisted = modes.load_modes().await?;
        info!(zones = persisted.len(), "restored zone modes");
        let tracker = Arc::new(ModeTracker::with_modes(window, persisted));
        let time = Arc::new(TimeSource::new(clock, store.clone(), sched.timezone_cache_ttl()));
        let controller = ControllerGate::new(controller, sched.controller_timeout());

        Ok(ClimateService {
            engine: MatchEngine::new(rules.grid),
            rules,
            store,
            modes,
            tracker,
            controller,
            time,
            config,
        })
    }

    pub fn rules(&self) -> EntryRules {
        self.rules
    }

    pub fn tracker(&self) -> &Arc<ModeTracker> {
        &self.tracker
    }

    pub fn scheduler(&self) -> SchedulerLoop {
        SchedulerLoop::new(
            self.store.clone(),
            self.tracker.clone(),
            self.controller.clone(),
            self.time.clone(),
            self.engine,
            self.config.scheduler.tick(),
        )
    }

    pub fn reconciler(&self) -> ChangeReconciler {
        ChangeReconciler::new(self.tracker.clone(), self.store.clone(), self.modes.clone())
    }

    // Queries

    /// Zones with a schedule or a tracked mode.
    pub async fn zones(&self) -> Result<Vec<ZoneId>> {
        let mut zones: BTreeSet<ZoneId> = self.store.zones().await?.into_iter().collect();
        zones.extend(self.tracker.zones());
        Ok(zones.into_iter().collect())
    }

    pub async fn zone_status(&self, zone: ZoneId) -> Result<ZoneStatus> {
        let entries = self.store.entries(zone).await?;
        let now = self.time.local_now().await.naive_local();
        let (scheduled, schedule_error) = match self.engine.select(zone, &entries, now) {
            Ok(selection) => (selection, None),
            Err(e) => (None, Some(e.to_string())),
        };
        let state = self.tracker.snapshot(zone);
        Ok(ZoneStatus {
            zone,
            mode: state.mode,
            device_mode: state.mode.rendered(),
            schedule_type: entries.first().map(ScheduleEntry::schedule_type),
            entries: entries.len(),
            pending_write_at: state.pending_write_at(),
            outstanding_writes: state.pending.map_or(0, |p| p.outstanding),
            last_applied: state.last_applied,
            scheduled,
            schedule_error,
        })
    }

    /// What the schedule selects for `zone` at a local instant. Pure preview;
    /// nothing is written.
    pub async fn scheduled_temperature(&self, zone: ZoneId, at: NaiveDateTime) -> Result<Option<Selection>> {
        let entries = self.store.enabled_entries(zone).await?;
        self.engine.select(zone, &entries, at)
    }

    pub async fn current_scheduled_temperature(&self, zone: ZoneId) -> Result<Option<Selection>> {
        let now = self.time.local_now().await.naive_local();
        self.scheduled_temperature(zone, now).await
    }

    // Commands

    /// Switches a zone's tracked mode and commands the device. Entering AUTO
    /// applies the current slot before returning; on any failure the previous
    /// mode is restored.
    pub async fn set_mode(&self, zone: ZoneId, mode: TrackedMode) -> Result<Option<Selection>> {
        let mut state = self.tracker.lock(zone).await;
        let previous = state.request(mode);

        let applied = match self.enter_mode(&mut state, zone, mode).await {
            Ok(applied) => applied,
            Err(e) => {
                state.mode = previous;
                warn!(zone = %zone, mode = %mode, error = %e, "mode change failed");
                return Err(e);
            }
        };
        info!(zone = %zone, from = %previous, to = %mode, "zone mode set");

        if let Err(e) = self.modes.save_mode(zone, mode).await {
            warn!(zone = %zone, mode = %mode, error = %e, "failed to persist mode");
        }
        Ok(applied)
    }

    async fn enter_mode(&self, state: &mut ZoneGuard, zone: ZoneId, mode: TrackedMode) -> Result<Option<Selection>> {
        let auto = mode == TrackedMode::Auto;
        if auto {
            state.mark_scheduled_write(self.time.now_utc(), self.tracker.window());
        }
        if let Err(e) = self.controller.set_mode(zone, mode.rendered()).await {
            if auto {
                state.withdraw_scheduled_write();
            }
            return Err(e);
        }
        if !auto {
            return Ok(None);
        }

        let Some(selection) = self.auto_selection(zone).await? else {
            return Ok(None);
        };
        state.mark_scheduled_write(self.time.now_utc(), self.tracker.window());
        if let Err(e) = self.controller.apply_temperature(zone, selection.temperature).await {
            state.withdraw_scheduled_write();
            return Err(e);
        }
        state.last_applied = Some(selection);
        info!(zone = %zone, temperature = selection.temperature, "applied schedule on entering AUTO");
        Ok(Some(selection))
    }

    async fn auto_selection(&self, zone: ZoneId) -> Result<Option<Selection>> {
        let now = self.time.local_now().await.naive_local();
        let entries = self.store.enabled_entries(zone).await?;
        if self.config.scheduler.auto_entry_lookback {
            self.engine.select_with_lookback(zone, &entries, now)
        } else {
            self.engine.select(zone, &entries, now)
        }
    }

    pub async fn reconfigure_timezone(&self, name: Option<&str>) -> Result<Tz> {
        self.time.reconfigure(name).await
    }

    pub async fn timezone(&self) -> Tz {
        self.time.timezone().await
    }

    // Schedule CRUD

    pub async fn create_entry(&self, entry: NewScheduleEntry) -> Result<ScheduleEntry> {
        self.rules.check_new(&entry)?;
        let created = self.store.create_entry(entry).await?;
        info!(zone = %created.zone, entry = created.id, day = %created.day, "schedule entry created");
        Ok(created)
    }

    pub async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<ScheduleEntry> {
        let current = self.get_entry(id).await?;
        let candidate = update.apply_to(&current);
        self.rules.check(candidate.time, candidate.temperature)?;
        self.store.update_entry(id, update).await
    }

    pub async fn delete_entry(&self, id: EntryId) -> Result<()> {
        if self.store.delete_entry(id).await? {
            Ok(())
        } else {
            Err(ClimateError::NotFound(id))
        }
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<ScheduleEntry> {
        self.store.get_entry(id).await?.ok_or(ClimateError::NotFound(id))
    }

    pub async fn list_entries(&self, zone: ZoneId) -> Result<Vec<ScheduleEntry>> {
        self.store.entries(zone).await
    }

    pub async fn clear_zone(&self, zone: ZoneId) -> Result<usize> {
        let removed = self.store.clear_zone(zone).await?;
        info!(zone = %zone, removed, "zone schedule cleared");
        Ok(removed)
    }

    pub async fn replace_zone(&self, zone: ZoneId, entries: Vec<NewScheduleEntry>) -> Result<Vec<ScheduleEntry>> {
        for entry in &entries {
            self.rules.check_new(entry)?;
        }
        self.store.replace_zone(zone, entries).await
    }
}

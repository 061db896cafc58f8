//! The periodic driver.
//!
//! Each tick resolves the local time, matches every zone's schedule and
//! applies the selected temperature to zones in AUTO. A write is marked on
//! the zone's state before the controller is called and under the same
//! zone lock, so the device's echo can never be seen before its marker.

use crate::controller::ControllerGate;
use crate::error::{ClimateError, Result};
use crate::matcher::MatchEngine;
use crate::mode::{ModeTracker, TrackedMode};
use crate::store::ScheduleStore;
use crate::time_source::TimeSource;
use chrono::{Datelike, NaiveDateTime, Timelike};
use climate_protocol::ZoneId;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Added to every sleep so a tick never lands just before its boundary.
const TICK_SLACK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub applied: usize,
    /// Nothing selected, or the selection was already applied.
    pub unchanged: usize,
    /// Zones not in AUTO.
    pub skipped: usize,
    pub failed: usize,
    /// The zone list could not be read; no zone was looked at.
    pub degraded: bool,
    /// Shutdown was requested before every zone was visited.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZoneOutcome {
    Applied,
    Unchanged,
    Skipped,
}

pub struct SchedulerLoop {
    store: Arc<dyn ScheduleStore>,
    tracker: Arc<ModeTracker>,
    controller: ControllerGate,
    time: Arc<TimeSource>,
    engine: MatchEngine,
    period: Duration,
}

impl SchedulerLoop {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        tracker: Arc<ModeTracker>,
        controller: ControllerGate,
        time: Arc<TimeSource>,
        engine: MatchEngine,
        period: Duration,
    ) -> SchedulerLoop {
        SchedulerLoop { store, tracker, controller, time, engine, period }
    }

    /// Runs one catch-up tick right away, then one per period aligned to the
    /// local wall clock, until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            period_secs = self.period.as_secs(),
            slot_minutes = self.engine.grid().minutes(),
            "scheduler started"
        );

        let mut summary = self.tick(&cancel).await;
        while !summary.interrupted {
            let delay = self.until_next_tick().await;
            debug!(delay_ms = delay.as_millis() as u64, "scheduler sleeping");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            summary = self.tick(&cancel).await;
        }
        info!("scheduler stopped");
    }

    /// Visits every zone once. Per-zone failures are counted and logged,
    /// never propagated.
    pub async fn tick(&self, cancel: &CancellationToken) -> TickSummary {
        let mut summary = TickSummary::default();
        if cancel.is_cancelled() {
            summary.interrupted = true;
            return summary;
        }

        let now = self.time.local_now().await.naive_local();
        let zones = match self.store.zones().await {
            Ok(zones) => zones,
            Err(e) => {
                error!(error = %e, "cannot list zones, skipping tick");
                summary.degraded = true;
                return summary;
            }
        };

        for zone in zones {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            match self.run_zone(zone, now).await {
                Ok(ZoneOutcome::Applied) => summary.applied += 1,
                Ok(ZoneOutcome::Unchanged) => summary.unchanged += 1,
                Ok(ZoneOutcome::Skipped) => summary.skipped += 1,
                Err(e @ ClimateError::DataIntegrityViolation { .. }) => {
                    error!(zone = %zone, error = %e, "schedule integrity violation, zone skipped");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(zone = %zone, error = %e, "scheduled apply failed, retrying next tick");
                    summary.failed += 1;
                }
            }
        }

        if summary.applied > 0 || summary.failed > 0 {
            info!(
                local = %now,
                applied = summary.applied,
                unchanged = summary.unchanged,
                skipped = summary.skipped,
                failed = summary.failed,
                "tick done"
            );
        } else {
            debug!(local = %now, unchanged = summary.unchanged, skipped = summary.skipped, "tick done");
        }
        summary
    }

    async fn run_zone(&self, zone: ZoneId, now: NaiveDateTime) -> Result<ZoneOutcome> {
        let entries = self.store.enabled_entries_on(zone, now.weekday()).await?;
        let Some(selection) = self.engine.select(zone, &entries, now)? else {
            return Ok(ZoneOutcome::Unchanged);
        };

        let mut state = self.tracker.lock(zone).await;
        if state.mode != TrackedMode::Auto {
            return Ok(ZoneOutcome::Skipped);
        }
        let written_at = self.time.now_utc();
        state.expire(written_at, self.tracker.window());
        if state.last_applied == Some(selection) {
            return Ok(ZoneOutcome::Unchanged);
        }

        state.mark_scheduled_write(written_at, self.tracker.window());
        match self.controller.apply_temperature(zone, selection.temperature).await {
            Ok(()) => {
                state.last_applied = Some(selection);
                info!(
                    zone = %zone,
                    temperature = selection.temperature,
                    slot = %selection.slot.format("%H:%M"),
                    entry = selection.entry,
                    "applied scheduled temperature"
                );
                Ok(ZoneOutcome::Applied)
            }
            Err(e) => {
                state.withdraw_scheduled_write();
                Err(e)
            }
        }
    }

    /// Time until the next multiple of the period on the local wall clock.
    async fn until_next_tick(&self) -> Duration {
        let local = self.time.local_now().await.naive_local().time();
        let period_ms = (self.period.as_millis() as u64).max(1);
        let elapsed_ms = u64::from(local.num_seconds_from_midnight()) * 1000
            + u64::from(local.nanosecond() / 1_000_000);
        Duration::from_millis(period_ms - elapsed_ms % period_ms) + TICK_SLACK
    }
}

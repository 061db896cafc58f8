//! Per-zone control mode and change attribution.
//!
//! Every zone owns one [`ZoneModeState`] behind its own async mutex. The
//! scheduler, the reconciler and operator commands all take that lock, so
//! work on one zone is serialized while different zones never wait on each
//! other. Status queries read a copy published whenever a lock is released.

use crate::matcher::Selection;
use chrono::{DateTime, Duration, Utc};
use climate_protocol::{DeviceMode, DeviceReport, ZoneId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedMode {
    Off,
    #[default]
    Heat,
    Auto,
}

impl TrackedMode {
    /// What a two-state device is told. AUTO heats.
    pub fn rendered(self) -> DeviceMode {
        match self {
            TrackedMode::Off => DeviceMode::Off,
            TrackedMode::Heat | TrackedMode::Auto => DeviceMode::Heat,
        }
    }

    pub fn from_device(mode: DeviceMode) -> TrackedMode {
        match mode {
            DeviceMode::Off => TrackedMode::Off,
            DeviceMode::Heat => TrackedMode::Heat,
        }
    }

    /// Code kept in the `zone_modes` table.
    pub fn code(self) -> i64 {
        match self {
            TrackedMode::Off => 0,
            TrackedMode::Heat => 1,
            TrackedMode::Auto => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<TrackedMode> {
        match code {
            0 => Some(TrackedMode::Off),
            1 => Some(TrackedMode::Heat),
            3 => Some(TrackedMode::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for TrackedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackedMode::Off => "off",
            TrackedMode::Heat => "heat",
            TrackedMode::Auto => "auto",
        })
    }
}

impl FromStr for TrackedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(TrackedMode::Off),
            "heat" => Ok(TrackedMode::Heat),
            "auto" => Ok(TrackedMode::Auto),
            other => Err(format!("unknown mode {:?}", other)),
        }
    }
}

/// Scheduler writes whose echoes have not been seen yet. A burst of writes
/// shares one marker: reports are attributed from the first write onwards and
/// the window runs from the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingWrite {
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
    pub outstanding: u32,
}

impl PendingWrite {
    fn covers(&self, at: DateTime<Utc>, window: Duration) -> bool {
        at >= self.first_at && at - self.last_at <= window
    }
}

/// Who caused an observed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// Inside the window of a pending scheduler write.
    Scheduled,
    /// Flagged as an echo by the report channel itself.
    Echo,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub attribution: Attribution,
    pub from: TrackedMode,
    pub to: TrackedMode,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn left_auto(&self) -> bool {
        self.from == TrackedMode::Auto && self.to != TrackedMode::Auto
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneModeState {
    pub mode: TrackedMode,
    pub pending: Option<PendingWrite>,
    /// Slot last applied by the scheduler while in AUTO.
    pub last_applied: Option<Selection>,
}

impl ZoneModeState {
    pub fn with_mode(mode: TrackedMode) -> ZoneModeState {
        ZoneModeState { mode, ..Default::default() }
    }

    pub fn pending_write_at(&self) -> Option<DateTime<Utc>> {
        self.pending.map(|p| p.last_at)
    }

    /// Called right before the scheduler commands the device. A marker whose
    /// window has already passed is replaced, not extended.
    pub fn mark_scheduled_write(&mut self, at: DateTime<Utc>, window: Duration) {
        self.pending = Some(match self.pending {
            Some(p) if at - p.last_at <= window => PendingWrite {
                first_at: p.first_at.min(at),
                last_at: p.last_at.max(at),
                outstanding: p.outstanding + 1,
            },
            _ => PendingWrite { first_at: at, last_at: at, outstanding: 1 },
        });
    }

    /// Takes back the marker of a write that never reached the device.
    pub fn withdraw_scheduled_write(&mut self) {
        self.pending = match self.pending {
            Some(p) if p.outstanding > 1 => Some(PendingWrite { outstanding: p.outstanding - 1, ..p }),
            _ => None,
        };
    }

    /// Drops a marker whose window has passed.
    pub fn expire(&mut self, now: DateTime<Utc>, window: Duration) {
        if self.pending.is_some_and(|p| now - p.last_at > window) {
            self.pending = None;
        }
    }

    /// Switches to an operator-requested mode. The last applied slot and any
    /// marker left from before are dropped so AUTO always starts fresh.
    pub fn request(&mut self, mode: TrackedMode) -> TrackedMode {
        let previous = self.mode;
        self.mode = mode;
        self.pending = None;
        self.last_applied = None;
        previous
    }

    /// Folds a device report into the tracked state.
    pub fn observe(&mut self, report: &DeviceReport, window: Duration) -> Transition {
        let from = self.mode;
        let reported = report.reported_mode();

        // The scheduler only ever renders AUTO as heat, so "off" cannot be an echo of it.
        let attribution = if from == TrackedMode::Auto && reported == Some(DeviceMode::Off) {
            Attribution::External
        } else {
            self.attribute(report, window)
        };

        self.mode = match (from, attribution, reported) {
            (TrackedMode::Auto, Attribution::Scheduled | Attribution::Echo, _) => TrackedMode::Auto,
            (TrackedMode::Auto, Attribution::External, None) => TrackedMode::Heat,
            (_, _, Some(mode)) => TrackedMode::from_device(mode),
            (mode, _, None) => mode,
        };
        if self.mode != TrackedMode::Auto {
            self.pending = None;
            self.last_applied = None;
        }

        Transition { attribution, from, to: self.mode }
    }

    fn attribute(&mut self, report: &DeviceReport, window: Duration) -> Attribution {
        let echo = report.source_is_echo == Some(true);
        let Some(pending) = self.pending else {
            return if echo { Attribution::Echo } else { Attribution::External };
        };

        if pending.covers(report.at, window) {
            self.withdraw_scheduled_write();
            return Attribution::Scheduled;
        }
        if report.at > pending.last_at {
            // Past the window: the write's echo is not coming any more.
            self.pending = None;
        }
        if echo {
            Attribution::Echo
        } else {
            Attribution::External
        }
    }
}

struct ZoneSlot {
    state: Arc<Mutex<ZoneModeState>>,
    published: RwLock<ZoneModeState>,
}

impl ZoneSlot {
    fn new(state: ZoneModeState) -> ZoneSlot {
        ZoneSlot { published: RwLock::new(state.clone()), state: Arc::new(Mutex::new(state)) }
    }
}

/// Exclusive access to one zone's state. The state is published to readers
/// when the guard is dropped, so queries never wait on a device call.
pub struct ZoneGuard {
    state: OwnedMutexGuard<ZoneModeState>,
    slot: Arc<ZoneSlot>,
}

impl Deref for ZoneGuard {
    type Target = ZoneModeState;

    fn deref(&self) -> &ZoneModeState {
        &self.state
    }
}

impl DerefMut for ZoneGuard {
    fn deref_mut(&mut self) -> &mut ZoneModeState {
        &mut self.state
    }
}

impl Drop for ZoneGuard {
    fn drop(&mut self) {
        *self.slot.published.write() = (*self.state).clone();
    }
}

/// Owns the [`ZoneModeState`] of every zone.
pub struct ModeTracker {
    zones: RwLock<HashMap<ZoneId, Arc<ZoneSlot>>>,
    window: Duration,
}

impl ModeTracker {
    pub fn new(window: Duration) -> ModeTracker {
        ModeTracker { zones: RwLock::new(HashMap::new()), window }
    }

    /// Seeds zones with modes persisted by an earlier run.
    pub fn with_modes<I>(window: Duration, modes: I) -> ModeTracker
    where
        I: IntoIterator<Item = (ZoneId, TrackedMode)>,
    {
        let zones = modes
            .into_iter()
            .map(|(zone, mode)| (zone, Arc::new(ZoneSlot::new(ZoneModeState::with_mode(mode)))))
            .collect();
        ModeTracker { zones: RwLock::new(zones), window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn slot(&self, zone: ZoneId) -> Arc<ZoneSlot> {
        if let Some(slot) = self.zones.read().get(&zone) {
            return slot.clone();
        }
        self.zones
            .write()
            .entry(zone)
            .or_insert_with(|| Arc::new(ZoneSlot::new(ZoneModeState::default())))
            .clone()
    }

    /// Exclusive access to one zone. Unknown zones start in HEAT.
    pub async fn lock(&self, zone: ZoneId) -> ZoneGuard {
        let slot = self.slot(zone);
        let state = slot.state.clone().lock_owned().await;
        ZoneGuard { state, slot }
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        self.zones.read().contains_key(&zone)
    }

    pub fn current_mode(&self, zone: ZoneId) -> TrackedMode {
        self.snapshot(zone).mode
    }

    /// State as of the last released lock. Untracked zones read as the
    /// default and are not added.
    pub fn snapshot(&self, zone: ZoneId) -> ZoneModeState {
        match self.zones.read().get(&zone) {
            Some(slot) => slot.published.read().clone(),
            None => ZoneModeState::default(),
        }
    }

    pub fn zones(&self) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = self.zones.read().keys().copied().collect();
        zones.sort();
        zones
    }
}

//! Folds asynchronous device reports into the mode tracker.

use crate::mode::{Attribution, ModeTracker, Transition};
use crate::store::{ModeStore, ScheduleStore};
use climate_protocol::{DeviceReport, ZoneId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ChangeReconciler {
    tracker: Arc<ModeTracker>,
    schedules: Arc<dyn ScheduleStore>,
    modes: Arc<dyn ModeStore>,
    device_zones: HashSet<ZoneId>,
}

impl ChangeReconciler {
    pub fn new(
        tracker: Arc<ModeTracker>,
        schedules: Arc<dyn ScheduleStore>,
        modes: Arc<dyn ModeStore>,
    ) -> ChangeReconciler {
        ChangeReconciler { tracker, schedules, modes, device_zones: HashSet::new() }
    }

    /// Zones with a configured device; their reports are always accepted.
    pub fn with_device_zones<I>(mut self, zones: I) -> ChangeReconciler
    where
        I: IntoIterator<Item = ZoneId>,
    {
        self.device_zones.extend(zones);
        self
    }

    /// A report is only folded in for a zone that is already tracked, has a
    /// device or has a schedule. Anything else would start tracking a zone
    /// nobody configured.
    pub async fn accepts(&self, zone: ZoneId) -> bool {
        if self.tracker.contains(zone) || self.device_zones.contains(&zone) {
            return true;
        }
        match self.schedules.entries(zone).await {
            Ok(entries) => !entries.is_empty(),
            Err(e) => {
                warn!(zone = %zone, error = %e, "cannot check zone schedule, accepting report");
                true
            }
        }
    }

    /// Applies one report under the zone lock. A report that arrives while
    /// the scheduler is still writing waits for that write to be marked.
    pub async fn handle(&self, report: &DeviceReport) -> Transition {
        let mut state = self.tracker.lock(report.zone).await;
        let transition = state.observe(report, self.tracker.window());

        if transition.left_auto() {
            info!(
                zone = %report.zone,
                to = %transition.to,
                observed = ?report.observed,
                "external change, zone left AUTO"
            );
        } else {
            debug!(
                zone = %report.zone,
                attribution = ?transition.attribution,
                mode = %transition.to,
                "device report"
            );
        }

        if transition.changed() {
            if let Err(e) = self.modes.save_mode(report.zone, transition.to).await {
                warn!(zone = %report.zone, mode = %transition.to, error = %e, "failed to persist mode");
            }
        }
        if transition.attribution == Attribution::Scheduled && state.pending.is_none() {
            debug!(zone = %report.zone, "all scheduled writes acknowledged");
        }
        transition
    }

    /// Consumes reports until cancelled or until every sender is gone.
    pub async fn run(self, mut reports: mpsc::Receiver<DeviceReport>, cancel: CancellationToken) {
        info!("change reconciler started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("change reconciler cancelled");
                    break;
                }
                report = reports.recv() => match report {
                    Some(report) => {
                        if self.accepts(report.zone).await {
                            self.handle(&report).await;
                        } else {
                            warn!(zone = %report.zone, observed = ?report.observed, "report for unknown zone ignored");
                        }
                    }
                    None => {
                        warn!("report channel closed, change reconciler stopping");
                        break;
                    }
                },
            }
        }
    }
}

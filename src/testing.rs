//! Fakes shared by unit tests.

use async_trait::async_trait;
use climate_protocol::{ClimateController, ControllerError, DeviceMode, ZoneId};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Call {
    Temperature(ZoneId, f64),
    Mode(ZoneId, DeviceMode),
}

#[derive(Default)]
pub struct RecordingController {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingController {
    pub fn new() -> RecordingController {
        RecordingController::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn temperatures(&self) -> Vec<(ZoneId, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Temperature(zone, t) => Some((zone, t)),
                Call::Mode(..) => None,
            })
            .collect()
    }

    async fn record(&self, call: Call) -> Result<(), ControllerError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let zone = match call {
            Call::Temperature(zone, _) | Call::Mode(zone, _) => zone,
        };
        if *self.failing.lock() {
            return Err(ControllerError::Unreachable { zone, reason: "test failure".into() });
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl ClimateController for RecordingController {
    async fn apply_temperature(&self, zone: ZoneId, celsius: f64) -> Result<(), ControllerError> {
        self.record(Call::Temperature(zone, celsius)).await
    }

    async fn set_mode(&self, zone: ZoneId, mode: DeviceMode) -> Result<(), ControllerError> {
        self.record(Call::Mode(zone, mode)).await
    }
}

/// Wall clock pinned to tokio's clock, so paused-time tests move both together.
pub struct PausedClock {
    base: chrono::DateTime<chrono::Utc>,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub fn new(base: chrono::DateTime<chrono::Utc>) -> PausedClock {
        PausedClock { base, start: tokio::time::Instant::now() }
    }
}

impl crate::time_source::Clock for PausedClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        let elapsed = tokio::time::Instant::now() - self.start;
        self.base + chrono::Duration::from_std(elapsed).unwrap()
    }
}

use crate::error::{ClimateError, Result};
use climate_protocol::{ClimateController, DeviceMode, ZoneId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONTROLLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounds every controller call by a timeout and maps failures into
/// [`ClimateError`]. Calls are never retried here; the next tick does that.
#[derive(Clone)]
pub struct ControllerGate {
    inner: Arc<dyn ClimateController>,
    timeout: Duration,
}

impl ControllerGate {
    pub fn new(inner: Arc<dyn ClimateController>, timeout: Duration) -> ControllerGate {
        ControllerGate { inner, timeout }
    }

    pub async fn apply_temperature(&self, zone: ZoneId, celsius: f64) -> Result<()> {
        self.bounded(zone, self.inner.apply_temperature(zone, celsius)).await
    }

    pub async fn set_mode(&self, zone: ZoneId, mode: DeviceMode) -> Result<()> {
        self.bounded(zone, self.inner.set_mode(zone, mode)).await
    }

    async fn bounded<F>(&self, zone: ZoneId, call: F) -> Result<()>
    where
        F: Future<Output = Result<(), climate_protocol::ControllerError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ClimateError::ControllerUnavailable { zone, source }),
            Err(_) => Err(ClimateError::ControllerTimeout { zone, after: self.timeout }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingController;

    #[tokio::test(start_paused = true)]
    async fn slow_controller_times_out() {
        let controller = Arc::new(RecordingController::new());
        controller.set_delay(Duration::from_secs(30));
        let gate = ControllerGate::new(controller, Duration::from_secs(5));
        let err = gate.apply_temperature(ZoneId(1), 20.0).await;
        assert!(matches!(err, Err(ClimateError::ControllerTimeout { zone: ZoneId(1), .. })));
    }

    #[tokio::test]
    async fn controller_error_is_wrapped() {
        let controller = Arc::new(RecordingController::new());
        controller.set_failing(true);
        let gate = ControllerGate::new(controller.clone(), Duration::from_secs(5));
        let err = gate.set_mode(ZoneId(2), DeviceMode::Heat).await;
        assert!(matches!(err, Err(ClimateError::ControllerUnavailable { zone: ZoneId(2), .. })));

        controller.set_failing(false);
        gate.apply_temperature(ZoneId(2), 21.0).await.unwrap();
        assert_eq!(controller.temperatures(), vec![(ZoneId(2), 21.0)]);
    }
}

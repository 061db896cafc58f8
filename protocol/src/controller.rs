use crate::device::{DeviceMode, ZoneId};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("no device endpoint configured for zone {0}")]
    UnknownZone(ZoneId),

    #[error("device for zone {zone} unreachable: {reason}")]
    Unreachable { zone: ZoneId, reason: String },

    #[error("device for zone {zone} rejected the command: {reason}")]
    Rejected { zone: ZoneId, reason: String },
}

/// Commands a zone's physical device.
///
/// Both calls are idempotent. Implementations do not retry; the caller decides
/// whether a failed command is worth repeating.
#[async_trait]
pub trait ClimateController: Send + Sync {
    /// Set the target temperature without touching the mode.
    async fn apply_temperature(&self, zone: ZoneId, celsius: f64) -> Result<(), ControllerError>;

    async fn set_mode(&self, zone: ZoneId, mode: DeviceMode) -> Result<(), ControllerError>;
}

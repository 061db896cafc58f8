use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an independently controlled climate zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The only two modes a device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Off,
    Heat,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceMode::Off => "off",
            DeviceMode::Heat => "heat",
        })
    }
}

/// What a device saw change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Observation {
    Temperature(f64),
    Mode(DeviceMode),
}

/// Asynchronous report of a change observed on a zone's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub zone: ZoneId,
    pub observed: Observation,
    pub at: DateTime<Utc>,
    // Some channels can tell their own echoes apart; most cannot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_is_echo: Option<bool>,
}

impl DeviceReport {
    pub fn reported_mode(&self) -> Option<DeviceMode> {
        match self.observed {
            Observation::Mode(mode) => Some(mode),
            Observation::Temperature(_) => None,
        }
    }
}

/// Datagram sent to a zone's device endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    SetTemperature { zone: ZoneId, celsius: f64 },
    SetMode { zone: ZoneId, mode: DeviceMode },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn report_wire_shape() -> anyhow::Result<()> {
        let report = DeviceReport {
            zone: ZoneId(3),
            observed: Observation::Mode(DeviceMode::Heat),
            at: Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 3).unwrap(),
            source_is_echo: None,
        };
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["zone"], 3);
        assert_eq!(json["observed"]["kind"], "mode");
        assert_eq!(json["observed"]["value"], "heat");
        assert!(json.get("source_is_echo").is_none());
        Ok(())
    }

    #[test]
    fn temperature_report_has_no_mode() -> anyhow::Result<()> {
        let report: DeviceReport = serde_json::from_str(
            r#"{"zone":1,"observed":{"kind":"temperature","value":21.5},"at":"2025-01-06T08:05:00Z","source_is_echo":false}"#,
        )?;
        assert_eq!(report.reported_mode(), None);
        assert_eq!(report.source_is_echo, Some(false));
        Ok(())
    }

    #[test]
    fn command_is_tagged() -> anyhow::Result<()> {
        let cmd = DeviceCommand::SetTemperature { zone: ZoneId(2), celsius: 20.5 };
        let json = serde_json::to_value(&cmd)?;
        assert_eq!(json["command"], "set_temperature");
        assert_eq!(json["celsius"], 20.5);
        Ok(())
    }
}

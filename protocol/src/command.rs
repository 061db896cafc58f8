use crate::controller::{ClimateController, ControllerError};
use crate::device::{DeviceCommand, DeviceMode, ZoneId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::net::UdpSocket;
use tracing::debug;

pub const DEFAULT_DEVICE_PORT: u16 = 4210;

/// Appends the default device port when `host` carries none.
pub fn endpoint(host: &str) -> String {
    let has_port = host
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if has_port {
        host.to_owned()
    } else {
        format!("{}:{}", host, DEFAULT_DEVICE_PORT)
    }
}

pub async fn send_command(addr: &str, cmd: &DeviceCommand) -> anyhow::Result<()> {
    let udp = UdpSocket::bind("0.0.0.0:0").await?;
    let out_bytes = serde_json::to_vec(cmd)?;
    udp.send_to(&out_bytes, addr).await?;
    Ok(())
}

/// Fire-and-forget JSON datagrams, one endpoint per zone.
///
/// A command counts as delivered once the datagram leaves the socket; the
/// device confirms asynchronously through its report channel.
pub struct UdpController {
    endpoints: HashMap<ZoneId, String>,
}

impl UdpController {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = (ZoneId, S)>,
        S: AsRef<str>,
    {
        UdpController {
            endpoints: endpoints
                .into_iter()
                .map(|(zone, host)| (zone, endpoint(host.as_ref())))
                .collect(),
        }
    }

    pub fn zones(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.endpoints.keys().copied()
    }

    async fn send(&self, zone: ZoneId, cmd: DeviceCommand) -> Result<(), ControllerError> {
        let addr = self
            .endpoints
            .get(&zone)
            .ok_or(ControllerError::UnknownZone(zone))?;
        send_command(addr, &cmd)
            .await
            .map_err(|e| ControllerError::Unreachable { zone, reason: format!("{:#}", e) })?;
        debug!(%zone, %addr, ?cmd, "device command sent");
        Ok(())
    }
}

#[async_trait]
impl ClimateController for UdpController {
    async fn apply_temperature(&self, zone: ZoneId, celsius: f64) -> Result<(), ControllerError> {
        if !celsius.is_finite() {
            return Err(ControllerError::Rejected {
                zone,
                reason: format!("non-finite temperature {}", celsius),
            });
        }
        self.send(zone, DeviceCommand::SetTemperature { zone, celsius }).await
    }

    async fn set_mode(&self, zone: ZoneId, mode: DeviceMode) -> Result<(), ControllerError> {
        self.send(zone, DeviceCommand::SetMode { zone, mode }).await
    }
}

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use climate_protocol::{DeviceMode, DeviceReport, Observation, ZoneId};
use tokio::net::UdpSocket;

/// Sends one device report datagram, as a thermostat would.
#[derive(Parser, Debug)]
#[command(name = "climate-report")]
struct Args {
    /// Report listener address.
    #[arg(long, default_value = "127.0.0.1:4211")]
    to: String,

    zone: u32,

    /// A temperature such as `21.5`, or `off` / `heat`.
    observed: String,

    /// Mark the report as an echo of a scheduler write.
    #[arg(long)]
    echo: bool,
}

fn parse_observation(text: &str) -> Result<Observation> {
    match text {
        "off" => Ok(Observation::Mode(DeviceMode::Off)),
        "heat" => Ok(Observation::Mode(DeviceMode::Heat)),
        other => {
            let t: f64 = other.parse().with_context(|| format!("Unknown observation: {}", other))?;
            if !t.is_finite() {
                bail!("Temperature must be finite");
            }
            Ok(Observation::Temperature(t))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let report = DeviceReport {
        zone: ZoneId(args.zone),
        observed: parse_observation(&args.observed)?,
        at: Utc::now(),
        source_is_echo: args.echo.then_some(true),
    };
    let payload = serde_json::to_vec(&report)?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .send_to(&payload, &args.to)
        .await
        .with_context(|| format!("Failed to send to {}", args.to))?;
    println!("Sent {} -> {}", String::from_utf8_lossy(&payload), args.to);
    Ok(())
}

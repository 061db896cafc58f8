use anyhow::{Context, Result};
use climate_protocol::ZoneId;
use climate_scheduler::config::ClimateConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Whole server configuration. The scheduling tables (`[scheduler]`,
/// `[temperature]`) sit at the top level next to the server's own.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub climate: ClimateConfig,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub web: WebSettings,
    #[serde(default)]
    pub devices: DeviceSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("climate.db")
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSettings {
    #[serde(default = "default_web_bind")]
    pub bind: String,
}

fn default_web_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for WebSettings {
    fn default() -> Self {
        WebSettings { bind: default_web_bind() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_report_bind")]
    pub report_bind: String,
    /// Zone number to device host, e.g. `"1" = "esp8266-relay0.local"`.
    #[serde(default)]
    pub zones: BTreeMap<String, String>,
}

fn default_report_bind() -> String {
    "0.0.0.0:4211".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings { report_bind: default_report_bind(), zones: BTreeMap::new() }
    }
}

impl DeviceSettings {
    pub fn endpoints(&self) -> Result<Vec<(ZoneId, String)>> {
        self.zones
            .iter()
            .map(|(zone, host)| {
                let zone: u32 = zone
                    .parse()
                    .with_context(|| format!("device zone {:?} is not a zone number", zone))?;
                Ok((ZoneId(zone), host.clone()))
            })
            .collect()
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
        let Some(path) = path else {
            return Ok(ServerConfig::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

use crate::{ConversionConfig, ExpectedIdentity, DEFAULT_ADDRESS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settings for one monitored device, usually loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_bus")]
    pub bus: String,
    #[serde(default = "default_address")]
    pub address: u8,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Fail startup when the identification registers differ.
    #[serde(default)]
    pub expect: Option<ExpectedIdentity>,
}

fn default_bus() -> String {
    "mock0".to_string()
}

fn default_address() -> u8 {
    DEFAULT_ADDRESS
}

fn default_settle_ms() -> u64 {
    500
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            address: default_address(),
            conversion: ConversionConfig::default(),
            settle_ms: default_settle_ms(),
            interval_ms: default_interval_ms(),
            expect: None,
        }
    }
}

impl MonitorConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

pub fn parse_config(raw: &str) -> anyhow::Result<MonitorConfig> {
    let cfg: MonitorConfig = serde_yaml::from_str(raw).context("parsing monitor config")?;
    if cfg.address > i2c_transport::BusAddress::MAX {
        anyhow::bail!("address 0x{:02X} is not a 7-bit I2C address", cfg.address);
    }
    Ok(cfg)
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<MonitorConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("loading config: {}", path.display()))
}

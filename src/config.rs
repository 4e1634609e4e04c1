use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::decode::ByteOrder;
use crate::gatt::SENSOR_SERVICE;
use crate::link::LinkConfig;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/airsense/relay.toml";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sink_url: String,
    pub listen: SocketAddr,
    pub byte_order: ByteOrder,
    /// Per-step timeout for connect, discovery and subscribe. 0 disables it.
    pub step_timeout_secs: u64,
    pub rescan_backoff_ms: u64,
    pub rescan_backoff_max_ms: u64,
    pub adapter_index: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sink_url: "http://localhost:3000".to_string(),
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            byte_order: ByteOrder::Native,
            step_timeout_secs: 30,
            rescan_backoff_ms: 0,
            rescan_backoff_max_ms: 30_000,
            adapter_index: 0,
        }
    }
}

impl Config {
    /// Read the TOML file at `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&txt).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(txt)?;
        if cfg.sink_url.trim().is_empty() {
            cfg.sink_url = Self::default().sink_url;
        }
        Ok(cfg)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            service: SENSOR_SERVICE,
            byte_order: self.byte_order,
            backoff_base: Duration::from_millis(self.rescan_backoff_ms),
            backoff_max: Duration::from_millis(self.rescan_backoff_max_ms),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = home::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

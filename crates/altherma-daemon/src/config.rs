//! Configuration loading

use altherma_core::ChannelId;
use altherma_discovery::{DiscoveryConfig, DEFAULT_MAX_GROUPS};
use altherma_m2m::transport::{DEFAULT_ORIGINATOR, DEFAULT_TIMEOUT_MS};
use altherma_m2m::{Endpoint, TransportConfig, DEFAULT_PORT};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::poller::PollSchedule;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Adapter host name or address
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds before the first poll cycle
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            poll_interval_secs: default_poll_interval(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}

fn default_host() -> String {
    "Altherma.home".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval() -> u64 {
    60
}

fn default_initial_delay() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Wait for a correlated response before a query times out
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_originator")]
    pub originator: String,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
            originator: default_originator(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_originator() -> String {
    DEFAULT_ORIGINATOR.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// Upper bound on the top-level group scan
    #[serde(default = "default_max_groups")]
    pub max_groups: u32,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            max_groups: default_max_groups(),
        }
    }
}

fn default_max_groups() -> u32 {
    DEFAULT_MAX_GROUPS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Channels with a consumer; absent means every channel
    #[serde(default)]
    pub linked: Option<Vec<String>>,
}

impl Config {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.device.host.clone(), self.device.port)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.transport.request_timeout_ms),
            originator: self.transport.originator.clone(),
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            max_groups: self.discovery.max_groups,
        }
    }

    pub fn schedule(&self) -> PollSchedule {
        PollSchedule {
            interval: Duration::from_secs(self.device.poll_interval_secs.max(1)),
            initial_delay: Duration::from_secs(self.device.initial_delay_secs),
        }
    }

    /// Parsed linked channel set; malformed ids are skipped
    pub fn linked_channels(&self) -> Option<HashSet<ChannelId>> {
        let linked = self.channels.linked.as_ref()?;
        let ids = linked
            .iter()
            .filter_map(|raw| match raw.parse::<ChannelId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(channel = %raw, error = %e, "Ignoring malformed linked channel");
                    None
                }
            })
            .collect();
        Some(ids)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

//! Configuration file support for lacd.
//!
//! Loads and validates the daemon configuration from TOML. Every field has
//! a default, so an empty file yields a working single-aggregator setup.
//! Default location: /etc/lacd/lacd.toml

use crate::error::{LacError, LacResult};
use crate::port::{LacpMode, LacpTimeout};
use crate::{DEFAULT_ADMIN_KEY, DEFAULT_PRIORITY, MAX_AGGRS, MAX_PORTS};
use lac_types::{Duplex, LinkInfo, LinkSpeed, MacAddress};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/lacd/lacd.toml";

/// System-wide LACP parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Actor system priority
    #[serde(default = "default_priority")]
    pub priority: u16,

    /// Collector max delay advertised in every LACPDU, in tens of
    /// microseconds
    #[serde(default = "default_collector_max_delay")]
    pub collector_max_delay: u16,

    /// Fixed system id; when absent the address of port 1 is used
    #[serde(default)]
    pub system_id: Option<MacAddress>,
}

/// Aggregators created at start-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_initial_count")]
    pub initial_count: u16,

    /// Names are `<prefix><n>` for n = 0, 1, ...
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

/// Clock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Period of the global timer walk in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Period of the full link status sweep in seconds
    #[serde(default = "default_link_check_interval")]
    pub link_check_interval_secs: u64,
}

/// Initial debug toggles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub rx: bool,
    #[serde(default)]
    pub tx: bool,
    #[serde(default)]
    pub state: bool,
    #[serde(default)]
    pub warn: bool,
}

/// A physical link served by the static link driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub mac: MacAddress,
    #[serde(default = "default_speed")]
    pub speed: Option<LinkSpeed>,
    #[serde(default)]
    pub duplex: Duplex,
    #[serde(default = "default_carrier")]
    pub carrier: bool,
}

impl LinkConfig {
    pub fn link_info(&self) -> LinkInfo {
        LinkInfo {
            carrier: self.carrier,
            speed: self.speed,
            duplex: self.duplex,
        }
    }
}

/// A port bound to an aggregator at start-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortBinding {
    pub link: String,
    pub aggregator: String,
    #[serde(default)]
    pub admin_key: Option<u16>,
    #[serde(default)]
    pub port_priority: Option<u16>,
    #[serde(default)]
    pub mode: Option<LacpMode>,
    #[serde(default)]
    pub timeout: Option<LacpTimeout>,
    #[serde(default)]
    pub aggregable: Option<bool>,
}

/// Complete lacd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LacdConfig {
    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub aggregators: AggregatorConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub debug: DebugConfig,

    #[serde(default)]
    pub links: Vec<LinkConfig>,

    #[serde(default)]
    pub ports: Vec<PortBinding>,
}

// Default functions
fn default_priority() -> u16 {
    DEFAULT_PRIORITY
}

fn default_collector_max_delay() -> u16 {
    1
}

fn default_initial_count() -> u16 {
    1
}

fn default_name_prefix() -> String {
    "aggr".to_string()
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_link_check_interval() -> u64 {
    10
}

fn default_speed() -> Option<LinkSpeed> {
    Some(LinkSpeed::Mb1000)
}

fn default_carrier() -> bool {
    true
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            collector_max_delay: default_collector_max_delay(),
            system_id: None,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            initial_count: default_initial_count(),
            name_prefix: default_name_prefix(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            link_check_interval_secs: default_link_check_interval(),
        }
    }
}

impl TimingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn link_check_interval(&self) -> Duration {
        Duration::from_secs(self.link_check_interval_secs)
    }
}

impl PortBinding {
    /// Admin key, falling back to the protocol default.
    pub fn admin_key(&self) -> u16 {
        self.admin_key.unwrap_or(DEFAULT_ADMIN_KEY)
    }
}

impl LacdConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> LacResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| LacError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> LacResult<Self> {
        let config: LacdConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> LacResult<()> {
        if self.timing.tick_interval_ms == 0 {
            return Err(LacError::invalid_config(
                "timing.tick_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.timing.link_check_interval_secs == 0 {
            return Err(LacError::invalid_config(
                "timing.link_check_interval_secs",
                "must be greater than 0",
            ));
        }

        if self.aggregators.initial_count == 0 || self.aggregators.initial_count >= MAX_AGGRS {
            return Err(LacError::invalid_config(
                "aggregators.initial_count",
                format!("must be between 1 and {}", MAX_AGGRS - 1),
            ));
        }

        if self.aggregators.name_prefix.is_empty() {
            return Err(LacError::invalid_config(
                "aggregators.name_prefix",
                "must not be empty",
            ));
        }

        if let Some(port) = self
            .debug
            .ports
            .iter()
            .find(|p| **p == 0 || **p >= MAX_PORTS)
        {
            return Err(LacError::invalid_config(
                "debug.ports",
                format!("port {} out of range", port),
            ));
        }

        let mut names = HashSet::new();
        for link in &self.links {
            if !names.insert(link.name.as_str()) {
                return Err(LacError::invalid_config(
                    "links",
                    format!("duplicate link '{}'", link.name),
                ));
            }
        }

        let aggregator_names = self.aggregator_names();
        let mut bound = HashSet::new();
        for binding in &self.ports {
            if !self.links.is_empty() && !names.contains(binding.link.as_str()) {
                return Err(LacError::invalid_config(
                    "ports",
                    format!("unknown link '{}'", binding.link),
                ));
            }
            if !aggregator_names.contains(&binding.aggregator) {
                return Err(LacError::invalid_config(
                    "ports",
                    format!("unknown aggregator '{}'", binding.aggregator),
                ));
            }
            if !bound.insert(binding.link.as_str()) {
                return Err(LacError::invalid_config(
                    "ports",
                    format!("link '{}' bound twice", binding.link),
                ));
            }
        }

        Ok(())
    }

    /// Names of the aggregators created at start-up.
    pub fn aggregator_names(&self) -> Vec<String> {
        (0..self.aggregators.initial_count)
            .map(|n| format!("{}{}", self.aggregators.name_prefix, n))
            .collect()
    }
}

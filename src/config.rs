//! Layered configuration: built-in defaults, then an optional TOML or YAML
//! file, then `FLEETWATCH_*` environment variables.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::BackplaneError;
use crate::lifecycle::{AgentTiming, RecoveryPolicy};
use crate::profiles::{builtin_profiles, ServiceProfile};
use crate::routing::{Collection, RoutingPolicy};
use crate::types::DisplayZone;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub store: StoreConfig,
    pub agent: AgentConfig,
    pub aggregator: AggregatorConfig,
    /// Service profiles; the built-in ones are used when empty.
    pub services: Vec<ServiceProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Memory,
    RestProxy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub endpoint: String,
    pub consumer_group: String,
    pub channels: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::RestProxy,
            endpoint: "http://localhost:8082".to_string(),
            consumer_group: "log_consumer_group".to_string(),
            channels: Collection::ALL.iter().map(|c| c.to_string()).collect(),
            request_timeout_secs: 10,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    Elasticsearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub endpoint: String,
    pub routing: RoutingPolicy,
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Elasticsearch,
            endpoint: "http://localhost:9200".to_string(),
            routing: RoutingPolicy::Severity,
            request_timeout_secs: 10,
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub heartbeat_interval_secs: u64,
    pub self_check_interval_secs: u64,
    pub heartbeat_threshold_secs: u64,
    pub fault_check_interval_secs: u64,
    pub recovery_step_delay_secs: u64,
    pub publish_timeout_secs: u64,
    /// Overrides every profile's fault probability when set.
    pub fault_probability: Option<f64>,
    pub recovery_policy: RecoveryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            self_check_interval_secs: 1,
            heartbeat_threshold_secs: 10,
            fault_check_interval_secs: 10,
            recovery_step_delay_secs: 2,
            publish_timeout_secs: 5,
            fault_probability: None,
            recovery_policy: RecoveryPolicy::AbortOnShutdown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub staleness_threshold_secs: u64,
    pub poll_interval_secs: u64,
    pub display_timezone: DisplayZone,
    pub display_capacity: usize,
    pub display_window_secs: Option<u64>,
    pub api_port: Option<u16>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 10,
            poll_interval_secs: 1,
            display_timezone: DisplayZone::utc(),
            display_capacity: 500,
            display_window_secs: Some(3600),
            api_port: None,
        }
    }
}

impl AggregatorConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn display_window(&self) -> Option<Duration> {
        self.display_window_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load `path` if given, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        match extension {
            "toml" => toml::from_str(&raw)
                .with_context(|| format!("Failed to parse TOML config {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse YAML config {}", path.display())),
            other => Err(anyhow!(
                "Unsupported config format '{}' for {}",
                other,
                path.display()
            )),
        }
    }

    /// Apply `FLEETWATCH_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), BackplaneError> {
        if let Some(endpoint) = lookup("FLEETWATCH_TRANSPORT_ENDPOINT") {
            self.transport.endpoint = endpoint;
        }
        if let Some(endpoint) = lookup("FLEETWATCH_STORE_ENDPOINT") {
            self.store.endpoint = endpoint;
        }
        if let Some(zone) = lookup("FLEETWATCH_DISPLAY_TIMEZONE") {
            self.aggregator.display_timezone = zone.parse().map_err(BackplaneError::Config)?;
        }
        if let Some(secs) = lookup("FLEETWATCH_STALENESS_THRESHOLD_SECS") {
            self.aggregator.staleness_threshold_secs =
                parse_var("FLEETWATCH_STALENESS_THRESHOLD_SECS", &secs)?;
        }
        if let Some(secs) = lookup("FLEETWATCH_HEARTBEAT_INTERVAL_SECS") {
            self.agent.heartbeat_interval_secs =
                parse_var("FLEETWATCH_HEARTBEAT_INTERVAL_SECS", &secs)?;
        }
        if let Some(probability) = lookup("FLEETWATCH_FAULT_PROBABILITY") {
            self.agent.fault_probability =
                Some(parse_var("FLEETWATCH_FAULT_PROBABILITY", &probability)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BackplaneError> {
        let agent = &self.agent;
        let cadences = [
            ("agent.heartbeat_interval_secs", agent.heartbeat_interval_secs),
            ("agent.self_check_interval_secs", agent.self_check_interval_secs),
            ("agent.fault_check_interval_secs", agent.fault_check_interval_secs),
            ("agent.publish_timeout_secs", agent.publish_timeout_secs),
            ("aggregator.poll_interval_secs", self.aggregator.poll_interval_secs),
            ("transport.request_timeout_secs", self.transport.request_timeout_secs),
            ("store.request_timeout_secs", self.store.request_timeout_secs),
        ];
        for (name, secs) in cadences {
            if secs == 0 {
                return Err(BackplaneError::Config(format!("{} must be at least 1", name)));
            }
        }
        if let Some(p) = agent.fault_probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(BackplaneError::Config(format!(
                    "agent.fault_probability {} outside [0, 1]",
                    p
                )));
            }
        }
        if self.aggregator.display_capacity == 0 {
            return Err(BackplaneError::Config(
                "aggregator.display_capacity must be positive".to_string(),
            ));
        }
        if self.transport.channels.is_empty() {
            return Err(BackplaneError::Config(
                "transport.channels must name at least one channel".to_string(),
            ));
        }
        for profile in &self.services {
            profile.validate()?;
        }
        Ok(())
    }

    /// Effective service profiles with the global fault override applied.
    pub fn profiles(&self) -> Vec<ServiceProfile> {
        let mut profiles = if self.services.is_empty() {
            builtin_profiles()
        } else {
            self.services.clone()
        };
        if let Some(p) = self.agent.fault_probability {
            for profile in &mut profiles {
                profile.fault_probability = p;
            }
        }
        profiles
    }

    /// Find a profile by service name or node prefix, ignoring case.
    pub fn profile(&self, name: &str) -> Option<ServiceProfile> {
        self.profiles().into_iter().find(|profile| {
            profile.name.eq_ignore_ascii_case(name) || profile.node_prefix.eq_ignore_ascii_case(name)
        })
    }

    pub fn agent_timing(&self) -> AgentTiming {
        let agent = &self.agent;
        AgentTiming {
            heartbeat_interval: Duration::from_secs(agent.heartbeat_interval_secs),
            self_check_interval: Duration::from_secs(agent.self_check_interval_secs),
            heartbeat_threshold: Duration::from_secs(agent.heartbeat_threshold_secs),
            fault_check_interval: Duration::from_secs(agent.fault_check_interval_secs),
            recovery_step_delay: Duration::from_secs(agent.recovery_step_delay_secs),
            publish_timeout: Duration::from_secs(agent.publish_timeout_secs),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, BackplaneError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| BackplaneError::Config(format!("{}={:?}: {}", name, raw, e)))
}

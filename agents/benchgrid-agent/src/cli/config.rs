//! Configuration module
//!
//! Handles loading and validating agent configuration from TOML files.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::manager::DEFAULT_API_PORT;
use crate::coordination::coordinator::CoordinationSettings;
use crate::coordination::state::Role;

/// Main configuration structure for the BenchGrid agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Unique identifier for this agent. Defaults to the machine name plus
    /// the role suffix when omitted.
    #[serde(default)]
    pub agent_id: Option<String>,

    /// Role this agent plays in multi-role runs
    #[serde(default = "default_role")]
    pub role: Role,

    /// IP address peers use to reach this agent
    #[serde(default = "default_ip_address")]
    pub ip_address: String,

    /// Control-plane API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Rendezvous timing settings
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Proxy endpoint settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control-plane API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Port this agent's API listens on, and the default port assumed for
    /// peers
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Per-role port overrides for colocated agents
    /// (e.g. Client on 4501, Server on 4502)
    #[serde(default)]
    pub role_ports: HashMap<String, u16>,

    /// Background heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

/// Rendezvous timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Interval between peer state polls in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Budget for the peer to reach Running, in seconds
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,

    /// Budget for the peer to reach Stopped during hand-off, in seconds
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,
}

/// Proxy endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    /// Base URL of the proxy endpoint. Blob and telemetry traffic is
    /// disabled when omitted.
    #[serde(default)]
    pub url: Option<String>,

    /// Chunk size for range downloads in bytes
    pub chunk_size: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_role() -> Role {
    Role::Client
}

fn default_ip_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    2
}

fn default_readiness_timeout() -> u64 {
    600
}

fn default_completion_timeout() -> u64 {
    1800
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            role_ports: HashMap::new(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            readiness_timeout_secs: default_readiness_timeout(),
            completion_timeout_secs: default_completion_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            agent_id: None,
            role: default_role(),
            ip_address: default_ip_address(),
            api: ApiConfig::default(),
            coordination: CoordinationConfig::default(),
            proxy: ProxyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Interval for the local control-plane watchdog heartbeat.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.api.heartbeat_interval_secs)
    }

    /// Rendezvous settings derived from this configuration.
    pub fn coordination_settings(&self) -> CoordinationSettings {
        CoordinationSettings {
            poll_interval: Duration::from_secs(self.coordination.poll_interval_secs),
            readiness_timeout: Duration::from_secs(self.coordination.readiness_timeout_secs),
            completion_timeout: Duration::from_secs(self.coordination.completion_timeout_secs),
            local_api_url: format!("http://127.0.0.1:{}", self.api.port),
        }
    }
}

//! Agent Configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `BMC_AGENT_*` environment variables (nested keys split on `__`, e.g.
//! `BMC_AGENT_BROKER__WORKERS=4`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use entity_runtime::broker::BrokerConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "BMC_AGENT_";

/// Full agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Bus access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// JSON snapshot the in-memory bus is loaded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,

    /// Reload the snapshot when the file changes
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Connections kept in the shared pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a caller waits for a pooled connection
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> usize {
    4
}

fn default_checkout_timeout_ms() -> u64 {
    5000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            snapshot: None,
            watch: default_true(),
            pool_size: default_pool_size(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "bmc_agent=info,entity_runtime=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl AgentConfig {
    /// Provider stack: defaults, optional file, environment
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load the merged configuration. A named file that does not exist is an
    /// error; without a file only defaults and environment apply.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = file {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }
        let config = Self::figment(file).extract()?;
        Ok(config)
    }

    /// Render as TOML, as it would be written to a config file
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

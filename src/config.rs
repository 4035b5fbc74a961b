//! Configuration for the correlation daemon.
//!
//! One TOML file with a section per protocol channel (`[rpc]`, `[p2p]`),
//! plus reputation and logging settings. Every section is optional and
//! falls back to its defaults, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub rpc: CorrelationConfig,
    pub p2p: CorrelationConfig,
    pub reputation: ReputationConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            rpc: CorrelationConfig::default(),
            p2p: CorrelationConfig::p2p(),
            reputation: ReputationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "Catalyst Node".to_string(),
        }
    }
}

/// Settings for one correlation manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// How long a request may wait for its response
    pub default_ttl_ms: u64,
    /// Eviction events buffered per subscriber before it starts skipping
    pub event_buffer: usize,
}

impl CorrelationConfig {
    /// Gossip traffic expects quicker answers than RPC
    pub fn p2p() -> Self {
        Self {
            default_ttl_ms: 5_000,
            ..Self::default()
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.default_ttl_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "[{}] default_ttl_ms must be > 0",
                section
            )));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid(format!(
                "[{}] event_buffer must be > 0",
                section
            )));
        }
        Ok(())
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 10_000,
            event_buffer: 1_024,
        }
    }
}

/// Score adjustments applied per peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub initial_reputation: i64,
    pub response_reward: i64,
    pub no_response_penalty: i64,
    pub uncorrelatable_penalty: i64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            initial_reputation: 0,
            response_reward: 10,
            no_response_penalty: -10,
            uncorrelatable_penalty: -5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing a default config there first if it is missing
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load_from_file(path);
        }

        let config = Config::default();
        config.save_to_file(path)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc.validate("rpc")?;
        self.p2p.validate("p2p")?;

        let rep = &self.reputation;
        if rep.response_reward < 0 {
            return Err(ConfigError::Invalid(
                "[reputation] response_reward must be >= 0".to_string(),
            ));
        }
        if rep.no_response_penalty > 0 || rep.uncorrelatable_penalty > 0 {
            return Err(ConfigError::Invalid(
                "[reputation] penalties must be <= 0".to_string(),
            ));
        }
        Ok(())
    }
}

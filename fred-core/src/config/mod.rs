//! Node configuration
//!
//! Loaded from a TOML file or from `FRED_<SECTION>_<KEY>` environment
//! variables on top of the defaults, then validated.

use crate::core_store::{MemoryStore, Store};
use crate::core_types::{validate_item_id, Expiry, Node};
use crate::logging::{LogConfig, LogLevel};
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::sync::Arc;

mod error;

pub use error::ConfigError;

/// Main node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this node
    pub node: NodeConfig,

    /// Physical storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Keygroup and relay defaults
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster-unique node ID
    pub id: String,

    /// Address peers use to reach this node
    pub host: String,
}

/// Available physical stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Physically drop expired rows when they are read
    #[serde(default)]
    pub sweep_expired_on_read: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Expiry for keygroups created without one
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub default_expiry: Expiry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { id: "node0".to_string(), host: "127.0.0.1:9001".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, json_format: false, with_target: true }
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    value
        .parse()
        .map_err(|e: std::str::ParseBoolError| ConfigError::Env { var, reason: e.to_string() })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern FRED_<SECTION>_<KEY>,
    /// e.g. FRED_NODE_HOST=10.0.0.1:9001
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(id) = lookup("FRED_NODE_ID") {
            config.node.id = id;
        }
        if let Some(host) = lookup("FRED_NODE_HOST") {
            config.node.host = host;
        }

        if let Some(backend) = lookup("FRED_STORE_BACKEND") {
            config.store.backend = match backend.as_str() {
                "memory" => StoreBackend::Memory,
                other => {
                    return Err(ConfigError::Env {
                        var: "FRED_STORE_BACKEND",
                        reason: format!("unknown backend '{other}'"),
                    })
                }
            };
        }
        if let Some(sweep) = lookup("FRED_STORE_SWEEP_EXPIRED_ON_READ") {
            config.store.sweep_expired_on_read =
                parse_flag("FRED_STORE_SWEEP_EXPIRED_ON_READ", &sweep)?;
        }

        if let Some(expiry) = lookup("FRED_REPLICATION_DEFAULT_EXPIRY") {
            config.replication.default_expiry = Some(
                humantime::parse_duration(&expiry).map_err(|e| ConfigError::Env {
                    var: "FRED_REPLICATION_DEFAULT_EXPIRY",
                    reason: e.to_string(),
                })?,
            );
        }

        if let Some(level) = lookup("FRED_LOGGING_LEVEL") {
            config.logging.level = level
                .parse()
                .map_err(|reason| ConfigError::Env { var: "FRED_LOGGING_LEVEL", reason })?;
        }
        if let Some(json) = lookup("FRED_LOGGING_JSON_FORMAT") {
            config.logging.json_format = parse_flag("FRED_LOGGING_JSON_FORMAT", &json)?;
        }
        if let Some(target) = lookup("FRED_LOGGING_WITH_TARGET") {
            config.logging.with_target = parse_flag("FRED_LOGGING_WITH_TARGET", &target)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_item_id(&self.node.id).map_err(|_| {
            ConfigError::Invalid(format!("node.id '{}' must be alphanumeric", self.node.id))
        })?;

        if self.node.host.trim().is_empty() {
            return Err(ConfigError::Invalid("node.host must not be empty".to_string()));
        }

        if self.replication.default_expiry.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Invalid(
                "replication.default_expiry must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }

    /// This node as peers see it
    pub fn own_node(&self) -> Node {
        Node::new(self.node.id.clone(), self.node.host.clone())
    }

    /// Open the configured physical store
    pub fn open_store(&self) -> Arc<dyn Store> {
        match self.store.backend {
            StoreBackend::Memory => {
                Arc::new(MemoryStore::new().with_sweep_on_read(self.store.sweep_expired_on_read))
            }
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.logging.level)
            .with_target(self.logging.with_target)
            .json_format(self.logging.json_format)
    }
}

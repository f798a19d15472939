//! Coordination-layer configuration.
//!
//! Loaded once at process startup, before any queue registration. Role
//! intents come from here; the resolved role is then passed by value into
//! the node rather than read back from configuration at runtime.

use std::collections::HashMap;

use serde::Deserialize;

use crate::descriptor::DeliveryMode;
use crate::role::RoleConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for the configuration file path.
pub const CONFIG_ENV_VAR: &str = "HIVELINK_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "HIVELINK";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "HIVELINK_LOG";

/// Configuration failure. Fatal at startup; the process terminates with a
/// clear cause rather than running with an unresolved topology.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no transport configured")]
    MissingTransport,
}

/// Broker connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker connection URL, handed to the transport implementation.
    pub url: String,
    /// Buffered deliveries per subscription before publishers backpressure.
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            channel_capacity: 1024,
        }
    }
}

/// Main coordination-layer configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Role intents, resolved exactly once at startup.
    pub role: RoleConfig,
    /// Broker settings.
    pub broker: BrokerConfig,
    /// Per-deployment delivery-mode overrides, keyed by queue tag. Keeps
    /// the queue-to-mode mapping explicit and auditable instead of baked
    /// into code alone.
    pub queues: HashMap<String, DeliveryMode>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. File named by the `path` argument (if provided)
    /// 3. File named by `HIVELINK_CONFIG` (if set)
    /// 4. Environment variables prefixed `HIVELINK`, `__`-separated
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let loaded = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(loaded.try_deserialize()?)
    }
}

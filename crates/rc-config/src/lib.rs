//! Redundancy Controller Configuration
//!
//! TOML-based configuration with environment variable overrides. Only the
//! node identity and the record key come from here; eligibility (enabled
//! flag, allowed nodes) always comes from the shared instance record.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mongodb: MongoConfig,
    pub redundancy: RedundancySection,
    pub http: HttpConfig,
}

/// MongoDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    /// Collection holding the process instance records
    pub collection: String,
    /// Create the unique (processName, processInstanceNumber) index on startup
    pub ensure_indexes: bool,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017/?replicaSet=rs1".to_string(),
            database: "json_scada".to_string(),
            collection: rc_common::PROCESS_INSTANCES_COLLECTION.to_string(),
            ensure_indexes: true,
        }
    }
}

/// Redundancy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedundancySection {
    /// This node's identity; written into `activeNodeName` while active
    pub node_name: String,
    pub process_name: String,
    pub instance_number: i32,
    pub poll_interval_secs: u64,
    /// Consecutive polls without a keep-alive advance tolerated before takeover
    pub stale_poll_limit: u32,
    /// Version reported in the record; empty means the binary's version
    pub software_version: String,
}

impl Default for RedundancySection {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            process_name: "RC_NODE".to_string(),
            instance_number: 1,
            poll_interval_secs: rc_common::DEFAULT_POLL_INTERVAL_SECS,
            stale_poll_limit: rc_common::DEFAULT_STALE_POLL_LIMIT,
            software_version: String::new(),
        }
    }
}

/// Status HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check the settings the controller cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redundancy.node_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "redundancy.node_name must be set (or RC_NODE_NAME / NODE_NAME)".to_string(),
            ));
        }
        if self.redundancy.process_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "redundancy.process_name must not be empty".to_string(),
            ));
        }
        if self.redundancy.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "redundancy.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.redundancy.poll_interval_secs > rc_common::MAX_POLL_INTERVAL_SECS {
            return Err(ConfigError::ValidationError(format!(
                "redundancy.poll_interval_secs must not exceed {}",
                rc_common::MAX_POLL_INTERVAL_SECS
            )));
        }
        if self.mongodb.uri.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "mongodb.uri must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Redundancy Controller Configuration
# Environment variables (RC_*) override these settings

[mongodb]
# TLS options go in the URI, e.g. ?tls=true&tlsCAFile=/etc/ssl/ca.pem&tlsCertificateKeyFile=/etc/ssl/client.pem
uri = "mongodb://localhost:27017/?replicaSet=rs1"
database = "json_scada"
collection = "processInstances"
ensure_indexes = true

[redundancy]
node_name = "node1"
process_name = "RC_NODE"
instance_number = 1
poll_interval_secs = 5
stale_poll_limit = 4
software_version = ""

[http]
enabled = true
host = "0.0.0.0"
port = 9090
"#
        .to_string()
    }
}

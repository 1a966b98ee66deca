//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "redundancy.toml",
    "./config/config.toml",
    "./config/redundancy.toml",
    "/etc/redundancy/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file()? {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Find the configuration file to use.
    ///
    /// An explicit path that does not exist is an error; the search paths are optional.
    fn find_config_file(&self) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::ValidationError(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        if let Ok(path) = env::var("REDUNDANCY_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        apply_overrides(config, |key| env::var(key).ok());
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `RC_*` overrides using the given variable lookup.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // MongoDB
    if let Some(val) = lookup("RC_MONGODB_URI") {
        config.mongodb.uri = val;
    }
    if let Some(val) = lookup("RC_MONGODB_DATABASE") {
        config.mongodb.database = val;
    }
    if let Some(val) = lookup("RC_MONGODB_COLLECTION") {
        config.mongodb.collection = val;
    }

    // Redundancy; NODE_NAME is the identity variable used by existing deployments
    if let Some(val) = lookup("RC_NODE_NAME").or_else(|| lookup("NODE_NAME")) {
        config.redundancy.node_name = val;
    }
    if let Some(val) = lookup("RC_PROCESS_NAME") {
        config.redundancy.process_name = val;
    }
    if let Some(val) = lookup("RC_INSTANCE") {
        if let Ok(instance) = val.parse() {
            config.redundancy.instance_number = instance;
        }
    }
    if let Some(val) = lookup("RC_POLL_INTERVAL_SECS") {
        if let Ok(secs) = val.parse() {
            config.redundancy.poll_interval_secs = secs;
        }
    }
    if let Some(val) = lookup("RC_STALE_POLL_LIMIT") {
        if let Ok(limit) = val.parse() {
            config.redundancy.stale_poll_limit = limit;
        }
    }

    // HTTP
    if let Some(val) = lookup("RC_HTTP_ENABLED") {
        config.http.enabled = val.parse().unwrap_or(true);
    }
    if let Some(val) = lookup("RC_HTTP_PORT") {
        if let Ok(port) = val.parse() {
            config.http.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("RC_NODE_NAME", "node-a"),
                ("RC_INSTANCE", "2"),
                ("RC_POLL_INTERVAL_SECS", "10"),
                ("RC_STALE_POLL_LIMIT", "2"),
                ("RC_MONGODB_URI", "mongodb://db:27017"),
            ]),
        );

        assert_eq!(config.redundancy.node_name, "node-a");
        assert_eq!(config.redundancy.instance_number, 2);
        assert_eq!(config.redundancy.poll_interval_secs, 10);
        assert_eq!(config.redundancy.stale_poll_limit, 2);
        assert_eq!(config.mongodb.uri, "mongodb://db:27017");
    }

    #[test]
    fn test_node_name_fallback() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, lookup_from(&[("NODE_NAME", "legacy")]));
        assert_eq!(config.redundancy.node_name, "legacy");

        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[("NODE_NAME", "legacy"), ("RC_NODE_NAME", "preferred")]),
        );
        assert_eq!(config.redundancy.node_name, "preferred");
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, lookup_from(&[("RC_INSTANCE", "two")]));
        assert_eq!(config.redundancy.instance_number, 1);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[redundancy]\nnode_name = \"from-file\"\nprocess_name = \"CS_CUSTOM_PROCESSOR\"").unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.redundancy.process_name, "CS_CUSTOM_PROCESSOR");
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let result = ConfigLoader::with_path("/nonexistent/redundancy.toml").load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}

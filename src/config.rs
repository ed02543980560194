//! Configuration types (spec.md §6 "Configuration keys consumed"), loaded
//! from YAML with `serde_yaml` the way the teacher crate loads its own
//! configuration files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub poll_interval_ms: u64,
    pub endpoint: String,
    pub data_directory: String,
    pub manifest_directory: String,
    pub delete_after_secs: u64,
}

impl ServiceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn delete_after(&self) -> Duration {
        Duration::from_secs(self.delete_after_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            endpoint: "local".to_string(),
            data_directory: "data".to_string(),
            manifest_directory: "manifests".to_string(),
            delete_after_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
    pub use_json: bool,
    pub log_dir: String,
    pub log_file: String,
    /// One of "never", "hourly", "daily".
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            use_json: false,
            log_dir: "logs".to_string(),
            log_file: "dts.log".to_string(),
            rotation: "daily".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub databases: HashMap<String, DatabaseConfig>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn known_database_names(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_yaml() {
        let mut cfg = Config {
            service: ServiceConfig::default(),
            ..Default::default()
        };
        cfg.databases.insert(
            "jdp".to_string(),
            DatabaseConfig {
                endpoint: "globus:abc".to_string(),
            },
        );

        let yaml = cfg.to_yaml_string().unwrap();
        let parsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(
            parsed.service.poll_interval_ms,
            cfg.service.poll_interval_ms
        );
        assert_eq!(parsed.databases["jdp"].endpoint, "globus:abc");
    }

    #[test]
    fn poll_interval_converts_millis() {
        let cfg = ServiceConfig {
            poll_interval_ms: 250,
            ..ServiceConfig::default()
        };
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
    }
}

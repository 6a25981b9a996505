//! Configuration Model

use std::collections::{HashMap, HashSet};

use config::builder::DefaultState;
use config::{
    Config as ConfigRaw,
    ConfigBuilder,
    ConfigError,
    Environment,
    File,
    FileFormat,
};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Checker,
    Dispatcher,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainConfig {
    pub roles: HashSet<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub dbid: u8,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.dbid)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    // Period of the full no-data sweep.
    pub nodata_check_interval: u64,
    // Dedup window for ingest-driven enqueues.
    pub check_interval: u64,
    // Metric samples older than this are trimmed during checks.
    pub metrics_ttl: i64,
    // Ingestion silence beyond this pauses the no-data sweep.
    pub stop_checking_interval: i64,
    // Maximum hold of the per-trigger check lock.
    pub check_lock_ttl: i64,
    // Worker pool size; 0 means max(1, CPU - 1).
    pub workers: usize,
    pub event_channel: String,
    // State name -> reminder interval in seconds for repeated bad states.
    pub bad_states_reminder: HashMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphiteConfig {
    // "host:port" per replica; empty disables self-metrics export.
    pub uris: Vec<String>,
    pub prefix: String,
    pub interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub main: MainConfig,
    pub redis: RedisConfig,
    pub checker: CheckerConfig,
    pub graphite: GraphiteConfig,
}

#[derive(Debug)]
pub struct ConfigLoader {
    builder: ConfigBuilder<DefaultState>,
}

impl ConfigLoader {
    /// Loads a fresh copy of the configuration from source.
    pub fn load(&self) -> Result<Config, ConfigError> {
        Self::deserialize(self.builder.build_cloned()?)
    }

    /// creates a new loader configured to load the default and overlays
    /// the user supplied config (if supplied).
    ///
    /// * `config_file`: The path of the configuration file to load.
    pub fn from_path(path: &Option<String>) -> ConfigLoader {
        let raw = include_str!("default.toml");
        let mut builder = ConfigRaw::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .add_source(
                Environment::with_prefix("VIGIL")
                    .try_parsing(true)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("main.roles")
                    .with_list_parse_key("graphite.uris"),
            );
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        ConfigLoader { builder }
    }

    fn deserialize(config: ConfigRaw) -> Result<Config, ConfigError> {
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_loads() {
        let config = ConfigLoader::from_path(&None).load().unwrap();
        assert!(config.main.roles.contains(&Role::Checker));
        assert_eq!(config.checker.check_interval, 5);
        assert_eq!(config.checker.metrics_ttl, 3600);
        assert_eq!(config.checker.check_lock_ttl, 30);
        assert_eq!(config.checker.event_channel, "metric-event");
        assert_eq!(
            config.checker.bad_states_reminder.get("ERROR"),
            Some(&86400)
        );
        assert_eq!(config.redis.port, 6379);
    }
}

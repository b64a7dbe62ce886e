/// Configuration management for mongoctl
///
/// One TOML file holds the run settings, the logging setup and the server and
/// cluster descriptors the repository is built from.

use crate::core::{
    ClusterDocument, MemberDocument, OperationSettings, ServerDocument, ServerKind,
    ShardMemberDocument, ShardedClusterDocument,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::error::ConfigError;

/// Main mongoctl configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Operation settings
    #[serde(default)]
    pub settings: SettingsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Server descriptors
    #[serde(default)]
    pub servers: Vec<ServerDocument>,
    /// Replica set and sharded cluster descriptors
    #[serde(default)]
    pub clusters: Vec<ClusterDocument>,
}

/// Operation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Timeout of connections that carry commands, in seconds
    pub connect_timeout_sec: u64,
    /// Timeout of reachability probes, in milliseconds
    pub probe_timeout_ms: u64,
    /// Sleep between submissions of a synchronous shard removal, in seconds
    pub remove_shard_poll_interval_sec: u64,
    /// Credential attempts per authentication
    pub auth_attempts: u32,
    /// Directory holding mongod/mongos; `PATH` lookup when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongo_bin_dir: Option<PathBuf>,
    /// Prompt for missing credentials on the terminal
    pub interactive: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        let defaults = OperationSettings::default();
        Self {
            connect_timeout_sec: defaults.connect_timeout.as_secs(),
            probe_timeout_ms: defaults.probe_timeout.as_millis() as u64,
            remove_shard_poll_interval_sec: defaults.remove_shard_poll_interval.as_secs(),
            auth_attempts: defaults.auth_attempts,
            mongo_bin_dir: None,
            interactive: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl SettingsConfig {
    pub fn to_operation_settings(&self) -> OperationSettings {
        OperationSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_sec),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            remove_shard_poll_interval: Duration::from_secs(self.remove_shard_poll_interval_sec),
            auth_attempts: self.auth_attempts,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate settings and descriptor ids. Cluster structure is checked by
    /// the repository.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.connect_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.settings.probe_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "probe_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.settings.probe_timeout_ms > self.settings.connect_timeout_sec * 1000 {
            return Err(ConfigError::ValidationError(
                "probe_timeout_ms must not exceed connect_timeout_sec".to_string(),
            ));
        }

        if self.settings.auth_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "auth_attempts must be greater than 0".to_string(),
            ));
        }

        let mut server_ids = HashSet::new();
        for server in &self.servers {
            if server.id().trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Server id cannot be empty".to_string(),
                ));
            }
            if !server_ids.insert(server.id()) {
                return Err(ConfigError::ValidationError(
                    format!("Duplicate server id: {}", server.id())
                ));
            }
        }

        let mut cluster_ids = HashSet::new();
        for cluster in &self.clusters {
            if cluster.id().trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Cluster id cannot be empty".to_string(),
                ));
            }
            if !cluster_ids.insert(cluster.id()) {
                return Err(ConfigError::ValidationError(
                    format!("Duplicate cluster id: {}", cluster.id())
                ));
            }
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Example with one sharded cluster: three shards, one config server and
    /// two routers on this machine
    pub fn example() -> Self {
        let server = |id: &str, kind: ServerKind, port: i64| {
            ServerDocument::new(id, kind)
                .with_option("port", port)
                .with_option("dbpath", format!("~/mongodb/{}", id))
        };
        let router = |id: &str, port: i64| {
            let mut document = ServerDocument::new(id, ServerKind::Mongos).with_option("port", port);
            document.server_home = Some(format!("~/mongodb/{}", id));
            document
        };

        let servers = vec![
            server("shard1", ServerKind::Mongod, 27018),
            server("shard2", ServerKind::Mongod, 27028),
            server("shard3", ServerKind::Mongod, 27038),
            server("config1", ServerKind::Mongod, 27019).with_option("configsvr", true),
            router("router1", 27017),
            router("router2", 27027),
        ];

        let mut cluster = ShardedClusterDocument::new(
            "main",
            vec![MemberDocument::new("config1")],
            vec![
                ShardMemberDocument::server("shard1"),
                ShardMemberDocument::server("shard2"),
                ShardMemberDocument::server("shard3"),
            ],
            vec![MemberDocument::new("router1"), MemberDocument::new("router2")],
        );
        cluster.description = Some("Example sharded cluster".to_string());

        Config {
            servers,
            clusters: vec![ClusterDocument::Sharded(cluster)],
            ..Default::default()
        }
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        Self::example().save_to_file(path)
    }
}

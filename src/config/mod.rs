//! Configuration management for filebalancer
//!
//! Configuration is loaded from environment variables or a TOML file and
//! validated once at startup. Validation failures are fatal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::node_id;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage node pool
    pub cluster: ClusterConfig,

    /// Scheduling loop settings
    pub scheduler: SchedulerConfig,

    /// State store settings
    pub database: DatabaseConfig,

    /// Metadata registry settings
    pub registry: RegistryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage node pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Ordered node endpoints; order breaks ties between equally loaded nodes
    pub nodes: Vec<String>,

    /// Directory holding one payload directory per node
    pub storage_root: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: vec![
                String::from("zk1:2181"),
                String::from("zk2:2181"),
                String::from("zk3:2181"),
            ],
            storage_root: PathBuf::from("data/uploads"),
        }
    }
}

/// Scheduling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum source/target count difference that triggers a migration
    pub threshold: u32,

    /// Seconds between timer-driven cycles
    pub interval_secs: u64,

    /// Run the timer-driven loop when serving
    pub enabled: bool,

    /// Upper bound for one payload move
    pub move_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            interval_secs: 15,
            enabled: true,
            move_timeout_secs: 10,
        }
    }
}

/// State store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,

    /// Default number of audit entries returned by listings
    pub operations_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/filebalancer.db"),
            operations_limit: 1000,
        }
    }
}

/// Metadata registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Redis URL; when absent the registry is kept in memory
    pub url: Option<String>,

    /// Key prefix under which file documents live
    pub root_path: String,

    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,

    /// Retries after the first failed attempt
    pub retries: u32,

    /// Connection pool size
    pub pool_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            root_path: String::from("/demo/files"),
            timeout_ms: 2500,
            retries: 2,
            pool_size: 4,
        }
    }
}

impl RegistryConfig {
    /// Per-attempt timeout as Duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let nodes = std::env::var("FILEBALANCER_NODES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.cluster.nodes);

        let storage_root = std::env::var("FILEBALANCER_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.cluster.storage_root);

        let scheduler = SchedulerConfig {
            threshold: env_parse("FILEBALANCER_THRESHOLD").unwrap_or(defaults.scheduler.threshold),
            interval_secs: env_parse("FILEBALANCER_INTERVAL")
                .unwrap_or(defaults.scheduler.interval_secs),
            enabled: env_parse("FILEBALANCER_SCHEDULER_ENABLED")
                .unwrap_or(defaults.scheduler.enabled),
            move_timeout_secs: env_parse("FILEBALANCER_MOVE_TIMEOUT")
                .unwrap_or(defaults.scheduler.move_timeout_secs),
        };

        let database = DatabaseConfig {
            sqlite_path: std::env::var("FILEBALANCER_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database.sqlite_path),
            operations_limit: env_parse("FILEBALANCER_OPERATIONS_LIMIT")
                .unwrap_or(defaults.database.operations_limit),
        };

        let registry = RegistryConfig {
            url: std::env::var("FILEBALANCER_REGISTRY_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            root_path: std::env::var("FILEBALANCER_REGISTRY_ROOT")
                .unwrap_or(defaults.registry.root_path),
            timeout_ms: env_parse("FILEBALANCER_REGISTRY_TIMEOUT_MS")
                .unwrap_or(defaults.registry.timeout_ms),
            retries: env_parse("FILEBALANCER_REGISTRY_RETRIES")
                .unwrap_or(defaults.registry.retries),
            pool_size: env_parse("FILEBALANCER_REGISTRY_POOL_SIZE")
                .unwrap_or(defaults.registry.pool_size),
        };

        let logging = LoggingConfig {
            level: std::env::var("FILEBALANCER_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("FILEBALANCER_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            cluster: ClusterConfig {
                nodes,
                storage_root,
            },
            scheduler,
            database,
            registry,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cluster.nodes.is_empty() {
            anyhow::bail!("cluster.nodes must list at least one node");
        }

        let mut seen = HashSet::new();
        for endpoint in &self.cluster.nodes {
            let id = node_id(endpoint);
            if id.is_empty() {
                anyhow::bail!("cluster.nodes contains a blank node id: '{endpoint}'");
            }
            if !seen.insert(id) {
                anyhow::bail!("cluster.nodes lists node '{id}' more than once");
            }
        }

        if self.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be greater than 0");
        }

        if self.scheduler.move_timeout_secs == 0 {
            anyhow::bail!("scheduler.move_timeout_secs must be greater than 0");
        }

        if self.registry.timeout_ms == 0 {
            anyhow::bail!("registry.timeout_ms must be greater than 0");
        }

        if self.registry.pool_size == 0 {
            anyhow::bail!("registry.pool_size must be greater than 0");
        }

        Ok(())
    }

    /// Configured node ids, in configured order
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.cluster
            .nodes
            .iter()
            .map(|n| node_id(n).to_string())
            .collect()
    }

    /// Scheduling interval as Duration
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }

    /// Payload move timeout as Duration
    #[must_use]
    pub fn move_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.move_timeout_secs)
    }
}

/// Configuration management for the shared data layer

use crate::core::{HostAndPort, DEFAULT_PORT, DEFAULT_SENTINEL_PORT};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DB_HOST_ENV: &str = "DBAAS_SERVICE_HOST";
pub const DB_PORT_ENV: &str = "DBAAS_SERVICE_PORT";
pub const SENTINEL_PORT_ENV: &str = "DBAAS_SERVICE_SENTINEL_PORT";
pub const SENTINEL_MASTER_NAME_ENV: &str = "DBAAS_MASTER_NAME";
pub const CLUSTER_ADDR_LIST_ENV: &str = "DBAAS_CLUSTER_ADDR_LIST";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_SENTINEL_MASTER_NAME: &str = "dbaasmaster";

/// Main shared data layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend database deployment
    pub database: DatabaseConfig,
    /// Dispatcher timing
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend database deployment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    #[serde(rename = "redis-standalone")]
    RedisStandalone,
    #[serde(rename = "redis-cluster")]
    RedisCluster,
    #[serde(rename = "redis-sentinel")]
    RedisSentinel,
    /// Several standalone servers, namespaces spread over them
    #[serde(rename = "sdl-standalone-cluster")]
    SdlStandaloneCluster,
    /// Several Sentinel-managed groups, namespaces spread over them
    #[serde(rename = "sdl-sentinel-cluster")]
    SdlSentinelCluster,
}

impl DbType {
    pub const ALL: [DbType; 5] = [
        DbType::RedisStandalone,
        DbType::RedisCluster,
        DbType::RedisSentinel,
        DbType::SdlStandaloneCluster,
        DbType::SdlSentinelCluster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::RedisStandalone => "redis-standalone",
            DbType::RedisCluster => "redis-cluster",
            DbType::RedisSentinel => "redis-sentinel",
            DbType::SdlStandaloneCluster => "sdl-standalone-cluster",
            DbType::SdlSentinelCluster => "sdl-sentinel-cluster",
        }
    }

    pub fn uses_sentinel(&self) -> bool {
        matches!(self, DbType::RedisSentinel | DbType::SdlSentinelCluster)
    }

    /// Namespaces are spread over the configured addresses
    pub fn is_sdl_cluster(&self) -> bool {
        matches!(self, DbType::SdlStandaloneCluster | DbType::SdlSentinelCluster)
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DbType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidDbType(s.to_string()))
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DbType,
    /// Server addresses, `host[:port]`
    #[serde(default)]
    pub servers: Vec<String>,
    /// Sentinel port per server, by index
    #[serde(default)]
    pub sentinel_ports: Vec<u16>,
    /// Sentinel master group name per server, by index
    #[serde(default)]
    pub sentinel_master_names: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::RedisStandalone,
            servers: vec![format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT)],
            sentinel_ports: Vec::new(),
            sentinel_master_names: Vec::new(),
        }
    }
}

impl DatabaseConfig {
    /// Build the database section from `DBAAS_*` variables.
    ///
    /// Returns `Ok(None)` when `DBAAS_SERVICE_HOST` is not set, in which
    /// case the file configuration applies.
    pub fn from_env<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(host) = lookup(DB_HOST_ENV) else {
            return Ok(None);
        };
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let sentinel_port = non_empty(SENTINEL_PORT_ENV);
        let cluster_list = non_empty(CLUSTER_ADDR_LIST_ENV);

        let (db_type, hosts) = match (host.is_empty(), &sentinel_port, cluster_list) {
            (false, None, None) => (DbType::RedisStandalone, host),
            (false, Some(_), None) => (DbType::RedisSentinel, host),
            (_, None, Some(list)) => (DbType::SdlStandaloneCluster, list),
            (_, Some(_), Some(list)) => (DbType::SdlSentinelCluster, list),
            (true, _, None) => {
                return Err(ConfigError::ValidationError(format!(
                    "{} is empty and no {} given",
                    DB_HOST_ENV, CLUSTER_ADDR_LIST_ENV
                )))
            }
        };

        let ports: Vec<String> = non_empty(DB_PORT_ENV)
            .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let servers = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .enumerate()
            .map(|(i, h)| match ports.get(i).filter(|p| !p.is_empty()) {
                Some(port) => format!("{}:{}", h, port),
                None => h.to_string(),
            })
            .collect();

        let mut config = DatabaseConfig {
            db_type,
            servers,
            sentinel_ports: Vec::new(),
            sentinel_master_names: Vec::new(),
        };
        if db_type.uses_sentinel() {
            config.sentinel_ports = sentinel_port
                .unwrap_or_default()
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect();
            if let Some(names) = non_empty(SENTINEL_MASTER_NAME_ENV) {
                config.sentinel_master_names = names.split(',').map(str::to_string).collect();
            }
        }
        Ok(Some(config))
    }

    /// Configured servers, or `localhost:6379` when none are configured
    pub fn server_addresses(&self) -> Result<Vec<HostAndPort>, ConfigError> {
        if self.servers.is_empty() {
            return Ok(vec![HostAndPort::new(DEFAULT_HOST, DEFAULT_PORT)]);
        }
        self.servers
            .iter()
            .map(|s| {
                HostAndPort::parse(s, DEFAULT_PORT).map_err(|e| {
                    ConfigError::ValidationError(format!("Invalid server address {}: {}", s, e))
                })
            })
            .collect()
    }

    pub fn address_count(&self) -> usize {
        self.servers.len().max(1)
    }

    /// Sentinel of the server at `index`: its host with the sentinel port
    pub fn sentinel_address(&self, index: usize) -> Result<Option<HostAndPort>, ConfigError> {
        let servers = self.server_addresses()?;
        let port = self
            .sentinel_ports
            .get(index)
            .copied()
            .unwrap_or(DEFAULT_SENTINEL_PORT);
        Ok(servers
            .get(index)
            .map(|server| HostAndPort::new(server.host(), port)))
    }

    pub fn sentinel_master_name(&self, index: usize) -> String {
        self.sentinel_master_names
            .get(index)
            .filter(|n| !n.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_SENTINEL_MASTER_NAME.to_string())
    }
}

/// Dispatcher timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delay before reconnecting a lost or failed connection
    pub connection_retry_ms: u64,
    /// Delay before re-probing a live connection that failed verification
    pub verification_retry_ms: u64,
    /// Delay before reconnecting a cluster
    pub cluster_retry_ms: u64,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// MOVED/ASK redirections followed per command
    pub max_redirects: u8,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            connection_retry_ms: 1000,
            verification_retry_ms: 10_000,
            cluster_retry_ms: 1000,
            connect_timeout_ms: 5000,
            max_redirects: 5,
        }
    }
}

impl DispatcherConfig {
    pub fn connection_retry(&self) -> Duration {
        Duration::from_millis(self.connection_retry_ms)
    }

    pub fn verification_retry(&self) -> Duration {
        Duration::from_millis(self.verification_retry_ms)
    }

    pub fn cluster_retry(&self) -> Duration {
        Duration::from_millis(self.cluster_retry_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            dispatcher: DispatcherConfig::default(),
            logging: LoggingConfig::default(),
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

    /// File configuration (or defaults) with `DBAAS_*` environment overrides applied
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the database section when the environment configures one
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<bool, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match DatabaseConfig::from_env(lookup)? {
            Some(database) => {
                self.database = database;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let servers = self.database.server_addresses()?;
        if self.database.db_type == DbType::RedisSentinel && servers.len() > 1 {
            return Err(ConfigError::ValidationError(
                "redis-sentinel takes exactly one server".to_string(),
            ));
        }

        let dispatcher = &self.dispatcher;
        for (name, value) in [
            ("connection_retry_ms", dispatcher.connection_retry_ms),
            ("verification_retry_ms", dispatcher.verification_retry_ms),
            ("cluster_retry_ms", dispatcher.cluster_retry_ms),
            ("connect_timeout_ms", dispatcher.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        if dispatcher.max_redirects == 0 {
            return Err(ConfigError::ValidationError(
                "max_redirects must be greater than 0".to_string(),
            ));
        }

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

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, db_type: &str) -> Result<(), ConfigError> {
        let db_type: DbType = db_type.parse()?;
        let servers = match db_type {
            DbType::RedisStandalone | DbType::RedisSentinel => vec!["10.0.1.20".to_string()],
            _ => vec![
                "10.0.1.20:6379".to_string(),
                "10.0.1.21:6379".to_string(),
                "10.0.1.22:6379".to_string(),
            ],
        };
        let sentinel_count = if db_type.uses_sentinel() { servers.len() } else { 0 };
        let config = Config {
            database: DatabaseConfig {
                db_type,
                sentinel_ports: vec![DEFAULT_SENTINEL_PORT; sentinel_count],
                sentinel_master_names: vec![DEFAULT_SENTINEL_MASTER_NAME.to_string(); sentinel_count],
                servers,
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

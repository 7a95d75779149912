//! Configuration management
//!
//! Everything a store instance needs besides the connection pool: table
//! prefix, region, dialect, ordering mode, codec and the trusted-type
//! allow-list. Values come from defaults, a TOML file, or `MSGSTORE_*`
//! environment variables, and are validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::codec::CodecKind;
use crate::storage::Dialect;

/// Default prefix prepended to every table name
pub const DEFAULT_TABLE_PREFIX: &str = "INT_";

/// Default region
pub const DEFAULT_REGION: &str = "DEFAULT";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// Maximum pooled connections
    pub pool_size: u32,

    /// How long `pool.get()` waits for a free connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// How long a statement waits on a locked database before failing
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Settings shared by the channel and group stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Substituted for `%PREFIX%` in every query
    pub table_prefix: String,

    /// Namespace for all rows written and read by this instance
    pub region: String,

    pub dialect: Dialect,

    /// Poll by `MESSAGE_PRIORITY` before creation order
    pub priority_enabled: bool,

    /// Exclude polled-but-unacknowledged ids from subsequent polls
    pub id_cache_enabled: bool,

    pub codec: CodecKind,

    /// Payload type patterns accepted on deserialization (`*` wildcard)
    pub trusted_types: Vec<String>,

    /// Run the schema probe on `start()`
    pub check_schema_on_start: bool,

    /// Rows fetched per round trip when streaming or iterating groups
    pub page_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub json_format: bool,

    pub with_timestamp: bool,

    pub with_target: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./msgstore.db"),
            pool_size: 8,
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            region: DEFAULT_REGION.to_string(),
            dialect: Dialect::Sqlite,
            priority_enabled: false,
            id_cache_enabled: false,
            codec: CodecKind::Binary,
            trusted_types: Vec::new(),
            check_schema_on_start: true,
            page_size: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl StoreConfig {
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_priority(mut self, enabled: bool) -> Self {
        self.priority_enabled = enabled;
        self
    }

    pub fn with_id_cache(mut self, enabled: bool) -> Self {
        self.id_cache_enabled = enabled;
        self
    }

    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_trusted_types<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_types = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema_check(mut self, enabled: bool) -> Self {
        self.check_schema_on_start = enabled;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Validate store settings
    ///
    /// The prefix is spliced into SQL text, so it is restricted to
    /// identifier characters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "region must not be empty".to_string(),
            ));
        }

        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::ValidationFailed(format!(
                "table_prefix '{}' may only contain letters, digits and '_'",
                self.table_prefix
            )));
        }

        if self.page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "page_size must be greater than 0".to_string(),
            ));
        }

        if self.trusted_types.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "trusted_types must not contain empty patterns".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_override<T>(key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = env::var(key) {
        *target = raw.parse().map_err(|e| ConfigError::invalid(key, e))?;
    }
    Ok(())
}

fn env_duration(key: &str, target: &mut Duration) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(key) {
        *target = humantime_serde::re::humantime::parse_duration(&raw)
            .map_err(|e| ConfigError::invalid(key, e))?;
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: MSGSTORE_<SECTION>_<KEY>
    /// Example: MSGSTORE_STORE_REGION=orders
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay any `MSGSTORE_*` variables onto this configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Database config
        if let Ok(path) = env::var("MSGSTORE_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        env_override("MSGSTORE_DATABASE_POOL_SIZE", &mut self.database.pool_size)?;
        env_duration(
            "MSGSTORE_DATABASE_CONNECTION_TIMEOUT",
            &mut self.database.connection_timeout,
        )?;
        env_duration("MSGSTORE_DATABASE_BUSY_TIMEOUT", &mut self.database.busy_timeout)?;

        // Store config
        if let Ok(prefix) = env::var("MSGSTORE_STORE_TABLE_PREFIX") {
            self.store.table_prefix = prefix;
        }
        if let Ok(region) = env::var("MSGSTORE_STORE_REGION") {
            self.store.region = region;
        }
        env_override("MSGSTORE_STORE_DIALECT", &mut self.store.dialect)?;
        env_override("MSGSTORE_STORE_PRIORITY_ENABLED", &mut self.store.priority_enabled)?;
        env_override("MSGSTORE_STORE_ID_CACHE_ENABLED", &mut self.store.id_cache_enabled)?;
        env_override("MSGSTORE_STORE_CODEC", &mut self.store.codec)?;
        if let Ok(patterns) = env::var("MSGSTORE_STORE_TRUSTED_TYPES") {
            self.store.trusted_types = patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        env_override(
            "MSGSTORE_STORE_CHECK_SCHEMA_ON_START",
            &mut self.store.check_schema_on_start,
        )?;
        env_override("MSGSTORE_STORE_PAGE_SIZE", &mut self.store.page_size)?;

        // Logging config
        if let Ok(level) = env::var("MSGSTORE_LOG_LEVEL") {
            self.logging.level = level;
        }
        env_override("MSGSTORE_LOG_JSON", &mut self.logging.json_format)?;

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        self.store.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }
}

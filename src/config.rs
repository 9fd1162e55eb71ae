//! Configuration module for mdstore.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::storage::{QuotaLimits, DEFAULT_MAX_FILES, DEFAULT_SPACE_LIMIT};
use crate::{Result, StoreError};

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Per-user directories under `storage.path`.
    #[default]
    Filesystem,
    /// The `documents` table of the configured database.
    Relational,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: BackendKind,
    /// Base directory for the filesystem backend.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "data/documents".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: default_storage_path(),
        }
    }
}

/// Database configuration for the relational backend.
///
/// Either `url` is set, or the connection is assembled from the individual
/// fields.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL (takes precedence over the fields below).
    #[serde(default)]
    pub url: Option<String>,
    /// Database host (or file path for SQLite).
    #[serde(default)]
    pub host: String,
    /// Database port.
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// User name.
    #[serde(default)]
    pub user: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Database name.
    #[serde(default = "default_db_name")]
    pub name: String,
    /// TLS mode (disable, allow, prefer, require, verify-ca, verify-full).
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
    /// Maximum number of open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Number of connections kept open while idle.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Maximum lifetime of a connection in seconds.
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    /// Idle connections above `min_connections` are closed after this many seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Time to wait for a free connection in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// Deadline for a single storage operation in seconds.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "mdstore".to_string()
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    25
}

fn default_min_connections() -> u32 {
    0
}

fn default_max_lifetime() -> u64 {
    300 // 5 minutes
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_query_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    /// Maximum connection lifetime.
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Acquire timeout.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Per-operation deadline.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: String::new(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            name: default_db_name(),
            sslmode: default_sslmode(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            max_lifetime_secs: default_max_lifetime(),
            idle_timeout_secs: default_idle_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

/// Per-user quota configuration (filesystem backend).
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Maximum total size of a user's documents in bytes.
    #[serde(default = "default_space_bytes")]
    pub space_bytes: u64,
    /// Maximum number of documents per user.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_space_bytes() -> u64 {
    DEFAULT_SPACE_LIMIT
}

fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}

impl QuotaConfig {
    /// Quota ceilings for the storage backend.
    pub fn limits(&self) -> QuotaLimits {
        QuotaLimits {
            space_bytes: self.space_bytes,
            max_files: self.max_files,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            space_bytes: default_space_bytes(),
            max_files: default_max_files(),
        }
    }
}

/// Rate limit configuration for document creation.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// Maximum creations per window.
    #[serde(default = "default_rate_max_actions")]
    pub max_actions: u32,
    /// Window length in seconds.
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
}

fn default_rate_max_actions() -> u32 {
    5
}

fn default_rate_window() -> u64 {
    5
}

impl RateLimitSection {
    /// Limiter configuration.
    pub fn limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.max_actions, Duration::from_secs(self.window_secs))
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_actions: default_rate_max_actions(),
            window_secs: default_rate_window(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/mdstore.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Quota configuration.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Rate limit configuration.
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StoreError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `MDSTORE_STORAGE_PATH`
    /// - `MDSTORE_DB_URL`, `MDSTORE_DB_HOST`, `MDSTORE_DB_PORT`, `MDSTORE_DB_USER`,
    ///   `MDSTORE_DB_PASSWORD`, `MDSTORE_DB_NAME`, `MDSTORE_DB_SSLMODE`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(path) = get("MDSTORE_STORAGE_PATH") {
            self.storage.path = path;
        }
        if let Some(url) = get("MDSTORE_DB_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = get("MDSTORE_DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = get("MDSTORE_DB_PORT").and_then(|p| p.parse().ok()) {
            self.database.port = port;
        }
        if let Some(user) = get("MDSTORE_DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = get("MDSTORE_DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(name) = get("MDSTORE_DB_NAME") {
            self.database.name = name;
        }
        if let Some(sslmode) = get("MDSTORE_DB_SSLMODE") {
            self.database.sslmode = sslmode;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.quota.space_bytes == 0 || self.quota.max_files == 0 {
            return Err(StoreError::Config(
                "quota.space_bytes and quota.max_files must be positive".to_string(),
            ));
        }
        if self.rate_limit.max_actions == 0 || self.rate_limit.window_secs == 0 {
            return Err(StoreError::Config(
                "rate_limit.max_actions and rate_limit.window_secs must be positive".to_string(),
            ));
        }
        if self.storage.backend == BackendKind::Filesystem && self.storage.path.is_empty() {
            return Err(StoreError::Config("storage.path is not set".to_string()));
        }
        if self.storage.backend == BackendKind::Relational {
            let has_url = self.database.url.as_ref().is_some_and(|u| !u.is_empty());
            if !has_url && self.database.host.is_empty() {
                return Err(StoreError::Config(
                    "relational backend needs database.url or database.host. \
                     Set it in config.toml or via MDSTORE_DB_URL / MDSTORE_DB_HOST."
                        .to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(StoreError::Config(
                    "database.max_connections must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.storage.backend, BackendKind::Filesystem);
        assert_eq!(config.storage.path, "data/documents");

        assert!(config.database.url.is_none());
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.name, "mdstore");
        assert_eq!(config.database.sslmode, "disable");
        assert_eq!(config.database.max_connections, 25);
        assert_eq!(config.database.max_lifetime(), Duration::from_secs(300));
        assert_eq!(config.database.query_timeout(), Duration::from_secs(30));

        assert_eq!(config.quota.space_bytes, 1024);
        assert_eq!(config.quota.max_files, 3);

        assert_eq!(config.rate_limit.max_actions, 5);
        assert_eq!(config.rate_limit.window_secs, 5);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/mdstore.log");

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[storage]
backend = "relational"
path = "custom/docs"

[database]
host = "db.internal"
port = 6543
user = "notes"
password = "secret"
name = "notes"
sslmode = "require"
max_connections = 10
min_connections = 2
max_lifetime_secs = 60
idle_timeout_secs = 30
acquire_timeout_secs = 3
query_timeout_secs = 4

[quota]
space_bytes = 4096
max_files = 10

[rate_limit]
max_actions = 20
window_secs = 60

[logging]
level = "debug"
file = "custom/logs/app.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.storage.backend, BackendKind::Relational);
        assert_eq!(config.storage.path, "custom/docs");
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.user, "notes");
        assert_eq!(config.database.password, "secret");
        assert_eq!(config.database.sslmode, "require");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.min_connections, 2);
        assert_eq!(config.database.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.acquire_timeout(), Duration::from_secs(3));
        assert_eq!(config.database.query_timeout(), Duration::from_secs(4));
        assert_eq!(
            config.quota.limits(),
            QuotaLimits {
                space_bytes: 4096,
                max_files: 10
            }
        );
        assert_eq!(
            config.rate_limit.limiter_config(),
            RateLimitConfig::new(20, Duration::from_secs(60))
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[quota]
max_files = 7
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.quota.max_files, 7);
        assert_eq!(config.quota.space_bytes, 1024);
        assert_eq!(config.storage.backend, BackendKind::Filesystem);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.storage.path, "data/documents");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = Config::parse("this is not valid toml [[[");
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_parse_unknown_backend() {
        let result = Config::parse("[storage]\nbackend = \"s3\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\npath = \"/srv/docs\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.path, "/srv/docs");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MDSTORE_STORAGE_PATH", "/var/lib/docs"),
            ("MDSTORE_DB_HOST", "pg"),
            ("MDSTORE_DB_PORT", "15432"),
            ("MDSTORE_DB_PASSWORD", "hunter2"),
            ("MDSTORE_DB_NAME", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.path, "/var/lib/docs");
        assert_eq!(config.database.host, "pg");
        assert_eq!(config.database.port, 15432);
        assert_eq!(config.database.password, "hunter2");
        // Empty values are ignored
        assert_eq!(config.database.name, "mdstore");
    }

    #[test]
    fn test_override_bad_port_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "MDSTORE_DB_PORT").then(|| "abc".to_string()));
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn test_validate_relational_without_connection() {
        let mut config = Config::default();
        config.storage.backend = BackendKind::Relational;
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));

        config.database.url = Some("postgres://localhost/mdstore".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_limits() {
        let mut config = Config::default();
        config.quota.max_files = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
    }
}

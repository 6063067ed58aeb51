//! Configuration file structure
//!
//! Loaded from a JSON file. Every field has a default, so `{}` is a valid
//! configuration for a local PostgreSQL named `pixelvault`.
//!
//! The database password may be supplied by the `PIXELVAULT_DB_PASSWORD` or
//! `PGPASSWORD` environment variables instead of the file; the environment
//! wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ConnectionSettings;
use crate::integrity::IntegrityThresholds;
use crate::sql::is_valid_identifier;
use crate::store::TableLayout;

/// Environment variables consulted for the database password, in order
pub const PASSWORD_ENV_VARS: [&str; 2] = ["PIXELVAULT_DB_PASSWORD", "PGPASSWORD"];

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid config JSON: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "PV_CONFIG_READ",
            ConfigError::Parse(_) => "PV_CONFIG_PARSE",
            ConfigError::Invalid(_) => "PV_CONFIG_INVALID",
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub backups: BackupConfig,

    #[serde(default)]
    pub integrity: IntegrityConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration text
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.database
            .layout()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !is_valid_identifier(&self.database.settings_table) {
            return Err(ConfigError::Invalid(format!(
                "settings_table '{}' is not a valid identifier",
                self.database.settings_table
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be > 0".into()));
        }

        if self.connection.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect_delay_ms must be > 0".into()));
        }
        if self.connection.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid("max_reconnect_attempts must be > 0".into()));
        }
        if self.connection.backoff_multiplier == 0 {
            return Err(ConfigError::Invalid("backoff_multiplier must be > 0".into()));
        }
        if self.connection.health_interval_ms == 0 || self.connection.status_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "health_interval_ms and status_timeout_ms must be > 0".into(),
            ));
        }

        if self.backups.keep == 0 {
            return Err(ConfigError::Invalid("backups.keep must be > 0".into()));
        }
        if let Some(schedule) = &self.backups.schedule {
            croner::Cron::new(schedule)
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("backups.schedule: {}", e)))?;
        }

        if self.integrity.interval_secs == 0 {
            return Err(ConfigError::Invalid("integrity.interval_secs must be > 0".into()));
        }
        let ratio = self.integrity.partial_loss_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "integrity.partial_loss_ratio must be in (0, 1), got {}",
                ratio
            )));
        }

        Ok(())
    }
}

/// Database connection and table layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    /// Prefer the environment; see [`PASSWORD_ENV_VARS`]
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    #[serde(default = "default_natural_key")]
    pub natural_key: String,

    #[serde(default = "default_timestamp_columns")]
    pub timestamp_columns: Vec<String>,

    #[serde(default = "default_settings_table")]
    pub settings_table: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_user() -> String {
    "postgres".to_string()
}
fn default_database() -> String {
    "pixelvault".to_string()
}
fn default_table() -> String {
    "images".to_string()
}
fn default_primary_key() -> String {
    "id".to_string()
}
fn default_natural_key() -> String {
    "path".to_string()
}
fn default_timestamp_columns() -> Vec<String> {
    vec!["created_at".to_string(), "updated_at".to_string()]
}
fn default_settings_table() -> String {
    "settings".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            database: default_database(),
            table: default_table(),
            primary_key: default_primary_key(),
            natural_key: default_natural_key(),
            timestamp_columns: default_timestamp_columns(),
            settings_table: default_settings_table(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    /// Password from the environment, falling back to the file
    pub fn password(&self) -> Option<String> {
        PASSWORD_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .or_else(|| self.password.clone())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn layout(&self) -> TableLayout {
        TableLayout {
            table: self.table.clone(),
            primary_key: self.primary_key.clone(),
            natural_key: self.natural_key.clone(),
            timestamp_columns: self.timestamp_columns.clone(),
        }
    }
}

/// Reconnection and health probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Retry period multiplier once `max_reconnect_attempts` is exceeded
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    10_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_backoff_multiplier() -> u32 {
    3
}
fn default_health_interval_ms() -> u64 {
    30_000
}
fn default_status_timeout_ms() -> u64 {
    3_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            health_interval_ms: default_health_interval_ms(),
            status_timeout_ms: default_status_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            backoff_multiplier: self.backoff_multiplier,
            health_interval: Duration::from_millis(self.health_interval_ms),
            status_timeout: Duration::from_millis(self.status_timeout_ms),
        }
    }
}

/// Backup artifacts, native tools and scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Artifact directory, relative to the working directory
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Artifacts kept by retention
    #[serde(default = "default_keep")]
    pub keep: usize,

    /// Cron expression for scheduled backups; `null` disables them
    #[serde(default = "default_schedule")]
    pub schedule: Option<String>,

    /// Set false to always use the built-in SQL generator and parser
    #[serde(default = "default_use_native_tools")]
    pub use_native_tools: bool,

    #[serde(default = "default_dump_binary")]
    pub dump_binary: String,

    #[serde(default = "default_restore_binary")]
    pub restore_binary: String,

    #[serde(default = "default_tool_probe_timeout_ms")]
    pub tool_probe_timeout_ms: u64,

    #[serde(default = "default_tool_run_timeout_secs")]
    pub tool_run_timeout_secs: u64,
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}
fn default_keep() -> usize {
    10
}
fn default_schedule() -> Option<String> {
    Some("0 3 * * *".to_string())
}
fn default_use_native_tools() -> bool {
    true
}
fn default_dump_binary() -> String {
    "pg_dump".to_string()
}
fn default_restore_binary() -> String {
    "psql".to_string()
}
fn default_tool_probe_timeout_ms() -> u64 {
    5_000
}
fn default_tool_run_timeout_secs() -> u64 {
    600
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            keep: default_keep(),
            schedule: default_schedule(),
            use_native_tools: default_use_native_tools(),
            dump_binary: default_dump_binary(),
            restore_binary: default_restore_binary(),
            tool_probe_timeout_ms: default_tool_probe_timeout_ms(),
            tool_run_timeout_secs: default_tool_run_timeout_secs(),
        }
    }
}

impl BackupConfig {
    pub fn tool_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_probe_timeout_ms)
    }

    pub fn tool_run_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_run_timeout_secs)
    }

    /// Path of the integrity incident log
    pub fn incident_log_path(&self) -> PathBuf {
        self.dir.join("integrity-incidents.log")
    }
}

/// Record-count monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default = "default_integrity_interval_secs")]
    pub interval_secs: u64,

    /// Partial loss is only considered above this many records
    #[serde(default = "default_partial_loss_floor")]
    pub partial_loss_floor: u64,

    /// Partial loss when the count falls below this fraction of the last one
    #[serde(default = "default_partial_loss_ratio")]
    pub partial_loss_ratio: f64,
}

fn default_integrity_interval_secs() -> u64 {
    30 * 60
}
fn default_partial_loss_floor() -> u64 {
    10
}
fn default_partial_loss_ratio() -> f64 {
    0.5
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_integrity_interval_secs(),
            partial_loss_floor: default_partial_loss_floor(),
            partial_loss_ratio: default_partial_loss_ratio(),
        }
    }
}

impl IntegrityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn thresholds(&self) -> IntegrityThresholds {
        IntegrityThresholds {
            partial_loss_floor: self.partial_loss_floor,
            partial_loss_ratio: self.partial_loss_ratio,
        }
    }
}

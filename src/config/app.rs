//! Main application configuration
//!
//! Settings come from a TOML file (or defaults), then individual fields are
//! overridden from environment variables, then the whole thing is validated.

use crate::coordinator::DEFAULT_SKIP_DISTANCE;
use crate::estimate::EstimatorConfig;
use crate::types::TableName;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub storage: StorageSettings,
    pub estimation: EstimatorConfig,
    pub scheduling: SchedulingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Address the HTTP API binds to
    pub http_host: String,
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// How often cached estimates are recomputed as the event clock runs
    pub estimate_refresh_interval_seconds: u64,
}

/// Where state lives on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// One line of comma separated entity ids
    pub roster_path: PathBuf,
    /// Correction history CSV
    pub history_path: PathBuf,
    /// Last operation counter, so polling tokens survive a restart.
    /// Defaults to `<history_path>.counter`.
    pub counter_path: Option<PathBuf>,
    /// Tables in display order
    pub tables: Vec<TableSettings>,
    /// Copy the previous file to `<file>.bak` before overwriting it
    pub backup_before_write: bool,
    /// Persist a running service instead of dumping the table as idle
    pub keep_active_service: bool,
}

/// One configured table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSettings {
    pub name: TableName,
    /// Snapshot file of this table
    pub path: PathBuf,
    /// Used when the snapshot file does not exist yet
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub operators: Vec<String>,
}

/// Queue policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingSettings {
    /// Places a skipped entity moves back in its queue
    pub skip_distance: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "table-coordinator".to_string(),
            log_level: "info".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
            estimate_refresh_interval_seconds: 60,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            roster_path: PathBuf::from("data/roster.csv"),
            history_path: PathBuf::from("data/history.csv"),
            counter_path: None,
            tables: Vec::new(),
            backup_before_write: true,
            keep_active_service: false,
        }
    }
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            skip_distance: DEFAULT_SKIP_DISTANCE,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load a TOML configuration file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Parse TOML without environment overrides or validation
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Override individual fields from environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(host) = env::var("HTTP_HOST") {
            self.service.http_host = host;
        }
        override_from_env("HTTP_PORT", &mut self.service.http_port)?;
        override_from_env(
            "SHUTDOWN_TIMEOUT_SECONDS",
            &mut self.service.shutdown_timeout_seconds,
        )?;
        override_from_env(
            "ESTIMATE_REFRESH_INTERVAL_SECONDS",
            &mut self.service.estimate_refresh_interval_seconds,
        )?;

        // Storage settings
        if let Ok(path) = env::var("ROSTER_PATH") {
            self.storage.roster_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("HISTORY_PATH") {
            self.storage.history_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("COUNTER_PATH") {
            self.storage.counter_path = Some(PathBuf::from(path));
        }
        override_from_env("BACKUP_BEFORE_WRITE", &mut self.storage.backup_before_write)?;
        override_from_env("KEEP_ACTIVE_SERVICE", &mut self.storage.keep_active_service)?;

        // Estimation settings
        override_from_env("MIN_SAMPLE_COUNT", &mut self.estimation.min_sample_count)?;
        override_from_env(
            "APRIORI_DURATION_SECONDS",
            &mut self.estimation.a_priori_duration_seconds,
        )?;
        override_from_env(
            "MIN_DURATION_SECONDS",
            &mut self.estimation.min_duration_seconds,
        )?;
        override_from_env(
            "MAX_DURATION_SECONDS",
            &mut self.estimation.max_duration_seconds,
        )?;
        override_from_env("EVENT_START", &mut self.estimation.event_start)?;
        override_from_env("EVENT_END", &mut self.estimation.event_end)?;

        // Scheduling settings
        override_from_env("SKIP_DISTANCE", &mut self.scheduling.skip_distance)?;

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get the estimate refresh interval as Duration
    pub fn estimate_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.service.estimate_refresh_interval_seconds)
    }

    /// `host:port` the HTTP API binds to
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http_host, self.service.http_port)
    }
}

fn override_from_env<T: FromStr>(name: &str, target: &mut T) -> Result<()> {
    if let Ok(value) = env::var(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {}", name, value))?;
    }
    Ok(())
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports and intervals
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.service.estimate_refresh_interval_seconds == 0 {
        return Err(anyhow!("Estimate refresh interval must be greater than 0"));
    }

    // Validate storage
    if config.storage.history_path.as_os_str().is_empty() {
        return Err(anyhow!("History path cannot be empty"));
    }
    let mut names = HashSet::new();
    for table in &config.storage.tables {
        if table.name.trim().is_empty() {
            return Err(anyhow!("Table name cannot be empty"));
        }
        if !names.insert(table.name.as_str()) {
            return Err(anyhow!("Duplicate table name: {}", table.name));
        }
    }

    config.estimation.validate()?;

    if config.scheduling.skip_distance == 0 {
        return Err(anyhow!("Skip distance must be greater than 0"));
    }

    Ok(())
}

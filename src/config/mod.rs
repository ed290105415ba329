//! Configuration Management
//!
//! Loads botkeeper configuration from TOML files.
//! Configuration includes:
//! - Health monitor cadence, history size and alert thresholds
//! - Recovery scheduler settings (autonomy, cleanup directories, cooldowns)
//! - Director settings (status broadcast cadence, agent polling, reaping)
//! - Server bind address and logging

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub director: DirectorConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between background samples
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    /// Maximum number of snapshots kept in history
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Number of recent snapshots used for trends and averages
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// How long `stop()` waits for the sampling loop to exit
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    /// Filesystem whose usage is reported as disk_pct
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            history_cap: default_history_cap(),
            trend_window: default_trend_window(),
            stop_timeout_secs: default_stop_timeout(),
            disk_path: default_disk_path(),
            thresholds: Thresholds::default(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Critical thresholds; a sample strictly above a threshold raises an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu_threshold")]
    pub cpu_pct: f64,
    #[serde(default = "default_memory_threshold")]
    pub memory_pct: f64,
    #[serde(default = "default_disk_threshold")]
    pub disk_pct: f64,
    #[serde(default = "default_response_threshold")]
    pub response_time_secs: f64,
    /// Fraction of failed operations, 0.0..=1.0
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_pct: default_cpu_threshold(),
            memory_pct: default_memory_threshold(),
            disk_pct: default_disk_threshold(),
            response_time_secs: default_response_threshold(),
            error_rate: default_error_rate_threshold(),
        }
    }
}

/// Recovery scheduler and built-in action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Whether alerts schedule recovery actions automatically
    #[serde(default = "default_true")]
    pub autonomy_enabled: bool,
    /// Directories scanned by temp-file cleanup
    #[serde(default = "default_temp_dirs")]
    pub temp_dirs: Vec<PathBuf>,
    /// Directories scanned by log cleanup
    #[serde(default = "default_log_dirs")]
    pub log_dirs: Vec<PathBuf>,
    #[serde(default = "default_temp_max_age_hours")]
    pub temp_max_age_hours: u64,
    #[serde(default = "default_log_max_age_days")]
    pub log_max_age_days: u64,
    /// Directory depth walked by the cleanup actions
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,
    /// Allow performance optimization to lower this process's priority
    #[serde(default = "default_true")]
    pub lower_priority: bool,
    /// Reclaim passes run by memory cleanup
    #[serde(default = "default_reclaim_passes")]
    pub reclaim_passes: u32,
    /// Per-action cooldown overrides in seconds, keyed by action name
    #[serde(default)]
    pub cooldowns: BTreeMap<String, u64>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            autonomy_enabled: true,
            temp_dirs: default_temp_dirs(),
            log_dirs: default_log_dirs(),
            temp_max_age_hours: default_temp_max_age_hours(),
            log_max_age_days: default_log_max_age_days(),
            scan_depth: default_scan_depth(),
            lower_priority: true,
            reclaim_passes: default_reclaim_passes(),
            cooldowns: BTreeMap::new(),
        }
    }
}

/// Director configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorConfig {
    /// Seconds between periodic status_update broadcasts
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    /// Agent queue poll timeout; bounds how long a stop takes to be observed
    #[serde(default = "default_poll_timeout_ms")]
    pub agent_poll_timeout_ms: u64,
    /// Maximum command history entries kept
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Entries kept when a memory reclaim pass trims the history
    #[serde(default = "default_history_keep_on_reclaim")]
    pub history_keep_on_reclaim: usize,
    /// Remove agents that have been stopped for longer than this. Disabled when unset.
    #[serde(default)]
    pub agent_ttl_secs: Option<u64>,
    /// Per-listener event buffer before a slow listener is dropped
    #[serde(default = "default_listener_buffer")]
    pub listener_buffer: usize,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: default_status_interval(),
            agent_poll_timeout_ms: default_poll_timeout_ms(),
            history_limit: default_history_limit(),
            history_keep_on_reclaim: default_history_keep_on_reclaim(),
            agent_ttl_secs: None,
            listener_buffer: default_listener_buffer(),
        }
    }
}

impl DirectorConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn agent_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_poll_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::Text,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_monitor_interval() -> u64 {
    30
}
fn default_history_cap() -> usize {
    100
}
fn default_trend_window() -> usize {
    10
}
fn default_stop_timeout() -> u64 {
    5
}
fn default_disk_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:\\")
    } else {
        PathBuf::from("/")
    }
}
fn default_cpu_threshold() -> f64 {
    90.0
}
fn default_memory_threshold() -> f64 {
    85.0
}
fn default_disk_threshold() -> f64 {
    95.0
}
fn default_response_threshold() -> f64 {
    5.0
}
fn default_error_rate_threshold() -> f64 {
    0.1
}
fn default_temp_dirs() -> Vec<PathBuf> {
    vec![
        std::env::temp_dir().join("botkeeper"),
        PathBuf::from("tmp"),
        PathBuf::from("temp"),
    ]
}
fn default_log_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("logs")];
    if let Some(data) = dirs::data_local_dir() {
        dirs.push(data.join("botkeeper").join("logs"));
    }
    dirs
}
fn default_temp_max_age_hours() -> u64 {
    24
}
fn default_log_max_age_days() -> u64 {
    7
}
fn default_scan_depth() -> usize {
    2
}
fn default_reclaim_passes() -> u32 {
    3
}
fn default_status_interval() -> u64 {
    5
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_history_limit() -> usize {
    1000
}
fn default_history_keep_on_reclaim() -> usize {
    100
}
fn default_listener_buffer() -> usize {
    256
}
fn default_bind() -> String {
    "127.0.0.1:8765".to_string()
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `path`, or from the default locations when no
    /// path is given, then apply `BOTKEEPER_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let mut default_paths = vec![PathBuf::from("botkeeper.toml")];
                if let Some(home) = dirs::home_dir() {
                    default_paths.push(home.join(".config/botkeeper/config.toml"));
                }

                let mut loaded = None;
                for p in &default_paths {
                    if p.is_file() {
                        loaded = Some(Self::from_file(p)?);
                        break;
                    }
                }
                loaded.unwrap_or_else(|| {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                })
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Override fields from environment-style variables supplied by `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("BOTKEEPER_BIND") {
            self.server.bind = bind;
        }
        if let Some(interval) = lookup("BOTKEEPER_MONITOR_INTERVAL") {
            if let Ok(n) = interval.parse::<u64>() {
                self.monitor.interval_secs = n;
            }
        }
        if let Some(autonomy) = lookup("BOTKEEPER_AUTONOMY") {
            match autonomy.to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.recovery.autonomy_enabled = true,
                "0" | "false" | "off" | "no" => self.recovery.autonomy_enabled = false,
                _ => {}
            }
        }
        if let Some(format) = lookup("BOTKEEPER_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.monitor.interval_secs == 0 {
            return Err(invalid("monitor.interval_secs", "must be greater than zero"));
        }
        if self.monitor.history_cap == 0 {
            return Err(invalid("monitor.history_cap", "must be greater than zero"));
        }
        if self.monitor.trend_window < 2 {
            return Err(invalid("monitor.trend_window", "must be at least 2"));
        }
        let t = &self.monitor.thresholds;
        for (field, value) in [
            ("monitor.thresholds.cpu_pct", t.cpu_pct),
            ("monitor.thresholds.memory_pct", t.memory_pct),
            ("monitor.thresholds.disk_pct", t.disk_pct),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(field, "must be between 0 and 100"));
            }
        }
        if !(0.0..=1.0).contains(&t.error_rate) {
            return Err(invalid("monitor.thresholds.error_rate", "must be between 0 and 1"));
        }
        if t.response_time_secs <= 0.0 {
            return Err(invalid(
                "monitor.thresholds.response_time_secs",
                "must be positive",
            ));
        }
        if self.director.status_interval_secs == 0 {
            return Err(invalid("director.status_interval_secs", "must be greater than zero"));
        }
        if self.director.agent_poll_timeout_ms == 0 {
            return Err(invalid("director.agent_poll_timeout_ms", "must be greater than zero"));
        }
        if self.director.history_limit == 0 {
            return Err(invalid("director.history_limit", "must be greater than zero"));
        }
        if self.director.listener_buffer == 0 {
            return Err(invalid("director.listener_buffer", "must be greater than zero"));
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid("server.bind", "must be a socket address like 127.0.0.1:8765"));
        }
        Ok(())
    }
}

//! Unit tests for configuration loading
//!
//! Tests cover:
//! - Defaults
//! - TOML files with partial sections
//! - Environment overrides
//! - Validation failures

use botkeeper::config::{Config, LogFormat};
use botkeeper::errors::ConfigError;
use std::collections::HashMap;
use std::io::Write;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
[monitor]
interval_secs = 10

[monitor.thresholds]
cpu_pct = 75.0

[director]
agent_ttl_secs = 600
"#,
    );
    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.monitor.interval_secs, 10);
    assert_eq!(config.monitor.thresholds.cpu_pct, 75.0);
    assert_eq!(config.monitor.thresholds.memory_pct, 85.0);
    assert_eq!(config.monitor.history_cap, 100);
    assert_eq!(config.director.agent_ttl_secs, Some(600));
    assert_eq!(config.director.history_limit, 1000);
    assert_eq!(config.server.bind, "127.0.0.1:8765");
}

#[test]
fn test_cooldown_overrides_parse() {
    let file = write_config(
        r#"
[recovery]
autonomy_enabled = false

[recovery.cooldowns]
clear_memory_cache = 5
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    assert!(!config.recovery.autonomy_enabled);
    assert_eq!(config.recovery.cooldowns.get("clear_memory_cache"), Some(&5));
}

#[test]
fn test_missing_file_is_read_error() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/botkeeper.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = write_config("[monitor\ninterval_secs = ");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_invalid_values_rejected() {
    let file = write_config("[monitor]\ninterval_secs = 0\n");
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("monitor.interval_secs"));
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = [
        ("BOTKEEPER_BIND", "0.0.0.0:9999"),
        ("BOTKEEPER_MONITOR_INTERVAL", "3"),
        ("BOTKEEPER_AUTONOMY", "off"),
        ("BOTKEEPER_LOG_FORMAT", "json"),
    ]
    .into_iter()
    .collect();

    let mut config = Config::default();
    config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
    assert_eq!(config.server.bind, "0.0.0.0:9999");
    assert_eq!(config.monitor.interval_secs, 3);
    assert!(!config.recovery.autonomy_enabled);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(config.validate().is_ok());
}

#[test]
fn test_unparseable_env_values_are_ignored() {
    let mut config = Config::default();
    config.apply_env_overrides(|key| match key {
        "BOTKEEPER_MONITOR_INTERVAL" => Some("soon".to_string()),
        "BOTKEEPER_AUTONOMY" => Some("maybe".to_string()),
        _ => None,
    });
    assert_eq!(config.monitor.interval_secs, 30);
    assert!(config.recovery.autonomy_enabled);
}

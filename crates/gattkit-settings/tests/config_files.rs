use gattkit_settings::{Config, ConfigError, SettingsError};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_toml_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::new();
    config.connection.reconnect_delay_ms = 500;
    config.connection.rssi_poll_interval_ms = 0;
    config.event_bus.enable_history = true;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.connection.reconnect_delay(), Duration::from_millis(500));
    assert_eq!(loaded.connection.rssi_poll_interval(), None);
}

#[test]
fn test_json_file_is_accepted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "gatt": { "default_timeout_ms": 2500 } }"#).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.gatt.default_timeout(), Duration::from_millis(2500));
    assert_eq!(loaded.connection, Default::default());
}

#[test]
fn test_save_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("gattkit").join("config.toml");

    Config::new().save_to_file(&path).unwrap();
    assert!(path.exists());
}

#[test]
fn test_unsupported_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");

    let err = Config::new().save_to_file(&path).unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Config(ConfigError::UnsupportedFormat(_))
    ));
    assert!(!path.exists());
}

#[test]
fn test_invalid_values_fail_to_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[event_bus]\nchannel_capacity = 0\n").unwrap();

    assert!(Config::load_from_file(&path).is_err());
}

#[test]
fn test_malformed_toml_reports_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[gatt\ndefault_timeout_ms = ").unwrap();

    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::TomlError(_))
    ));
}

#[test]
fn test_load_or_default_without_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");

    let config = Config::load_or_default(&path).unwrap();
    assert_eq!(config, Config::default());
}

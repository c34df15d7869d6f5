//! Configuration for the GattKit engine
//!
//! Configuration is organized into sections that mirror the engine's parts:
//! - Attribute transaction defaults
//! - Connection lifecycle tuning (reconnect delay, connect timeout, RSSI polling)
//! - Event bus channel and history settings
//!
//! Files may be JSON or TOML, chosen by extension. Missing keys fall back to
//! their defaults so partial files are accepted.

use crate::error::{ConfigError, SettingsError, SettingsResult};
use gattkit_core::constants::{
    CONNECTED_RSSI_READ_INTERVAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_DELAY,
    DEFAULT_TRANSACTION_TIMEOUT,
};
use gattkit_core::EventBusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attribute transaction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattSettings {
    /// Deadline applied when a request does not carry its own, in milliseconds
    pub default_timeout_ms: u64,
}

impl Default for GattSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl GattSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Connection lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Pause before reconnecting a device that is still wanted
    pub reconnect_delay_ms: u64,
    /// How long an explicit connect waits for the link
    pub connect_timeout_ms: u64,
    /// Interval between RSSI reads on connected devices; 0 disables polling
    pub rssi_poll_interval_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            rssi_poll_interval_ms: CONNECTED_RSSI_READ_INTERVAL.as_millis() as u64,
        }
    }
}

impl ConnectionSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when polling is switched off
    pub fn rssi_poll_interval(&self) -> Option<Duration> {
        (self.rssi_poll_interval_ms > 0).then(|| Duration::from_millis(self.rssi_poll_interval_ms))
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusSettings {
    /// Capacity of the broadcast channel behind `EventBus::receiver`
    pub channel_capacity: usize,
    /// Keep a history of reported events
    pub enable_history: bool,
    /// Maximum number of events kept in history
    pub max_history_size: usize,
    /// How long history entries are retained, in seconds
    pub history_retention_secs: u64,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        let defaults = EventBusConfig::default();
        Self {
            channel_capacity: defaults.channel_capacity,
            enable_history: defaults.enable_history,
            max_history_size: defaults.max_history_size,
            history_retention_secs: defaults.history_retention.as_secs(),
        }
    }
}

impl EventBusSettings {
    pub fn to_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            channel_capacity: self.channel_capacity,
            enable_history: self.enable_history,
            max_history_size: self.max_history_size,
            history_retention: Duration::from_secs(self.history_retention_secs),
        }
    }
}

/// On-disk file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a path's extension
    pub fn from_path(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )
            .into()),
        }
    }
}

/// Complete engine configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Attribute transaction settings
    pub gatt: GattSettings,
    /// Connection lifecycle settings
    pub connection: ConnectionSettings,
    /// Event bus settings
    pub event_bus: EventBusSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from text in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> SettingsResult<Self> {
        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Render the config in the given format
    pub fn render(&self, format: ConfigFormat) -> SettingsResult<String> {
        self.validate()?;
        Ok(match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content, format)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        let content = self.render(ConfigFormat::from_path(path)?)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.gatt.default_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "gatt.default_timeout_ms",
                "must be > 0",
            ));
        }

        if self.connection.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.connect_timeout_ms",
                "must be > 0",
            ));
        }

        if self.event_bus.channel_capacity == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "event_bus.channel_capacity".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if self.event_bus.enable_history && self.event_bus.max_history_size == 0 {
            return Err(SettingsError::invalid(
                "event_bus.max_history_size",
                "must be > 0 when history is enabled",
            ));
        }

        Ok(())
    }

    /// Platform config location, `<config dir>/gattkit/config.toml`
    pub fn default_config_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("gattkit").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no platform config directory".to_string())
            })
    }

    /// Load `path` if it exists, otherwise return defaults
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_engine_constants() {
        let config = Config::new();
        assert_eq!(config.gatt.default_timeout(), DEFAULT_TRANSACTION_TIMEOUT);
        assert_eq!(config.connection.reconnect_delay(), DEFAULT_RECONNECT_DELAY);
        assert_eq!(config.connection.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(
            config.connection.rssi_poll_interval(),
            Some(CONNECTED_RSSI_READ_INTERVAL)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_disables_polling() {
        let settings = ConnectionSettings {
            rssi_poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(settings.rssi_poll_interval(), None);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::new();
        config.gatt.default_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { .. })
        ));

        let mut config = Config::new();
        config.event_bus.channel_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::Config(ConfigError::ValueOutOfRange { .. }))
        ));

        let mut config = Config::new();
        config.event_bus.enable_history = true;
        config.event_bus.max_history_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::parse(
            "[connection]\nreconnect_delay_ms = 250\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.connection.reconnect_delay_ms, 250);
        assert_eq!(config.connection.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.gatt, GattSettings::default());
    }

    #[test]
    fn test_bus_config_conversion() {
        let settings = EventBusSettings {
            channel_capacity: 16,
            enable_history: true,
            max_history_size: 8,
            history_retention_secs: 60,
        };
        let bus = settings.to_bus_config();
        assert_eq!(bus.channel_capacity, 16);
        assert!(bus.enable_history);
        assert_eq!(bus.max_history_size, 8);
        assert_eq!(bus.history_retention, Duration::from_secs(60));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/b.json")).unwrap(),
            ConfigFormat::Json
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("b.toml")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(ConfigFormat::from_path(Path::new("b.yaml")).is_err());
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }
}

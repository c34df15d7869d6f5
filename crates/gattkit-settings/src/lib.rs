//! GattKit Settings Crate
//!
//! Loads, validates and saves engine configuration.

pub mod config;
pub mod error;

pub use config::{Config, ConfigFormat, ConnectionSettings, EventBusSettings, GattSettings};
pub use error::{ConfigError, SettingsError, SettingsResult};

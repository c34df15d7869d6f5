//! Data models for devices, attributes, and link state
//!
//! This module provides:
//! - Device identity and RSSI proximity buckets
//! - Attribute addressing (service + characteristic pairs)
//! - Connection state of a single peripheral link
//! - Central (adapter) power/availability state
//! - Operation kinds and write acknowledgement modes
//! - Payload helpers for callers that want typed values

pub mod attribute;
pub mod device;

pub use attribute::{GattValue, GattValueType, ServiceCharacteristic};
pub use device::{DeviceId, Proximity};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-level connection state of one peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No link to the peripheral
    #[default]
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Link established, attribute operations allowed
    Connected,
    /// Link teardown in progress
    Disconnecting,
}

impl ConnectionState {
    /// Whether attribute operations may be issued in this state
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Power/availability state of the local central (adapter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CentralState {
    /// State not yet reported by the transport
    #[default]
    Unknown,
    /// Adapter is resetting
    Resetting,
    /// Hardware does not support the protocol
    Unsupported,
    /// The process is not allowed to use the adapter
    Unauthorized,
    /// Adapter is switched off
    PoweredOff,
    /// Adapter is on and ready for connections
    PoweredOn,
}

impl CentralState {
    /// Only a powered-on central accepts connection requests
    pub fn is_ready(self) -> bool {
        matches!(self, CentralState::PoweredOn)
    }
}

impl fmt::Display for CentralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentralState::Unknown => write!(f, "unknown"),
            CentralState::Resetting => write!(f, "resetting"),
            CentralState::Unsupported => write!(f, "unsupported"),
            CentralState::Unauthorized => write!(f, "unauthorized"),
            CentralState::PoweredOff => write!(f, "powered off"),
            CentralState::PoweredOn => write!(f, "powered on"),
        }
    }
}

/// Kind of attribute operation a transaction performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Read the attribute value
    Get,
    /// Write a payload to the attribute
    Set,
    /// Toggle change notifications for the attribute
    Notify,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Get => write!(f, "get"),
            OperationKind::Set => write!(f, "set"),
            OperationKind::Notify => write!(f, "notify"),
        }
    }
}

/// Acknowledgement mode for attribute writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteType {
    /// The peripheral confirms the write; a write-complete callback follows
    WithResponse,
    /// Fire and forget; no callback is delivered
    WithoutResponse,
}

impl WriteType {
    /// Map a "require acknowledgement" flag to a write type
    pub fn from_ack(require_ack: bool) -> Self {
        if require_ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }

    /// Whether a write-complete callback is expected
    pub fn expects_ack(self) -> bool {
        matches!(self, WriteType::WithResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnecting.is_connected());
        assert!(!ConnectionState::default().is_connected());
    }

    #[test]
    fn test_central_state_ready() {
        assert!(CentralState::PoweredOn.is_ready());
        assert!(!CentralState::PoweredOff.is_ready());
        assert!(!CentralState::Unknown.is_ready());
    }

    #[test]
    fn test_write_type_from_ack() {
        assert_eq!(WriteType::from_ack(true), WriteType::WithResponse);
        assert_eq!(WriteType::from_ack(false), WriteType::WithoutResponse);
        assert!(!WriteType::WithoutResponse.expects_ack());
    }

    #[test]
    fn test_operation_kind_display() {
        assert_eq!(OperationKind::Get.to_string(), "get");
        assert_eq!(OperationKind::Set.to_string(), "set");
        assert_eq!(OperationKind::Notify.to_string(), "notify");
    }
}

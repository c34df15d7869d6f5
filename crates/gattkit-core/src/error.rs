//! Error handling for GattKit
//!
//! Provides the error types surfaced by every layer of the engine:
//! - GATT errors (the settled failure of an attribute transaction)
//! - Transport errors (failures reported by the underlying link)
//! - Event bus errors
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::data::ConnectionState;
use crate::event_bus::EventBusError;

/// Failure reported by the transport for a command or callback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Create a transport error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The underlying message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Settled failure of an attribute transaction or connection request
///
/// Every guard that rejects a precondition maps to one of these variants;
/// there is no generic failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    /// The device was not connected when the operation was issued
    #[error("Not Connected")]
    NotConnected,

    /// A callback arrived for a different peripheral than the target
    #[error("Mismatched Peripheral")]
    MismatchedPeripheral,

    /// The requested service is not offered by the peripheral
    #[error("Service Not Found")]
    ServiceNotFound,

    /// The requested characteristic is not offered by the service
    #[error("Characteristic Not Found")]
    CharacteristicNotFound,

    /// A read completed without a payload
    #[error("Data Not Present")]
    DataNotPresent,

    /// No response within the transaction deadline
    #[error("Timed Out")]
    TimedOut,

    /// The link dropped before the transaction settled
    #[error("Peripheral Disconnected (last state: {})", display_state(.0))]
    PeripheralDisconnected(Option<ConnectionState>),

    /// The transport reported an error for a command or callback
    #[error("Peripheral Delegate Error: {0}")]
    Transport(#[from] TransportError),

    /// The requested action is not supported
    #[error("Requested Action Not Supported")]
    ActionNotSupported,

    /// A connection attempt failed or did not finish in time
    #[error("Could Not Connect")]
    CouldNotConnect,

    /// The central is not powered on
    #[error("Bluetooth is Off")]
    CentralNotPoweredOn,
}

fn display_state(state: &Option<ConnectionState>) -> String {
    state.map_or_else(|| "unknown".to_string(), |s| s.to_string())
}

impl GattError {
    /// Conditions a caller may reasonably retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GattError::TimedOut
                | GattError::PeripheralDisconnected(_)
                | GattError::CouldNotConnect
                | GattError::CentralNotPoweredOn
        )
    }

    /// Conditions where retrying the same request is pointless
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, GattError::TimedOut)
    }
}

/// Main error type for GattKit
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Attribute transaction or connection error
    #[error(transparent)]
    Gatt(#[from] GattError),

    /// Event bus error
    #[error(transparent)]
    EventBus(#[from] EventBusError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this is a GATT error
    pub fn is_gatt_error(&self) -> bool {
        matches!(self, Error::Gatt(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Gatt(GattError::TimedOut))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

//! # GattKit Core
//!
//! Core types and services for GattKit.
//! Provides device and attribute identifiers, link state enums, the error
//! taxonomy surfaced by attribute transactions, and the lifecycle event bus.

pub mod constants;
pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{
    CentralState, ConnectionState, DeviceId, GattValue, GattValueType, OperationKind, Proximity,
    ServiceCharacteristic, WriteType,
};

pub use error::{Error, GattError, Result, TransportError};

// Re-export event bus for convenience
pub use event_bus::{
    DeviceEvent, EventBus, EventBusConfig, EventBusError, EventKind, SubscriptionId,
};

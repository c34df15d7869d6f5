//! Transport capability interface
//!
//! The engine never talks to a radio directly. Everything it needs from the
//! underlying link is expressed here:
//! - A query/command surface ([`Transport`]) the engine calls into
//! - Peripheral-level callbacks ([`PeripheralDelegate`]) for discovery, reads,
//!   writes, notification toggles and RSSI
//! - Central-level callbacks ([`TransportDelegate`]) for adapter state and
//!   connection lifecycle
//!
//! Commands are fire-and-forget: a command returning `Ok` only means it was
//! accepted; its completion arrives later, at most once, through a callback.

use gattkit_core::{
    CentralState, ConnectionState, DeviceId, ServiceCharacteristic, TransportError, WriteType,
};
use std::sync::Weak;
use uuid::Uuid;

/// Address of one characteristic within a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    /// Service the characteristic belongs to
    pub service: Uuid,
    /// Characteristic identifier
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    /// Create a new characteristic reference
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// Whether this reference addresses the given attribute
    pub fn addresses(&self, attribute: &ServiceCharacteristic) -> bool {
        self.characteristic == attribute.characteristic
    }
}

impl From<&ServiceCharacteristic> for CharacteristicRef {
    fn from(attribute: &ServiceCharacteristic) -> Self {
        Self::new(attribute.service, attribute.characteristic)
    }
}

/// Narrow command/query surface of the underlying link
pub trait Transport: Send + Sync {
    /// Register the receiver of every callback this transport produces
    fn attach(&self, delegate: Weak<dyn TransportDelegate>);

    /// Power/availability state of the central
    fn central_state(&self) -> CentralState;

    /// Current link state of one peripheral
    fn connection_state(&self, device: &DeviceId) -> ConnectionState;

    /// Start connecting to a peripheral
    fn connect(&self, device: &DeviceId) -> Result<(), TransportError>;

    /// Tear down the link to a peripheral
    fn disconnect(&self, device: &DeviceId) -> Result<(), TransportError>;

    /// Discover services, restricted to `services` when non-empty
    fn discover_services(&self, device: &DeviceId, services: &[Uuid])
        -> Result<(), TransportError>;

    /// Discover characteristics of one service, restricted to `characteristics`
    fn discover_characteristics(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), TransportError>;

    /// Read a characteristic value
    fn read_value(
        &self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
    ) -> Result<(), TransportError>;

    /// Write a characteristic value
    fn write_value(
        &self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError>;

    /// Enable or disable change notifications
    fn set_notify_value(
        &self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: bool,
    ) -> Result<(), TransportError>;

    /// Request a fresh RSSI reading
    fn read_rssi(&self, device: &DeviceId) -> Result<(), TransportError>;
}

/// Peripheral-level callbacks
///
/// Every callback carries the identity of the peripheral that produced it.
/// Receivers must verify it against the peripheral they expect.
pub trait PeripheralDelegate: Send + Sync {
    /// Service discovery finished; `services` lists every service known so far
    fn services_discovered(&self, _peripheral: &DeviceId, _services: Result<&[Uuid], &TransportError>) {}

    /// Characteristic discovery for `service` finished
    fn characteristics_discovered(
        &self,
        _peripheral: &DeviceId,
        _service: Uuid,
        _characteristics: Result<&[Uuid], &TransportError>,
    ) {
    }

    /// A value was read or notified
    fn value_updated(
        &self,
        _peripheral: &DeviceId,
        _characteristic: CharacteristicRef,
        _value: Result<Option<&[u8]>, &TransportError>,
    ) {
    }

    /// An acknowledged write completed
    fn value_written(
        &self,
        _peripheral: &DeviceId,
        _characteristic: CharacteristicRef,
        _result: Result<(), &TransportError>,
    ) {
    }

    /// Notification state changed for a characteristic
    fn notification_state_changed(
        &self,
        _peripheral: &DeviceId,
        _characteristic: CharacteristicRef,
        _enabled: Result<bool, &TransportError>,
    ) {
    }

    /// A fresh RSSI reading arrived
    fn rssi_updated(&self, _peripheral: &DeviceId, _rssi: Result<i32, &TransportError>) {}
}

/// Central-level callbacks, plus every peripheral callback
pub trait TransportDelegate: PeripheralDelegate {
    /// The central's power/availability state changed
    fn central_state_changed(&self, _state: CentralState) {}

    /// A link was established
    fn connected(&self, _device: &DeviceId) {}

    /// A connection attempt failed
    fn connect_failed(&self, _device: &DeviceId, _error: &TransportError) {}

    /// A link dropped, with the transport's reason if it was not requested
    fn disconnected(&self, _device: &DeviceId, _error: Option<&TransportError>) {}
}

//! # GattKit Communication
//!
//! Attribute transactions and connection lifecycle on top of a pluggable
//! transport. Provides the transport capability traits, the device model and
//! registry, the GATT transaction client, the connection manager, and an
//! in-memory simulated transport.

pub mod communication;
pub mod connection;
pub mod device;
pub mod gatt;

pub use communication::{
    Central, CharacteristicRef, PeripheralDelegate, SimulatedPeripheral, SimulatedTransport,
    Transport, TransportCall, TransportDelegate,
};
pub use connection::{ConnectionManager, ConnectionManagerConfig, ConnectionUpdate};
pub use device::{BluetoothDevice, DelegateRegistry, DeviceRegistry, NotifyDelegate};
pub use gatt::{
    GattClient, GattClientConfig, GattOperation, GattOperationResult, GattRequestStatus,
    PendingOperation,
};

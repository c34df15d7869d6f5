//! Routes transport callbacks into the engine
//!
//! Peripheral callbacks go to the registered device, which fans them out to
//! its subscribers. Adapter and link callbacks go to the connection manager.

use gattkit_core::{CentralState, DeviceEvent, DeviceId, EventBus, TransportError};
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::transport::{CharacteristicRef, PeripheralDelegate, Transport, TransportDelegate};
use crate::connection::ConnectionManager;
use crate::device::{BluetoothDevice, DeviceRegistry};

/// The single callback receiver attached to a transport
pub struct Central {
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    manager: Arc<ConnectionManager>,
}

impl Central {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        bus: Arc<EventBus>,
        manager: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            registry,
            bus,
            manager,
        }
    }

    /// Build a central and attach it to `transport`
    ///
    /// The transport only keeps a weak reference; the caller owns the
    /// returned handle for as long as callbacks should be routed.
    pub fn attach(
        transport: &dyn Transport,
        registry: Arc<DeviceRegistry>,
        bus: Arc<EventBus>,
        manager: Arc<ConnectionManager>,
    ) -> Arc<Self> {
        let central = Arc::new(Self::new(registry, bus, manager));
        let delegate: Weak<Central> = Arc::downgrade(&central);
        transport.attach(delegate);
        central
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn device(&self, id: &DeviceId) -> Option<Arc<BluetoothDevice>> {
        let device = self.registry.get(id);
        if device.is_none() {
            tracing::debug!("Dropping callback for unknown device {}", id.short_id());
        }
        device
    }
}

impl PeripheralDelegate for Central {
    fn services_discovered(&self, peripheral: &DeviceId, services: Result<&[Uuid], &TransportError>) {
        if let Some(device) = self.device(peripheral) {
            device.services_discovered(peripheral, services);
        }
    }

    fn characteristics_discovered(
        &self,
        peripheral: &DeviceId,
        service: Uuid,
        characteristics: Result<&[Uuid], &TransportError>,
    ) {
        if let Some(device) = self.device(peripheral) {
            device.characteristics_discovered(peripheral, service, characteristics);
        }
    }

    fn value_updated(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        value: Result<Option<&[u8]>, &TransportError>,
    ) {
        if let Some(device) = self.device(peripheral) {
            device.value_updated(peripheral, characteristic, value);
        }
    }

    fn value_written(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), &TransportError>,
    ) {
        if let Some(device) = self.device(peripheral) {
            device.value_written(peripheral, characteristic, result);
        }
    }

    fn notification_state_changed(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: Result<bool, &TransportError>,
    ) {
        if let Some(device) = self.device(peripheral) {
            device.notification_state_changed(peripheral, characteristic, enabled);
        }
    }

    fn rssi_updated(&self, peripheral: &DeviceId, rssi: Result<i32, &TransportError>) {
        let Some(device) = self.device(peripheral) else {
            return;
        };
        device.rssi_updated(peripheral, rssi);
        match rssi {
            Ok(value) => {
                self.bus.report([DeviceEvent::Detected {
                    device: peripheral.clone(),
                    rssi: value,
                    proximity: device.proximity(),
                }]);
            }
            Err(e) => tracing::debug!("RSSI read failed for {}: {}", peripheral.short_id(), e),
        }
    }
}

impl TransportDelegate for Central {
    fn central_state_changed(&self, state: CentralState) {
        self.manager.on_central_state(state);
    }

    fn connected(&self, device: &DeviceId) {
        self.manager.on_connected(device);
    }

    fn connect_failed(&self, device: &DeviceId, error: &TransportError) {
        self.manager.on_connect_failed(device, error);
    }

    fn disconnected(&self, device: &DeviceId, error: Option<&TransportError>) {
        self.manager.on_disconnected(device, error);
    }
}

impl std::fmt::Debug for Central {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Central")
            .field("devices", &self.registry.len())
            .finish()
    }
}

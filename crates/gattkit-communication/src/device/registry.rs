//! Device registry
//!
//! The registry is the only owner of [`BluetoothDevice`] handles. Transactions
//! and the connection manager hold a [`DeviceId`] and resolve it here on every
//! access, so a device removed from the registry is simply gone.

use gattkit_core::DeviceId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::BluetoothDevice;

/// Lookup table of known devices
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Arc<BluetoothDevice>>>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device, replacing any previous entry with the same id
    pub fn insert(&self, device: BluetoothDevice) -> Arc<BluetoothDevice> {
        let device = Arc::new(device);
        let previous = self
            .devices
            .write()
            .insert(device.id().clone(), Arc::clone(&device));
        if previous.is_some() {
            tracing::debug!("Replaced device {}", device.id());
        }
        device
    }

    /// Return the registered device, inserting the one built by `make` if absent
    pub fn get_or_insert<F>(&self, id: &DeviceId, make: F) -> Arc<BluetoothDevice>
    where
        F: FnOnce() -> BluetoothDevice,
    {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        let mut devices = self.devices.write();
        Arc::clone(
            devices
                .entry(id.clone())
                .or_insert_with(|| Arc::new(make())),
        )
    }

    /// Resolve a device by id
    pub fn get(&self, id: &DeviceId) -> Option<Arc<BluetoothDevice>> {
        self.devices.read().get(id).cloned()
    }

    /// Remove a device, returning it if it was registered
    pub fn remove(&self, id: &DeviceId) -> Option<Arc<BluetoothDevice>> {
        self.devices.write().remove(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Snapshot of every registered device
    pub fn devices(&self) -> Vec<Arc<BluetoothDevice>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn clear(&self) {
        self.devices.write().clear();
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.len())
            .finish()
    }
}

//! Remote device model
//!
//! A [`BluetoothDevice`] is the registry-owned handle for one peripheral. It
//! keeps the discovery cache and signal readings, and fans every raw
//! peripheral callback out to the transactions subscribed to it.

mod delegates;
mod registry;

pub use delegates::{DelegateRegistry, NotifyDelegate};
pub use registry::DeviceRegistry;

pub(crate) use delegates::{NotifyRegistry, NotifySubscription};

use chrono::{DateTime, Utc};
use gattkit_core::constants::DEFAULT_PROXIMITY_RSSI;
use gattkit_core::{
    ConnectionState, DeviceId, GattValue, Proximity, ServiceCharacteristic, TransportError,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::communication::{CharacteristicRef, PeripheralDelegate, Transport};

/// Signal readings collected for a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSnapshot {
    /// Last RSSI (dBm), or the "no reading" sentinel
    pub rssi: i32,
    /// Advertised power level
    pub power_level: u8,
    /// Number of readings recorded
    pub total_pulse_count: u64,
    /// Time of the first reading
    pub first_pulse: Option<DateTime<Utc>>,
    /// Time of the most recent reading
    pub last_pulse: Option<DateTime<Utc>>,
}

impl Default for SignalSnapshot {
    fn default() -> Self {
        Self {
            rssi: DEFAULT_PROXIMITY_RSSI,
            power_level: 0,
            total_pulse_count: 0,
            first_pulse: None,
            last_pulse: None,
        }
    }
}

/// Registry-owned handle for one remote peripheral
pub struct BluetoothDevice {
    id: DeviceId,
    name: String,
    transport: Arc<dyn Transport>,
    signal: RwLock<SignalSnapshot>,
    stay_connected: AtomicBool,
    marked_for_deletion: AtomicBool,
    /// Discovered service -> characteristics
    services: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    delegates: DelegateRegistry,
    notify: NotifyRegistry,
}

impl BluetoothDevice {
    /// Create a device reachable through `transport`
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport,
            signal: RwLock::new(SignalSnapshot::default()),
            stay_connected: AtomicBool::new(false),
            marked_for_deletion: AtomicBool::new(false),
            services: RwLock::new(HashMap::new()),
            delegates: DelegateRegistry::new(),
            notify: NotifyRegistry::default(),
        }
    }

    /// Device identity
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport that reaches this device
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current link state as reported by the transport
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state(&self.id)
    }

    /// Connected, or heard recently enough to be in range
    pub fn in_range(&self) -> bool {
        self.connection_state().is_connected() || self.proximity().in_range()
    }

    /// Latest signal readings
    pub fn signal(&self) -> SignalSnapshot {
        self.signal.read().clone()
    }

    /// Last RSSI reading
    pub fn rssi(&self) -> i32 {
        self.signal.read().rssi
    }

    /// Proximity bucket of the last RSSI reading
    pub fn proximity(&self) -> Proximity {
        Proximity::from_rssi(self.rssi())
    }

    /// Record a signal reading
    ///
    /// The "no reading" sentinel does not overwrite a real RSSI.
    pub fn update(&self, rssi: i32, power_level: u8) {
        let now = Utc::now();
        let mut signal = self.signal.write();
        if rssi != DEFAULT_PROXIMITY_RSSI {
            signal.rssi = rssi;
        }
        signal.power_level = power_level;
        signal.total_pulse_count += 1;
        signal.first_pulse.get_or_insert(now);
        signal.last_pulse = Some(now);
    }

    /// Forget the last RSSI reading
    pub fn reset_rssi(&self) {
        self.signal.write().rssi = DEFAULT_PROXIMITY_RSSI;
    }

    /// Whether callers asked to keep this device connected
    pub fn stay_connected(&self) -> bool {
        self.stay_connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_stay_connected(&self, value: bool) {
        self.stay_connected.store(value, Ordering::SeqCst);
    }

    /// Whether the device was explicitly disconnected and awaits eviction
    pub fn marked_for_deletion(&self) -> bool {
        self.marked_for_deletion.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_for_deletion(&self, value: bool) {
        self.marked_for_deletion.store(value, Ordering::SeqCst);
    }

    /// Whether discovery already located the attribute on this device
    pub fn has_attribute(&self, attribute: &ServiceCharacteristic) -> bool {
        self.services
            .read()
            .get(&attribute.service)
            .is_some_and(|chars| chars.contains(&attribute.characteristic))
    }

    /// Services located so far
    pub fn discovered_services(&self) -> Vec<Uuid> {
        self.services.read().keys().copied().collect()
    }

    /// Drop the discovery cache; the next transaction rediscovers
    pub fn invalidate_cache(&self) {
        self.services.write().clear();
    }

    fn is_own(&self, peripheral: &DeviceId) -> bool {
        *peripheral == self.id
    }

    /// Register a raw callback subscriber
    pub fn subscribe(&self, key: impl Into<String>, delegate: Arc<dyn PeripheralDelegate>) -> bool {
        self.delegates.subscribe(key, delegate)
    }

    /// Remove a raw callback subscriber
    pub fn unsubscribe(&self, key: &str) -> bool {
        self.delegates.unsubscribe(key)
    }

    /// Number of raw callback subscribers
    pub fn delegate_count(&self) -> usize {
        self.delegates.len()
    }

    pub(crate) fn add_notify_subscriber(
        &self,
        key: impl Into<String>,
        attribute: ServiceCharacteristic,
        delegate: Arc<dyn NotifyDelegate>,
    ) {
        self.notify
            .insert(key.into(), NotifySubscription { attribute, delegate });
    }

    pub(crate) fn remove_notify_subscriber(&self, key: &str) -> bool {
        self.notify.remove(key).is_some()
    }

    /// Number of value-update subscribers
    pub fn notify_subscriber_count(&self) -> usize {
        self.notify.len()
    }
}

impl std::fmt::Debug for BluetoothDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluetoothDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rssi", &self.rssi())
            .field("delegates", &self.delegates.len())
            .finish()
    }
}

// Raw callbacks from this peripheral update the cache first; every callback
// then fans out to subscribers, which check identity themselves
impl PeripheralDelegate for BluetoothDevice {
    fn services_discovered(&self, peripheral: &DeviceId, services: Result<&[Uuid], &TransportError>) {
        if let (true, Ok(found)) = (self.is_own(peripheral), services) {
            let mut cache = self.services.write();
            for service in found {
                cache.entry(*service).or_default();
            }
        }
        for delegate in self.delegates.snapshot() {
            delegate.services_discovered(peripheral, services);
        }
    }

    fn characteristics_discovered(
        &self,
        peripheral: &DeviceId,
        service: Uuid,
        characteristics: Result<&[Uuid], &TransportError>,
    ) {
        if let (true, Ok(found)) = (self.is_own(peripheral), characteristics) {
            self.services
                .write()
                .entry(service)
                .or_default()
                .extend(found.iter().copied());
        }
        for delegate in self.delegates.snapshot() {
            delegate.characteristics_discovered(peripheral, service, characteristics);
        }
    }

    fn value_updated(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        value: Result<Option<&[u8]>, &TransportError>,
    ) {
        if let (true, Ok(data)) = (self.is_own(peripheral), value) {
            for subscription in self.notify.matching(characteristic.characteristic) {
                let update = GattValue::new(&subscription.attribute, data.map(<[u8]>::to_vec));
                subscription.delegate.update(&subscription.attribute, update);
            }
        }
        for delegate in self.delegates.snapshot() {
            delegate.value_updated(peripheral, characteristic, value);
        }
    }

    fn value_written(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), &TransportError>,
    ) {
        for delegate in self.delegates.snapshot() {
            delegate.value_written(peripheral, characteristic, result);
        }
    }

    fn notification_state_changed(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: Result<bool, &TransportError>,
    ) {
        for delegate in self.delegates.snapshot() {
            delegate.notification_state_changed(peripheral, characteristic, enabled);
        }
    }

    fn rssi_updated(&self, peripheral: &DeviceId, rssi: Result<i32, &TransportError>) {
        if let Ok(value) = rssi {
            self.update(value, 0x4);
        }
        for delegate in self.delegates.snapshot() {
            delegate.rssi_updated(peripheral, rssi);
        }
    }
}

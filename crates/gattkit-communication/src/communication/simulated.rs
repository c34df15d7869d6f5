//! In-memory transport
//!
//! Simulates a central and a set of peripherals with a fixed attribute table.
//! Commands are recorded and answered asynchronously on the tokio runtime,
//! after an optional latency. A silent transport records commands but never
//! answers peripheral commands, which is how timeouts are exercised.

use gattkit_core::{
    CentralState, ConnectionState, DeviceId, ServiceCharacteristic, TransportError, WriteType,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

use super::transport::{CharacteristicRef, Transport, TransportDelegate};

/// A command received by the simulated transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices(DeviceId, Vec<Uuid>),
    DiscoverCharacteristics(DeviceId, Uuid, Vec<Uuid>),
    Read(DeviceId, CharacteristicRef),
    Write(DeviceId, CharacteristicRef, Vec<u8>, WriteType),
    SetNotify(DeviceId, CharacteristicRef, bool),
    ReadRssi(DeviceId),
}

impl TransportCall {
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Connect(d)
            | Self::Disconnect(d)
            | Self::DiscoverServices(d, _)
            | Self::DiscoverCharacteristics(d, _, _)
            | Self::Read(d, _)
            | Self::Write(d, _, _, _)
            | Self::SetNotify(d, _, _)
            | Self::ReadRssi(d) => d,
        }
    }
}

/// Description of a simulated peripheral
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    id: DeviceId,
    services: HashMap<Uuid, HashMap<Uuid, Option<Vec<u8>>>>,
    rssi: i32,
    connectable: bool,
}

impl SimulatedPeripheral {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            services: HashMap::new(),
            rssi: -60,
            connectable: true,
        }
    }

    /// Expose an attribute with an initial value
    pub fn with_attribute(mut self, attribute: &ServiceCharacteristic, value: Option<Vec<u8>>) -> Self {
        self.services
            .entry(attribute.service)
            .or_default()
            .insert(attribute.characteristic, value);
        self
    }

    /// Expose a service without characteristics
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.entry(service).or_default();
        self
    }

    pub fn with_rssi(mut self, rssi: i32) -> Self {
        self.rssi = rssi;
        self
    }

    /// Make every connection attempt fail
    pub fn unconnectable(mut self) -> Self {
        self.connectable = false;
        self
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }
}

struct PeripheralState {
    profile: SimulatedPeripheral,
    state: ConnectionState,
    notifying: HashSet<Uuid>,
}

struct SimState {
    central: CentralState,
    peripherals: HashMap<DeviceId, PeripheralState>,
    silent: bool,
    callback_error: Option<TransportError>,
}

struct Inner {
    state: Mutex<SimState>,
    calls: Mutex<Vec<TransportCall>>,
    delegate: RwLock<Option<Weak<dyn TransportDelegate>>>,
    latency: Duration,
}

/// Cloneable handle to one simulated central
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Inner>,
}

impl SimulatedTransport {
    /// A powered-on central answering without latency
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// A powered-on central answering after `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SimState {
                    central: CentralState::PoweredOn,
                    peripherals: HashMap::new(),
                    silent: false,
                    callback_error: None,
                }),
                calls: Mutex::new(Vec::new()),
                delegate: RwLock::new(None),
                latency,
            }),
        }
    }

    pub fn add_peripheral(&self, peripheral: SimulatedPeripheral) {
        let id = peripheral.id.clone();
        self.inner.state.lock().peripherals.insert(
            id,
            PeripheralState {
                profile: peripheral,
                state: ConnectionState::Disconnected,
                notifying: HashSet::new(),
            },
        );
    }

    /// Stop (or resume) answering peripheral commands
    pub fn set_silent(&self, silent: bool) {
        self.inner.state.lock().silent = silent;
    }

    /// Fail every later peripheral callback with `error`, or stop failing
    pub fn set_callback_error(&self, error: Option<TransportError>) {
        self.inner.state.lock().callback_error = error;
    }

    pub fn set_connectable(&self, device: &DeviceId, connectable: bool) {
        if let Some(p) = self.inner.state.lock().peripherals.get_mut(device) {
            p.profile.connectable = connectable;
        }
    }

    /// Mark a peripheral connected without going through a connect callback
    pub fn force_connected(&self, device: &DeviceId) {
        if let Some(p) = self.inner.state.lock().peripherals.get_mut(device) {
            p.state = ConnectionState::Connected;
        }
    }

    /// Change the central's power state and notify the delegate
    pub fn set_central_state(&self, central: CentralState) {
        let dropped: Vec<DeviceId> = {
            let mut state = self.inner.state.lock();
            state.central = central;
            if central.is_ready() {
                Vec::new()
            } else {
                state
                    .peripherals
                    .iter_mut()
                    .filter(|(_, p)| p.state != ConnectionState::Disconnected)
                    .map(|(id, p)| {
                        p.state = ConnectionState::Disconnected;
                        id.clone()
                    })
                    .collect()
            }
        };

        self.deliver(move |delegate| delegate.central_state_changed(central));
        let error = TransportError::new("central powered off");
        for device in dropped {
            let error = error.clone();
            self.deliver(move |delegate| delegate.disconnected(&device, Some(&error)));
        }
    }

    /// Drop an established link as if the peripheral went away
    pub fn drop_link(&self, device: &DeviceId) {
        let was_linked = {
            let mut state = self.inner.state.lock();
            match state.peripherals.get_mut(device) {
                Some(p) if p.state != ConnectionState::Disconnected => {
                    p.state = ConnectionState::Disconnected;
                    true
                }
                _ => false,
            }
        };
        if was_linked {
            let device = device.clone();
            let error = TransportError::new("link lost");
            self.deliver(move |delegate| delegate.disconnected(&device, Some(&error)));
        }
    }

    /// Change a value and send it as a notification if enabled
    pub fn push_notification(&self, device: &DeviceId, attribute: &ServiceCharacteristic, value: Vec<u8>) {
        let notify = {
            let mut state = self.inner.state.lock();
            match state.peripherals.get_mut(device) {
                Some(p) => {
                    if let Some(slot) = p
                        .profile
                        .services
                        .get_mut(&attribute.service)
                        .and_then(|chars| chars.get_mut(&attribute.characteristic))
                    {
                        *slot = Some(value.clone());
                    }
                    p.state.is_connected() && p.notifying.contains(&attribute.characteristic)
                }
                None => false,
            }
        };
        if notify {
            let device = device.clone();
            let target = CharacteristicRef::from(attribute);
            self.deliver(move |delegate| delegate.value_updated(&device, target, Ok(Some(&value))));
        }
    }

    /// Current stored value of an attribute
    pub fn value(&self, device: &DeviceId, attribute: &ServiceCharacteristic) -> Option<Vec<u8>> {
        self.inner
            .state
            .lock()
            .peripherals
            .get(device)
            .and_then(|p| p.profile.services.get(&attribute.service))
            .and_then(|chars| chars.get(&attribute.characteristic))
            .cloned()
            .flatten()
    }

    pub fn is_notifying(&self, device: &DeviceId, attribute: &ServiceCharacteristic) -> bool {
        self.inner
            .state
            .lock()
            .peripherals
            .get(device)
            .is_some_and(|p| p.notifying.contains(&attribute.characteristic))
    }

    /// Every command received so far, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.calls.lock().clone()
    }

    /// Commands received for one device
    pub fn calls_for(&self, device: &DeviceId) -> Vec<TransportCall> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|c| c.device() == device)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    fn record(&self, call: TransportCall) {
        tracing::trace!("Simulated transport received {:?}", call);
        self.inner.calls.lock().push(call);
    }

    /// Whether a peripheral command should be answered, and with which error
    fn answer(&self, device: &DeviceId) -> Option<Result<(), TransportError>> {
        let state = self.inner.state.lock();
        if state.silent {
            return None;
        }
        if let Some(error) = &state.callback_error {
            return Some(Err(error.clone()));
        }
        match state.peripherals.get(device) {
            Some(p) if p.state.is_connected() => Some(Ok(())),
            _ => None,
        }
    }

    fn require_link(&self, device: &DeviceId) -> Result<(), TransportError> {
        let state = self.inner.state.lock();
        if !state.central.is_ready() {
            return Err(TransportError::new("central is not powered on"));
        }
        match state.peripherals.get(device) {
            Some(p) if p.state.is_connected() => Ok(()),
            Some(_) => Err(TransportError::new("peripheral is not connected")),
            None => Err(TransportError::new("unknown peripheral")),
        }
    }

    fn deliver<F>(&self, callback: F)
    where
        F: FnOnce(&dyn TransportDelegate) + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Simulated transport has no runtime, dropping callback");
            return;
        };
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            if inner.latency.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(inner.latency).await;
            }
            let delegate = inner.delegate.read().as_ref().and_then(Weak::upgrade);
            if let Some(delegate) = delegate {
                callback(delegate.as_ref());
            }
        });
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SimulatedTransport")
            .field("central", &state.central)
            .field("peripherals", &state.peripherals.len())
            .field("latency", &self.inner.latency)
            .finish()
    }
}

impl Transport for SimulatedTransport {
    fn attach(&self, delegate: Weak<dyn TransportDelegate>) {
        *self.inner.delegate.write() = Some(delegate);
    }

    fn central_state(&self) -> CentralState {
        self.inner.state.lock().central
    }

    fn connection_state(&self, device: &DeviceId) -> ConnectionState {
        self.inner
            .state
            .lock()
            .peripherals
            .get(device)
            .map_or(ConnectionState::Disconnected, |p| p.state)
    }

    fn connect(&self, device: &DeviceId) -> Result<(), TransportError> {
        self.record(TransportCall::Connect(device.clone()));
        let connectable = {
            let mut state = self.inner.state.lock();
            if !state.central.is_ready() {
                return Err(TransportError::new("central is not powered on"));
            }
            match state.peripherals.get_mut(device) {
                Some(p) if p.state.is_connected() => return Ok(()),
                Some(p) if p.profile.connectable => {
                    p.state = ConnectionState::Connecting;
                    true
                }
                _ => false,
            }
        };

        let device = device.clone();
        let inner = Arc::clone(&self.inner);
        if connectable {
            self.deliver(move |delegate| {
                let linked = match inner.state.lock().peripherals.get_mut(&device) {
                    Some(p) if p.state == ConnectionState::Connecting => {
                        p.state = ConnectionState::Connected;
                        true
                    }
                    _ => false,
                };
                if linked {
                    delegate.connected(&device);
                }
            });
        } else {
            self.deliver(move |delegate| {
                delegate.connect_failed(&device, &TransportError::new("peripheral refused connection"));
            });
        }
        Ok(())
    }

    fn disconnect(&self, device: &DeviceId) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect(device.clone()));
        let linked = {
            let mut state = self.inner.state.lock();
            match state.peripherals.get_mut(device) {
                Some(p) if p.state != ConnectionState::Disconnected => {
                    p.state = ConnectionState::Disconnecting;
                    true
                }
                _ => false,
            }
        };
        if linked {
            let device = device.clone();
            let inner = Arc::clone(&self.inner);
            self.deliver(move |delegate| {
                if let Some(p) = inner.state.lock().peripherals.get_mut(&device) {
                    p.state = ConnectionState::Disconnected;
                    p.notifying.clear();
                }
                delegate.disconnected(&device, None);
            });
        }
        Ok(())
    }

    fn discover_services(&self, device: &DeviceId, services: &[Uuid]) -> Result<(), TransportError> {
        self.record(TransportCall::DiscoverServices(device.clone(), services.to_vec()));
        self.require_link(device)?;
        let Some(answer) = self.answer(device) else {
            return Ok(());
        };

        let found: Vec<Uuid> = {
            let state = self.inner.state.lock();
            state
                .peripherals
                .get(device)
                .map(|p| {
                    p.profile
                        .services
                        .keys()
                        .filter(|s| services.is_empty() || services.contains(s))
                        .copied()
                        .collect()
                })
                .unwrap_or_default()
        };
        let device = device.clone();
        self.deliver(move |delegate| match answer {
            Ok(()) => delegate.services_discovered(&device, Ok(&found)),
            Err(e) => delegate.services_discovered(&device, Err(&e)),
        });
        Ok(())
    }

    fn discover_characteristics(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), TransportError> {
        self.record(TransportCall::DiscoverCharacteristics(
            device.clone(),
            service,
            characteristics.to_vec(),
        ));
        self.require_link(device)?;
        let Some(answer) = self.answer(device) else {
            return Ok(());
        };

        let found: Vec<Uuid> = {
            let state = self.inner.state.lock();
            state
                .peripherals
                .get(device)
                .and_then(|p| p.profile.services.get(&service))
                .map(|chars| {
                    chars
                        .keys()
                        .filter(|c| characteristics.is_empty() || characteristics.contains(c))
                        .copied()
                        .collect()
                })
                .unwrap_or_default()
        };
        let device = device.clone();
        self.deliver(move |delegate| match answer {
            Ok(()) => delegate.characteristics_discovered(&device, service, Ok(&found)),
            Err(e) => delegate.characteristics_discovered(&device, service, Err(&e)),
        });
        Ok(())
    }

    fn read_value(&self, device: &DeviceId, characteristic: CharacteristicRef) -> Result<(), TransportError> {
        self.record(TransportCall::Read(device.clone(), characteristic));
        self.require_link(device)?;
        let Some(answer) = self.answer(device) else {
            return Ok(());
        };

        let value = {
            let state = self.inner.state.lock();
            state
                .peripherals
                .get(device)
                .and_then(|p| p.profile.services.get(&characteristic.service))
                .and_then(|chars| chars.get(&characteristic.characteristic))
                .cloned()
        };
        let device = device.clone();
        self.deliver(move |delegate| match (answer, value) {
            (Ok(()), Some(value)) => delegate.value_updated(&device, characteristic, Ok(value.as_deref())),
            (Ok(()), None) => {
                let error = TransportError::new("unknown characteristic");
                delegate.value_updated(&device, characteristic, Err(&error));
            }
            (Err(e), _) => delegate.value_updated(&device, characteristic, Err(&e)),
        });
        Ok(())
    }

    fn write_value(
        &self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Write(device.clone(), characteristic, data.to_vec(), write_type));
        self.require_link(device)?;

        if let Some(slot) = self
            .inner
            .state
            .lock()
            .peripherals
            .get_mut(device)
            .and_then(|p| p.profile.services.get_mut(&characteristic.service))
            .and_then(|chars| chars.get_mut(&characteristic.characteristic))
        {
            *slot = Some(data.to_vec());
        }

        if !write_type.expects_ack() {
            return Ok(());
        }
        let Some(answer) = self.answer(device) else {
            return Ok(());
        };
        let device = device.clone();
        self.deliver(move |delegate| match answer {
            Ok(()) => delegate.value_written(&device, characteristic, Ok(())),
            Err(e) => delegate.value_written(&device, characteristic, Err(&e)),
        });
        Ok(())
    }

    fn set_notify_value(
        &self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SetNotify(device.clone(), characteristic, enabled));
        self.require_link(device)?;
        let Some(answer) = self.answer(device) else {
            return Ok(());
        };

        if answer.is_ok() {
            if let Some(p) = self.inner.state.lock().peripherals.get_mut(device) {
                if enabled {
                    p.notifying.insert(characteristic.characteristic);
                } else {
                    p.notifying.remove(&characteristic.characteristic);
                }
            }
        }
        let device = device.clone();
        self.deliver(move |delegate| match answer {
            Ok(()) => delegate.notification_state_changed(&device, characteristic, Ok(enabled)),
            Err(e) => delegate.notification_state_changed(&device, characteristic, Err(&e)),
        });
        Ok(())
    }

    fn read_rssi(&self, device: &DeviceId) -> Result<(), TransportError> {
        self.record(TransportCall::ReadRssi(device.clone()));
        self.require_link(device)?;
        let Some(answer) = self.answer(device) else {
            return Ok(());
        };

        let rssi = self
            .inner
            .state
            .lock()
            .peripherals
            .get(device)
            .map_or(gattkit_core::constants::DEFAULT_PROXIMITY_RSSI, |p| p.profile.rssi);
        let device = device.clone();
        self.deliver(move |delegate| match answer {
            Ok(()) => delegate.rssi_updated(&device, Ok(rssi)),
            Err(e) => delegate.rssi_updated(&device, Err(&e)),
        });
        Ok(())
    }
}

//! Connection lifecycle
//!
//! Keeps every device in the intent set connected once the central is
//! powered on, retrying after link loss or a failed attempt. RSSI is polled
//! while a link is up.

use gattkit_core::constants::{
    CONNECTED_RSSI_READ_INTERVAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_DELAY,
};
use gattkit_core::{CentralState, ConnectionState, DeviceEvent, DeviceId, EventBus, GattError, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::communication::Transport;
use crate::device::{BluetoothDevice, DeviceRegistry};

/// Configuration for the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionManagerConfig {
    /// Pause before reconnecting a dropped or failed device
    pub reconnect_delay: Duration,
    /// Default wait used by [`ConnectionManager::connect`]
    pub connect_timeout: Duration,
    /// RSSI polling period while connected; `None` disables polling
    pub rssi_poll_interval: Option<Duration>,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rssi_poll_interval: Some(CONNECTED_RSSI_READ_INTERVAL),
        }
    }
}

/// Link change observed by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    Connected(DeviceId),
    Failed(DeviceId, TransportError),
    Disconnected(DeviceId),
}

impl ConnectionUpdate {
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Connected(d) | Self::Failed(d, _) | Self::Disconnected(d) => d,
        }
    }
}

/// Keeps the devices in the intent set connected
pub struct ConnectionManager {
    this: Weak<Self>,
    transport: Arc<dyn Transport>,
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    intents: RwLock<HashSet<DeviceId>>,
    updates: broadcast::Sender<ConnectionUpdate>,
    pollers: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    config: ConnectionManagerConfig,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<DeviceRegistry>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Self::with_config(transport, registry, bus, ConnectionManagerConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        registry: Arc<DeviceRegistry>,
        bus: Arc<EventBus>,
        config: ConnectionManagerConfig,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(64);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            transport,
            registry,
            bus,
            intents: RwLock::new(HashSet::new()),
            updates,
            pollers: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &ConnectionManagerConfig {
        &self.config
    }

    /// Keep `device` connected
    ///
    /// Connects now when the central is ready; otherwise the attempt waits
    /// for the central to report `PoweredOn`.
    pub fn add(&self, device: &BluetoothDevice) {
        device.set_stay_connected(true);
        device.mark_for_deletion(false);
        if self.intents.write().insert(device.id().clone()) {
            tracing::info!("Keeping {} connected", device.id().short_id());
        }

        let central = self.transport.central_state();
        if central.is_ready() {
            self.attempt_connect(device.id());
        } else {
            tracing::debug!(
                "Central is {:?}, deferring connect to {}",
                central,
                device.id().short_id()
            );
        }
    }

    /// Stop keeping `device` connected and disconnect it
    ///
    /// Returns whether the device was in the intent set.
    pub fn remove(&self, device: &DeviceId) -> bool {
        let removed = self.intents.write().remove(device);
        if let Some(handle) = self.registry.get(device) {
            handle.set_stay_connected(false);
            handle.mark_for_deletion(true);
        }
        self.stop_poller(device);

        match self.transport.connection_state(device) {
            ConnectionState::Connected | ConnectionState::Connecting => {
                tracing::info!("Disconnecting {}", device.short_id());
                if let Err(e) = self.transport.disconnect(device) {
                    tracing::error!("Disconnect of {} failed: {}", device.short_id(), e);
                }
            }
            _ => {}
        }
        removed
    }

    /// Remove from the intent set and drop the device from the registry
    pub fn evict(&self, device: &DeviceId) -> Option<Arc<BluetoothDevice>> {
        self.remove(device);
        let evicted = self.registry.remove(device);
        if evicted.is_some() {
            tracing::info!("Evicted {}", device.short_id());
        }
        evicted
    }

    /// Add to the intent set and wait for the link
    ///
    /// Fails with `CouldNotConnect` on a connection failure or when the wait
    /// expires, or `CentralNotPoweredOn` if the central never became ready.
    /// The device stays in the intent set either way; call
    /// [`remove`](Self::remove) to stop retrying.
    pub async fn connect(&self, device: &DeviceId, timeout: Option<Duration>) -> Result<(), GattError> {
        let handle = self.registry.get(device).ok_or(GattError::CouldNotConnect)?;
        let mut updates = self.updates.subscribe();
        self.add(&handle);
        if handle.connection_state().is_connected() {
            return Ok(());
        }

        let wait = async {
            loop {
                match updates.recv().await {
                    Ok(ConnectionUpdate::Connected(id)) if &id == device => return Ok(()),
                    Ok(ConnectionUpdate::Failed(id, _)) if &id == device => {
                        return Err(GattError::CouldNotConnect)
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.transport.connection_state(device).is_connected() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(GattError::CouldNotConnect)
                    }
                }
            }
        };

        let timeout = timeout.unwrap_or(self.config.connect_timeout);
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) if !self.transport.central_state().is_ready() => Err(GattError::CentralNotPoweredOn),
            Err(_) => {
                tracing::warn!("Connect to {} timed out", device.short_id());
                Err(GattError::CouldNotConnect)
            }
        }
    }

    /// Whether `device` is in the intent set
    pub fn is_intended(&self, device: &DeviceId) -> bool {
        self.intents.read().contains(device)
    }

    /// Snapshot of the intent set
    pub fn intents(&self) -> Vec<DeviceId> {
        self.intents.read().iter().cloned().collect()
    }

    /// Receiver of link changes
    pub fn updates(&self) -> broadcast::Receiver<ConnectionUpdate> {
        self.updates.subscribe()
    }

    pub fn is_polling(&self, device: &DeviceId) -> bool {
        self.pollers.lock().contains_key(device)
    }

    pub fn on_central_state(&self, state: CentralState) {
        tracing::info!("Central state changed to {:?}", state);
        if !state.is_ready() {
            return;
        }
        for device in self.intents() {
            self.attempt_connect(&device);
        }
    }

    pub fn on_connected(&self, device: &DeviceId) {
        tracing::info!("Connected to {}", device.short_id());
        self.start_poller(device);
        let _ = self.updates.send(ConnectionUpdate::Connected(device.clone()));
    }

    /// Report the failure upward and retry if still intended
    pub fn on_connect_failed(&self, device: &DeviceId, error: &TransportError) {
        tracing::warn!("Connection to {} failed: {}", device.short_id(), error);
        self.bus.report([DeviceEvent::ConnectionFailed {
            device: device.clone(),
            reason: error.message().to_string(),
        }]);
        let _ = self
            .updates
            .send(ConnectionUpdate::Failed(device.clone(), error.clone()));
        self.schedule_reconnect(device);
    }

    /// Publish the disconnect and retry if still intended
    pub fn on_disconnected(&self, device: &DeviceId, error: Option<&TransportError>) {
        match error {
            Some(e) => tracing::warn!("{} disconnected: {}", device.short_id(), e),
            None => tracing::info!("{} disconnected", device.short_id()),
        }
        self.stop_poller(device);
        if let Some(handle) = self.registry.get(device) {
            handle.invalidate_cache();
        }

        self.bus.report([DeviceEvent::Disconnected {
            device: device.clone(),
            last_state: Some(self.transport.connection_state(device)),
        }]);
        let _ = self.updates.send(ConnectionUpdate::Disconnected(device.clone()));
        self.schedule_reconnect(device);
    }

    fn attempt_connect(&self, device: &DeviceId) {
        if !self.is_intended(device) {
            return;
        }
        if !self.transport.central_state().is_ready() {
            tracing::debug!("Central not ready, {} waits", device.short_id());
            return;
        }
        match self.transport.connection_state(device) {
            ConnectionState::Connected | ConnectionState::Connecting => return,
            _ => {}
        }

        tracing::debug!("Connecting to {}", device.short_id());
        if let Err(e) = self.transport.connect(device) {
            tracing::error!("Connect command for {} rejected: {}", device.short_id(), e);
            self.on_connect_failed(device, &e);
        }
    }

    fn schedule_reconnect(&self, device: &DeviceId) {
        if !self.is_intended(device) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime to reconnect {}", device.short_id());
            return;
        };

        tracing::debug!(
            "Reconnecting {} in {:?}",
            device.short_id(),
            self.config.reconnect_delay
        );
        let this = self.this.clone();
        let device = device.clone();
        let delay = self.config.reconnect_delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = this.upgrade() {
                manager.attempt_connect(&device);
            }
        });
    }

    fn start_poller(&self, device: &DeviceId) {
        let Some(interval) = self.config.rssi_poll_interval else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let this = self.this.clone();
        let id = device.clone();
        let task = runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(manager) = this.upgrade() else {
                    break;
                };
                if !manager.transport.connection_state(&id).is_connected() {
                    break;
                }
                if let Err(e) = manager.transport.read_rssi(&id) {
                    tracing::debug!("RSSI poll for {} rejected: {}", id.short_id(), e);
                }
            }
        });

        if let Some(previous) = self.pollers.lock().insert(device.clone(), task) {
            previous.abort();
        }
    }

    fn stop_poller(&self, device: &DeviceId) {
        if let Some(task) = self.pollers.lock().remove(device) {
            task.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for (_, task) in self.pollers.lock().drain() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("intents", &self.intents.read().len())
            .field("config", &self.config)
            .finish()
    }
}

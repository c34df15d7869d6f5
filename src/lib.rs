//! # GattKit
//!
//! A Bluetooth LE attribute transaction engine:
//! - Per-operation read/write/notify transactions with discovery, timeouts and
//!   first-wins settlement
//! - A keyed event bus for device lifecycle events
//! - A connection manager that keeps wanted devices connected across link
//!   loss and adapter power cycles
//!
//! ## Architecture
//!
//! GattKit is organized as a workspace with multiple crates:
//!
//! 1. **gattkit-core** - Identifiers, state enums, errors, event bus
//! 2. **gattkit-communication** - Transport capability, devices, transactions, connection manager
//! 3. **gattkit-settings** - Configuration files and validation
//! 4. **gattkit** - Engine wiring and the demo binary

use std::sync::Arc;

pub use gattkit_communication::{
    BluetoothDevice, Central, ConnectionManager, ConnectionManagerConfig, ConnectionUpdate,
    DeviceRegistry, GattClient, GattClientConfig, GattOperation, GattOperationResult,
    GattRequestStatus, NotifyDelegate, PendingOperation, SimulatedPeripheral, SimulatedTransport,
    Transport, TransportCall,
};
pub use gattkit_core::{
    CentralState, ConnectionState, DeviceEvent, DeviceId, Error, EventBus, EventKind, GattError,
    GattValue, GattValueType, Proximity, Result, ServiceCharacteristic, WriteType,
};
pub use gattkit_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable selecting the log output format (`pretty` or `json`)
pub const LOG_FORMAT_ENV: &str = "GATTKIT_LOG_FORMAT";

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support, `info` when unset
/// - Pretty console output, or JSON lines when `GATTKIT_LOG_FORMAT=json`
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .json();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Transaction client settings derived from a loaded config
pub fn client_config(config: &Config) -> GattClientConfig {
    GattClientConfig {
        default_timeout: config.gatt.default_timeout(),
    }
}

/// Connection manager settings derived from a loaded config
pub fn manager_config(config: &Config) -> ConnectionManagerConfig {
    ConnectionManagerConfig {
        reconnect_delay: config.connection.reconnect_delay(),
        connect_timeout: config.connection.connect_timeout(),
        rssi_poll_interval: config.connection.rssi_poll_interval(),
    }
}

/// All engine parts wired to one transport
///
/// The engine keeps the central delegate alive; dropping it detaches
/// callback routing.
pub struct GattEngine {
    transport: Arc<dyn Transport>,
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    manager: Arc<ConnectionManager>,
    central: Arc<Central>,
    client: GattClient,
}

impl GattEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, &Config::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(EventBus::with_config(config.event_bus.to_bus_config()));
        let manager = ConnectionManager::with_config(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&bus),
            manager_config(config),
        );
        let central = Central::attach(
            transport.as_ref(),
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&manager),
        );
        let client = GattClient::with_config(
            Arc::clone(&registry),
            Arc::clone(&bus),
            client_config(config),
        );

        tracing::debug!(
            "GattEngine ready (central {:?})",
            transport.central_state()
        );

        Self {
            transport,
            registry,
            bus,
            manager,
            central,
            client,
        }
    }

    /// Make a peripheral known to the engine without connecting it
    pub fn register_device(
        &self,
        id: impl Into<DeviceId>,
        name: impl Into<String>,
    ) -> Arc<BluetoothDevice> {
        let id = id.into();
        if let Some(existing) = self.registry.get(&id) {
            return existing;
        }
        self.registry.insert(BluetoothDevice::new(
            id,
            name,
            Arc::clone(&self.transport),
        ))
    }

    /// Register a peripheral and keep it connected
    pub fn add_device(
        &self,
        id: impl Into<DeviceId>,
        name: impl Into<String>,
    ) -> Arc<BluetoothDevice> {
        let device = self.register_device(id, name);
        self.manager.add(&device);
        device
    }

    /// Stop maintaining a device's link and forget it
    pub fn forget_device(&self, id: &DeviceId) -> Option<Arc<BluetoothDevice>> {
        self.manager.evict(id)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn central(&self) -> &Arc<Central> {
        &self.central
    }

    pub fn client(&self) -> &GattClient {
        &self.client
    }
}

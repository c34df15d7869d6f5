#![allow(dead_code)]

use gattkit_communication::{
    BluetoothDevice, Central, ConnectionManager, ConnectionManagerConfig, DeviceRegistry,
    GattClient, SimulatedPeripheral, SimulatedTransport, Transport,
};
use gattkit_core::{DeviceId, EventBus, GattValueType, ServiceCharacteristic};
use std::sync::Arc;
use std::time::Duration;

pub fn battery_level() -> ServiceCharacteristic {
    ServiceCharacteristic::from_short(0x180f, 0x2a19, "Battery Level", GattValueType::Integer)
}

pub fn device_name() -> ServiceCharacteristic {
    ServiceCharacteristic::from_short(0x1800, 0x2a00, "Device Name", GattValueType::String)
}

pub fn led_control() -> ServiceCharacteristic {
    ServiceCharacteristic::from_short(0xfff0, 0xfff1, "LED Control", GattValueType::Bytes)
}

/// A sensor exposing battery level, device name and an LED control point
pub fn sensor(id: &str) -> SimulatedPeripheral {
    SimulatedPeripheral::new(id)
        .with_attribute(&battery_level(), Some(vec![0x5a]))
        .with_attribute(&device_name(), Some(b"Thermo\0".to_vec()))
        .with_attribute(&led_control(), Some(vec![0]))
}

pub struct Harness {
    pub transport: SimulatedTransport,
    pub registry: Arc<DeviceRegistry>,
    pub bus: Arc<EventBus>,
    pub manager: Arc<ConnectionManager>,
    pub central: Arc<Central>,
    pub client: GattClient,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ConnectionManagerConfig {
            reconnect_delay: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
            rssi_poll_interval: None,
        })
    }

    pub fn with_config(config: ConnectionManagerConfig) -> Self {
        let transport = SimulatedTransport::new();
        let shared: Arc<dyn Transport> = Arc::new(transport.clone());
        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(EventBus::new());
        let manager = ConnectionManager::with_config(
            Arc::clone(&shared),
            Arc::clone(&registry),
            Arc::clone(&bus),
            config,
        );
        let central = Central::attach(
            shared.as_ref(),
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&manager),
        );
        let client = GattClient::new(Arc::clone(&registry), Arc::clone(&bus));
        Self {
            transport,
            registry,
            bus,
            manager,
            central,
            client,
        }
    }

    /// Register a peripheral with the transport and the device registry
    pub fn register(&self, peripheral: SimulatedPeripheral) -> Arc<BluetoothDevice> {
        let id = peripheral.id().clone();
        self.transport.add_peripheral(peripheral);
        let shared: Arc<dyn Transport> = Arc::new(self.transport.clone());
        self.registry
            .insert(BluetoothDevice::new(id, "Sensor", shared))
    }

    /// Register a peripheral and mark its link established
    pub fn connected(&self, peripheral: SimulatedPeripheral) -> Arc<BluetoothDevice> {
        let device = self.register(peripheral);
        self.transport.force_connected(device.id());
        device
    }
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn id(name: &str) -> DeviceId {
    DeviceId::new(name)
}

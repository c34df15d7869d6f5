use std::sync::Arc;
use std::time::Duration;

use gattkit::{
    init_logging, Config, ConnectionUpdate, DeviceEvent, EventKind, GattEngine, GattOperation,
    GattValue, GattValueType, ServiceCharacteristic, SimulatedPeripheral, SimulatedTransport,
};

fn battery_level() -> ServiceCharacteristic {
    ServiceCharacteristic::from_short(0x180f, 0x2a19, "Battery Level", GattValueType::Integer)
}

fn device_name() -> ServiceCharacteristic {
    ServiceCharacteristic::from_short(0x1800, 0x2a00, "Device Name", GattValueType::String)
}

fn led_control() -> ServiceCharacteristic {
    ServiceCharacteristic::from_short(0xfff0, 0xfff1, "LED Control", GattValueType::Bytes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_file(std::path::Path::new(&path))?,
        None => Config::load_or_default(&Config::default_config_path()?)?,
    };

    let transport = SimulatedTransport::with_latency(Duration::from_millis(5));
    transport.add_peripheral(
        SimulatedPeripheral::new("demo-sensor")
            .with_attribute(&battery_level(), Some(vec![87]))
            .with_attribute(&device_name(), Some(b"Demo Sensor".to_vec()))
            .with_attribute(&led_control(), Some(vec![0]))
            .with_rssi(-58),
    );

    let engine = GattEngine::with_config(Arc::new(transport.clone()), &config);
    engine.bus().subscribe_all(
        &[
            EventKind::TimedOut,
            EventKind::ConnectionFailed,
            EventKind::Detected,
        ],
        |event: DeviceEvent| tracing::info!("Event: {:?}", event),
    );

    let mut updates = engine.manager().updates();
    let device = engine.add_device("demo-sensor", "Demo Sensor");
    match tokio::time::timeout(config.connection.connect_timeout(), updates.recv()).await {
        Ok(Ok(ConnectionUpdate::Connected(id))) => tracing::info!("Connected to {}", id),
        other => anyhow::bail!("connection did not complete: {:?}", other),
    }

    let results = engine
        .client()
        .request(
            device.id(),
            vec![
                GattOperation::Read(battery_level()),
                GattOperation::Read(device_name()),
                GattOperation::Write {
                    attribute: led_control(),
                    payload: vec![1],
                    require_ack: true,
                },
            ],
        )
        .await;

    for result in &results {
        match result {
            Ok(bytes) => tracing::info!("Result: {:?}", bytes),
            Err(err) => tracing::warn!("Operation failed: {}", err),
        }
    }

    if let Some(Ok(bytes)) = results.first() {
        let level = GattValue::new(&battery_level(), Some(bytes.clone()));
        tracing::info!("Battery level: {:?}", level.as_integer());
    }

    // Drop the link and let the manager bring it back
    let reconnected = engine
        .bus()
        .subscribe(&[EventKind::Disconnected], Some(device.id()), |event| {
            tracing::info!("Link lost: {:?}", event);
        });
    transport.drop_link(device.id());
    tokio::time::sleep(config.connection.reconnect_delay() + Duration::from_millis(50)).await;
    tracing::info!("State after reconnect: {:?}", device.connection_state());
    engine.bus().unsubscribe(&[EventKind::Disconnected], reconnected);

    engine.forget_device(device.id());
    Ok(())
}

mod common;

use common::{battery_level, device_name, eventually, id, led_control, sensor, Harness};
use gattkit_communication::{
    CharacteristicRef, GattOperation, GattRequestStatus, PendingOperation, PeripheralDelegate,
    SimulatedPeripheral, TransportCall,
};
use gattkit_core::{
    ConnectionState, DeviceEvent, DeviceId, EventKind, GattError, GattValue, GattValueType, OperationKind,
    ServiceCharacteristic, TransportError, WriteType,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_get_discovers_then_reads() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = battery_level();
    let target = CharacteristicRef::from(&attr);

    let value = harness.client.get(device.id(), &attr, None).await;
    assert_eq!(value, Ok(vec![0x5a]));

    assert_eq!(
        harness.transport.calls_for(device.id()),
        vec![
            TransportCall::DiscoverServices(id("p1"), vec![attr.service]),
            TransportCall::DiscoverCharacteristics(id("p1"), attr.service, vec![attr.characteristic]),
            TransportCall::Read(id("p1"), target),
        ]
    );
    assert!(device.has_attribute(&attr));
    assert_eq!(device.delegate_count(), 0);
    assert_eq!(harness.bus.directive_count(EventKind::Disconnected), 0);
}

#[tokio::test]
async fn test_cached_attribute_skips_discovery() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = device_name();

    harness.client.get(device.id(), &attr, None).await.unwrap();
    harness.transport.clear_calls();

    let bytes = harness.client.get(device.id(), &attr, None).await.unwrap();
    assert_eq!(
        GattValue::new(&attr, Some(bytes)).as_string().as_deref(),
        Some("Thermo")
    );
    assert_eq!(
        harness.transport.calls(),
        vec![TransportCall::Read(id("p1"), CharacteristicRef::from(&attr))]
    );
}

#[tokio::test]
async fn test_set_without_ack_settles_without_callback() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = led_control();

    // Warm the discovery cache, then stop answering
    harness.client.get(device.id(), &attr, None).await.unwrap();
    harness.transport.set_silent(true);

    let result = harness
        .client
        .set(device.id(), &attr, vec![1, 2], false, Some(Duration::from_millis(200)))
        .await;
    assert_eq!(result, Ok(()));
    assert_eq!(harness.transport.value(device.id(), &attr), Some(vec![1, 2]));
    assert_eq!(
        harness.transport.calls().last(),
        Some(&TransportCall::Write(
            id("p1"),
            CharacteristicRef::from(&attr),
            vec![1, 2],
            WriteType::WithoutResponse
        ))
    );

    let acked = harness
        .client
        .set(device.id(), &attr, vec![3], true, Some(Duration::from_millis(50)))
        .await;
    assert_eq!(acked, Err(GattError::TimedOut));
}

#[tokio::test]
async fn test_set_with_ack_waits_for_write_callback() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));

    let result = harness
        .client
        .set(device.id(), &led_control(), vec![0xff], true, None)
        .await;
    assert_eq!(result, Ok(()));
    assert_eq!(harness.transport.value(device.id(), &led_control()), Some(vec![0xff]));
}

#[tokio::test]
async fn test_timeout_publishes_event_and_cleans_up() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    harness.transport.set_silent(true);

    let timeouts: Arc<Mutex<Vec<DeviceEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = timeouts.clone();
    harness
        .bus
        .subscribe_all(&[EventKind::TimedOut], move |event| sink.lock().push(event));

    let started = Instant::now();
    let result = harness
        .client
        .get(device.id(), &battery_level(), Some(Duration::from_millis(100)))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result, Err(GattError::TimedOut));
    assert!(elapsed >= Duration::from_millis(100), "settled early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "settled late: {:?}", elapsed);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        *timeouts.lock(),
        vec![DeviceEvent::TimedOut {
            device: id("p1"),
            operation: OperationKind::Get,
        }]
    );
    assert_eq!(device.delegate_count(), 0);
    assert_eq!(harness.bus.directive_count(EventKind::Disconnected), 0);
}

#[tokio::test]
async fn test_timeout_event_carries_operation_kind() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    harness.transport.set_silent(true);
    let mut events = harness.bus.receiver();

    let result = harness
        .client
        .set_notify_enabled(device.id(), &battery_level(), true, Some(Duration::from_millis(30)))
        .await;
    assert_eq!(result, Err(GattError::TimedOut));

    match events.try_recv() {
        Ok(DeviceEvent::TimedOut { operation, .. }) => assert_eq!(operation, OperationKind::Notify),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_not_connected_fails_without_timer() {
    let harness = Harness::new();
    let device = harness.register(sensor("p1"));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    harness.bus.subscribe_all(&[EventKind::TimedOut], move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let pending = harness
        .client
        .get(device.id(), &battery_level(), Some(Duration::from_millis(20)));
    assert!(pending.is_rejected());
    assert_eq!(pending.await, Err(GattError::NotConnected));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(harness.transport.calls().is_empty());
    assert_eq!(device.delegate_count(), 0);
    assert_eq!(harness.bus.directive_count(EventKind::Disconnected), 0);
}

#[tokio::test]
async fn test_mismatched_peripheral_stops_transaction() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    harness.transport.set_silent(true);
    let attr = battery_level();

    let pending = harness.client.get(device.id(), &attr, Some(Duration::from_secs(2)));
    assert!(eventually(Duration::from_millis(500), || {
        pending.status() == GattRequestStatus::DiscoveringServices
    })
    .await);

    device.services_discovered(&id("impostor"), Ok(&[attr.service]));

    assert_eq!(pending.await, Err(GattError::MismatchedPeripheral));
    let calls = harness.transport.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], TransportCall::DiscoverServices(..)));
    assert_eq!(device.delegate_count(), 0);
}

#[tokio::test]
async fn test_foreign_discovery_does_not_fill_cache() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = battery_level();

    device.services_discovered(&id("impostor"), Ok(&[attr.service]));
    device.characteristics_discovered(&id("impostor"), attr.service, Ok(&[attr.characteristic]));
    assert!(!device.has_attribute(&attr));

    assert_eq!(harness.client.get(device.id(), &attr, None).await, Ok(vec![0x5a]));
    let calls = harness.transport.calls_for(device.id());
    assert!(matches!(calls[0], TransportCall::DiscoverServices(..)));
    assert!(matches!(calls[1], TransportCall::DiscoverCharacteristics(..)));
}

/// Populate the discovery cache for `attr`, then silence the transport
async fn warm_then_silence(harness: &Harness, device: &DeviceId, attr: &ServiceCharacteristic) {
    harness.client.get(device, attr, None).await.unwrap();
    harness.transport.set_silent(true);
}

async fn wait_for<T>(pending: &PendingOperation<T>, status: GattRequestStatus) {
    assert!(eventually(Duration::from_millis(500), || pending.status() == status).await);
}

#[tokio::test]
async fn test_foreign_characteristics_stop_transaction() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    harness.transport.set_silent(true);
    let attr = battery_level();

    let pending = harness.client.get(device.id(), &attr, Some(Duration::from_secs(2)));
    wait_for(&pending, GattRequestStatus::DiscoveringServices).await;
    device.services_discovered(device.id(), Ok(&[attr.service]));
    wait_for(&pending, GattRequestStatus::DiscoveringCharacteristics).await;

    device.characteristics_discovered(&id("impostor"), attr.service, Ok(&[attr.characteristic]));

    assert_eq!(pending.await, Err(GattError::MismatchedPeripheral));
    assert!(!harness
        .transport
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::Read(..))));
}

#[tokio::test]
async fn test_foreign_value_stops_read() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = battery_level();
    warm_then_silence(&harness, device.id(), &attr).await;

    let pending = harness.client.get(device.id(), &attr, Some(Duration::from_secs(2)));
    wait_for(&pending, GattRequestStatus::Reading).await;
    device.value_updated(&id("impostor"), CharacteristicRef::from(&attr), Ok(Some(&[9])));

    assert_eq!(pending.await, Err(GattError::MismatchedPeripheral));
    assert_eq!(device.delegate_count(), 0);
}

#[tokio::test]
async fn test_foreign_write_ack_stops_write() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = led_control();
    warm_then_silence(&harness, device.id(), &attr).await;

    let pending = harness
        .client
        .set(device.id(), &attr, vec![1], true, Some(Duration::from_secs(2)));
    wait_for(&pending, GattRequestStatus::Writing).await;
    device.value_written(&id("impostor"), CharacteristicRef::from(&attr), Ok(()));

    assert_eq!(pending.await, Err(GattError::MismatchedPeripheral));
}

#[tokio::test]
async fn test_foreign_notify_state_stops_toggle() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = battery_level();
    warm_then_silence(&harness, device.id(), &attr).await;

    let pending = harness
        .client
        .set_notify_enabled(device.id(), &attr, true, Some(Duration::from_secs(2)));
    wait_for(&pending, GattRequestStatus::Notifying).await;
    device.notification_state_changed(&id("impostor"), CharacteristicRef::from(&attr), Ok(true));

    assert_eq!(pending.await, Err(GattError::MismatchedPeripheral));
}

#[tokio::test]
async fn test_missing_service_and_characteristic() {
    let harness = Harness::new();
    let other = ServiceCharacteristic::from_short(0x180f, 0x2a1a, "Battery Power State", GattValueType::Byte);
    let device = harness.connected(
        SimulatedPeripheral::new("p1")
            .with_attribute(&battery_level(), Some(vec![1]))
            .with_service(device_name().service),
    );

    let missing_service = harness.client.get(device.id(), &led_control(), None).await;
    assert_eq!(missing_service, Err(GattError::ServiceNotFound));

    let missing_characteristic = harness.client.get(device.id(), &other, None).await;
    assert_eq!(missing_characteristic, Err(GattError::CharacteristicNotFound));
}

#[tokio::test]
async fn test_read_without_payload_is_data_not_present() {
    let harness = Harness::new();
    let device = harness.connected(SimulatedPeripheral::new("p1").with_attribute(&battery_level(), None));

    let result = harness.client.get(device.id(), &battery_level(), None).await;
    assert_eq!(result, Err(GattError::DataNotPresent));
}

#[tokio::test]
async fn test_transport_error_is_surfaced() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let error = TransportError::new("insufficient authentication");
    harness.transport.set_callback_error(Some(error.clone()));

    let result = harness.client.get(device.id(), &battery_level(), None).await;
    assert_eq!(result, Err(GattError::Transport(error)));
}

#[tokio::test]
async fn test_disconnect_settles_only_target_device() {
    let harness = Harness::new();
    let first = harness.connected(sensor("p1"));
    let second = harness.connected(sensor("p2"));
    harness.transport.set_silent(true);

    let attr = battery_level();
    let target = harness.client.get(first.id(), &attr, Some(Duration::from_secs(2)));
    let mut bystander = harness.client.get(second.id(), &attr, Some(Duration::from_secs(2)));

    harness.bus.report([DeviceEvent::Disconnected {
        device: id("p1"),
        last_state: Some(ConnectionState::Connected),
    }]);

    assert_eq!(
        target.await,
        Err(GattError::PeripheralDisconnected(Some(ConnectionState::Connected)))
    );
    assert!(tokio::time::timeout(Duration::from_millis(100), &mut bystander)
        .await
        .is_err());
    assert_eq!(bystander.status(), GattRequestStatus::DiscoveringServices);
    assert_eq!(first.delegate_count(), 0);
    assert_eq!(second.delegate_count(), 1);
}

#[tokio::test]
async fn test_link_loss_settles_in_flight_transaction() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    harness.transport.set_silent(true);

    let pending = harness
        .client
        .get(device.id(), &battery_level(), Some(Duration::from_secs(2)));
    harness.transport.drop_link(device.id());

    assert_eq!(
        pending.await,
        Err(GattError::PeripheralDisconnected(Some(ConnectionState::Disconnected)))
    );
    assert!(!device.has_attribute(&battery_level()));
}

#[tokio::test]
async fn test_concurrent_duplicate_requests_both_settle() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = battery_level();

    let first = harness.client.get(device.id(), &attr, None);
    let second = harness.client.get(device.id(), &attr, None);
    assert_eq!(device.delegate_count(), 2);

    let (a, b) = tokio::join!(first, second);
    assert_eq!(a, Ok(vec![0x5a]));
    assert_eq!(b, Ok(vec![0x5a]));
    assert_eq!(device.delegate_count(), 0);
}

#[tokio::test]
async fn test_batch_request_keeps_going_after_failure() {
    let harness = Harness::new();
    let device = harness.connected(SimulatedPeripheral::new("p1").with_attribute(&battery_level(), Some(vec![7])));

    let results = harness
        .client
        .request(
            device.id(),
            vec![
                GattOperation::Read(device_name()),
                GattOperation::Write {
                    attribute: battery_level(),
                    payload: vec![8],
                    require_ack: true,
                },
                GattOperation::Read(battery_level()),
            ],
        )
        .await;

    assert_eq!(
        results,
        vec![Err(GattError::ServiceNotFound), Ok(Vec::new()), Ok(vec![8])]
    );
}

#[tokio::test]
async fn test_notification_subscription_routes_values() {
    let harness = Harness::new();
    let device = harness.connected(sensor("p1"));
    let attr = battery_level();

    let seen: Arc<Mutex<Vec<Option<u64>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    harness
        .client
        .subscribe_notifications(
            device.id(),
            &attr,
            "battery-widget",
            Arc::new(move |_: &ServiceCharacteristic, value: GattValue| {
                sink.lock().push(value.as_integer())
            }),
        )
        .await
        .unwrap();
    assert!(harness.transport.is_notifying(device.id(), &attr));

    harness.transport.push_notification(device.id(), &attr, vec![0x40]);
    assert!(eventually(Duration::from_millis(500), || seen.lock().len() == 1).await);
    assert_eq!(*seen.lock(), vec![Some(0x40)]);

    harness
        .client
        .unsubscribe_notifications(device.id(), &attr, "battery-widget")
        .await
        .unwrap();
    assert!(!harness.transport.is_notifying(device.id(), &attr));
    assert_eq!(device.notify_subscriber_count(), 0);
}

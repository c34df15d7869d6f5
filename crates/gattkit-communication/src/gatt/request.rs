//! Per-operation transaction state machine
//!
//! Every `get`, `set` and notify toggle runs as one [`GattRequest`] on its own
//! task. The request subscribes to the device's raw callbacks and to the
//! device's disconnect events, walks service discovery, characteristic
//! discovery and the action in order, and settles its outcome exactly once.
//! Completion, timeout and disconnect all converge on the same cleanup.

use gattkit_core::constants::DELEGATE_KEY_PREFIX;
use gattkit_core::{
    ConnectionState, DeviceEvent, DeviceId, EventBus, EventKind, GattError, OperationKind,
    ServiceCharacteristic, SubscriptionId, TransportError, WriteType,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use super::outcome::{Outcome, Settled};
use crate::communication::{CharacteristicRef, PeripheralDelegate};
use crate::device::{BluetoothDevice, DeviceRegistry};

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stage of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GattRequestStatus {
    /// Not started, or ended by a disconnect
    #[default]
    Disconnected,
    /// Waiting for service discovery
    DiscoveringServices,
    /// Waiting for characteristic discovery
    DiscoveringCharacteristics,
    /// Read issued
    Reading,
    /// Write issued
    Writing,
    /// Notification toggle issued
    Notifying,
    /// Gave up waiting
    TimedOut,
    /// Settled successfully
    Completed,
}

impl GattRequestStatus {
    /// Whether the transaction can no longer change state
    pub fn is_final(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Completed)
    }
}

impl std::fmt::Display for GattRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::DiscoveringServices => "discovering services",
            Self::DiscoveringCharacteristics => "discovering characteristics",
            Self::Reading => "reading",
            Self::Writing => "writing",
            Self::Notifying => "notifying",
            Self::TimedOut => "timed out",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Concrete action performed once the attribute is located
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Read,
    Write { payload: Vec<u8>, write_type: WriteType },
    Notify { enabled: bool },
}

impl Action {
    fn kind(&self) -> OperationKind {
        match self {
            Action::Read => OperationKind::Get,
            Action::Write { .. } => OperationKind::Set,
            Action::Notify { .. } => OperationKind::Notify,
        }
    }
}

/// Owned copy of a callback, queued onto the transaction's task
#[derive(Debug)]
enum Signal {
    Services(DeviceId, Result<Vec<Uuid>, TransportError>),
    Characteristics(DeviceId, Uuid, Result<Vec<Uuid>, TransportError>),
    Value(DeviceId, CharacteristicRef, Result<Option<Vec<u8>>, TransportError>),
    Written(DeviceId, CharacteristicRef, Result<(), TransportError>),
    NotifyState(DeviceId, CharacteristicRef, Result<bool, TransportError>),
    Disconnected(Option<ConnectionState>),
}

/// Callback target registered on the device for one transaction
struct RequestDelegate {
    tx: mpsc::UnboundedSender<Signal>,
}

impl RequestDelegate {
    fn forward(&self, signal: Signal) {
        // The transaction may already have settled
        let _ = self.tx.send(signal);
    }
}

impl PeripheralDelegate for RequestDelegate {
    fn services_discovered(&self, peripheral: &DeviceId, services: Result<&[Uuid], &TransportError>) {
        self.forward(Signal::Services(
            peripheral.clone(),
            services.map(<[Uuid]>::to_vec).map_err(TransportError::clone),
        ));
    }

    fn characteristics_discovered(
        &self,
        peripheral: &DeviceId,
        service: Uuid,
        characteristics: Result<&[Uuid], &TransportError>,
    ) {
        self.forward(Signal::Characteristics(
            peripheral.clone(),
            service,
            characteristics.map(<[Uuid]>::to_vec).map_err(TransportError::clone),
        ));
    }

    fn value_updated(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        value: Result<Option<&[u8]>, &TransportError>,
    ) {
        self.forward(Signal::Value(
            peripheral.clone(),
            characteristic,
            value.map(|data| data.map(<[u8]>::to_vec)).map_err(TransportError::clone),
        ));
    }

    fn value_written(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), &TransportError>,
    ) {
        self.forward(Signal::Written(
            peripheral.clone(),
            characteristic,
            result.map_err(TransportError::clone),
        ));
    }

    fn notification_state_changed(
        &self,
        peripheral: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: Result<bool, &TransportError>,
    ) {
        self.forward(Signal::NotifyState(
            peripheral.clone(),
            characteristic,
            enabled.map_err(TransportError::clone),
        ));
    }
}

/// Removes both subscriptions exactly once, on settlement or drop
struct SubscriptionGuard {
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    device: DeviceId,
    key: String,
    subscription: SubscriptionId,
    released: bool,
}

impl SubscriptionGuard {
    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(device) = self.registry.get(&self.device) {
            device.unsubscribe(&self.key);
        }
        self.bus
            .unsubscribe(&[EventKind::Disconnected], self.subscription);
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// What a started transaction hands back to its caller
pub(crate) struct Started {
    pub receiver: oneshot::Receiver<Result<Settled, GattError>>,
    pub status: Arc<Mutex<GattRequestStatus>>,
}

/// One in-flight attribute operation
pub(crate) struct GattRequest {
    device: DeviceId,
    attribute: ServiceCharacteristic,
    action: Action,
    deadline: Instant,
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    status: Arc<Mutex<GattRequestStatus>>,
    outcome: Outcome<Settled>,
    guard: SubscriptionGuard,
}

impl GattRequest {
    /// Validate the precondition, subscribe, and launch the transaction
    ///
    /// A device that is unknown or not connected fails with `NotConnected`
    /// before anything is subscribed or any timer is armed.
    pub(crate) fn start(
        registry: &Arc<DeviceRegistry>,
        bus: &Arc<EventBus>,
        device_id: &DeviceId,
        attribute: &ServiceCharacteristic,
        action: Action,
        timeout: Duration,
    ) -> Result<Started, GattError> {
        let device = registry.get(device_id).ok_or(GattError::NotConnected)?;
        if !device.connection_state().is_connected() {
            tracing::debug!(
                "Rejecting {} {} on {}: not connected",
                action.kind(),
                attribute.display_name,
                device_id.short_id()
            );
            return Err(GattError::NotConnected);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TransportError::new("no async runtime available"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Self::watch_disconnect(bus, device_id, tx.clone());

        let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{}:{}:{}:{}",
            DELEGATE_KEY_PREFIX, device_id, attribute.characteristic, seq
        );
        device.subscribe(key.clone(), Arc::new(RequestDelegate { tx }));

        let guard = SubscriptionGuard {
            registry: Arc::clone(registry),
            bus: Arc::clone(bus),
            device: device_id.clone(),
            key,
            subscription,
            released: false,
        };

        let (outcome, receiver) = Outcome::channel();
        let status = Arc::new(Mutex::new(GattRequestStatus::Disconnected));
        let request = GattRequest {
            device: device_id.clone(),
            attribute: attribute.clone(),
            action,
            deadline: Instant::now() + timeout,
            registry: Arc::clone(registry),
            bus: Arc::clone(bus),
            status: Arc::clone(&status),
            outcome,
            guard,
        };

        runtime.spawn(request.run(rx));
        Ok(Started { receiver, status })
    }

    /// Scoped disconnect subscription that removes itself after firing once
    fn watch_disconnect(
        bus: &Arc<EventBus>,
        device: &DeviceId,
        tx: mpsc::UnboundedSender<Signal>,
    ) -> SubscriptionId {
        let own_key: Arc<OnceLock<SubscriptionId>> = Arc::new(OnceLock::new());
        let handler_key = Arc::clone(&own_key);
        let weak_bus = Arc::downgrade(bus);

        let id = bus.subscribe(&[EventKind::Disconnected], Some(device), move |event| {
            if let DeviceEvent::Disconnected { last_state, .. } = event {
                let _ = tx.send(Signal::Disconnected(last_state));
            }
            if let (Some(bus), Some(id)) = (weak_bus.upgrade(), handler_key.get()) {
                bus.unsubscribe(&[EventKind::Disconnected], *id);
            }
        });
        let _ = own_key.set(id);
        id
    }

    async fn run(mut self, mut signals: mpsc::UnboundedReceiver<Signal>) {
        tracing::debug!(
            "START {} {} on {}",
            self.action.kind(),
            self.attribute.display_name,
            self.device.short_id()
        );

        let result = match self.begin() {
            Some(result) => result,
            None => {
                let timer = tokio::time::sleep_until(self.deadline);
                tokio::pin!(timer);
                loop {
                    tokio::select! {
                        biased;
                        signal = signals.recv() => match signal {
                            Some(signal) => {
                                if let Some(result) = self.handle(signal) {
                                    break result;
                                }
                            }
                            None => break Err(GattError::PeripheralDisconnected(None)),
                        },
                        _ = &mut timer => break self.time_out(),
                    }
                }
            }
        };

        self.finish(result);
    }

    /// Kick off discovery, or go straight to the action when cached
    fn begin(&self) -> Option<Result<Settled, GattError>> {
        let device = match self.resolve() {
            Ok(device) => device,
            Err(e) => return Some(Err(e)),
        };

        if device.has_attribute(&self.attribute) {
            return self.perform(&device);
        }

        self.set_status(GattRequestStatus::DiscoveringServices);
        device
            .transport()
            .discover_services(&self.device, &[self.attribute.service])
            .err()
            .map(|e| Err(self.command_failed(e)))
    }

    fn handle(&self, signal: Signal) -> Option<Result<Settled, GattError>> {
        match signal {
            Signal::Disconnected(last_state) => {
                tracing::warn!(
                    "{} {} on {} interrupted by disconnect",
                    self.action.kind(),
                    self.attribute.display_name,
                    self.device.short_id()
                );
                self.set_status(GattRequestStatus::Disconnected);
                Some(Err(GattError::PeripheralDisconnected(last_state)))
            }
            Signal::Services(peripheral, result) => {
                if self.status() != GattRequestStatus::DiscoveringServices {
                    return None;
                }
                self.on_services(&peripheral, result)
            }
            Signal::Characteristics(peripheral, service, result) => {
                if self.status() != GattRequestStatus::DiscoveringCharacteristics
                    || service != self.attribute.service
                {
                    return None;
                }
                self.on_characteristics(&peripheral, result)
            }
            Signal::Value(peripheral, characteristic, result) => {
                if !self.expects(GattRequestStatus::Reading, characteristic) {
                    return None;
                }
                let data = match result {
                    Ok(data) => data,
                    Err(e) => return Some(Err(e.into())),
                };
                if let Err(e) = self.verify(&peripheral) {
                    return Some(Err(e));
                }
                Some(match data {
                    Some(bytes) => self.complete(Settled::Value(bytes)),
                    None => Err(GattError::DataNotPresent),
                })
            }
            Signal::Written(peripheral, characteristic, result) => {
                if !self.expects(GattRequestStatus::Writing, characteristic) {
                    return None;
                }
                Some(self.acknowledge(&peripheral, result))
            }
            Signal::NotifyState(peripheral, characteristic, result) => {
                if !self.expects(GattRequestStatus::Notifying, characteristic) {
                    return None;
                }
                Some(self.acknowledge(&peripheral, result.map(|_| ())))
            }
        }
    }

    fn on_services(
        &self,
        peripheral: &DeviceId,
        result: Result<Vec<Uuid>, TransportError>,
    ) -> Option<Result<Settled, GattError>> {
        let services = match result {
            Ok(services) => services,
            Err(e) => return Some(Err(e.into())),
        };
        if let Err(e) = self.verify(peripheral) {
            return Some(Err(e));
        }
        if !services.contains(&self.attribute.service) {
            return Some(Err(GattError::ServiceNotFound));
        }

        let device = match self.resolve() {
            Ok(device) => device,
            Err(e) => return Some(Err(e)),
        };
        self.set_status(GattRequestStatus::DiscoveringCharacteristics);
        device
            .transport()
            .discover_characteristics(
                &self.device,
                self.attribute.service,
                &[self.attribute.characteristic],
            )
            .err()
            .map(|e| Err(self.command_failed(e)))
    }

    fn on_characteristics(
        &self,
        peripheral: &DeviceId,
        result: Result<Vec<Uuid>, TransportError>,
    ) -> Option<Result<Settled, GattError>> {
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => return Some(Err(e.into())),
        };
        if let Err(e) = self.verify(peripheral) {
            return Some(Err(e));
        }
        if !characteristics.contains(&self.attribute.characteristic) {
            return Some(Err(GattError::CharacteristicNotFound));
        }

        match self.resolve() {
            Ok(device) => self.perform(&device),
            Err(e) => Some(Err(e)),
        }
    }

    /// Issue the read, write or notify command
    fn perform(&self, device: &BluetoothDevice) -> Option<Result<Settled, GattError>> {
        let target = CharacteristicRef::from(&self.attribute);
        let transport = device.transport();

        match &self.action {
            Action::Read => {
                self.set_status(GattRequestStatus::Reading);
                transport
                    .read_value(&self.device, target)
                    .err()
                    .map(|e| Err(self.command_failed(e)))
            }
            Action::Write {
                payload,
                write_type,
            } => {
                self.set_status(GattRequestStatus::Writing);
                match transport.write_value(&self.device, target, payload, *write_type) {
                    Err(e) => Some(Err(self.command_failed(e))),
                    // No completion callback follows an unacknowledged write
                    Ok(()) if !write_type.expects_ack() => Some(self.complete(Settled::Done)),
                    Ok(()) => None,
                }
            }
            Action::Notify { enabled } => {
                self.set_status(GattRequestStatus::Notifying);
                transport
                    .set_notify_value(&self.device, target, *enabled)
                    .err()
                    .map(|e| Err(self.command_failed(e)))
            }
        }
    }

    fn acknowledge(
        &self,
        peripheral: &DeviceId,
        result: Result<(), TransportError>,
    ) -> Result<Settled, GattError> {
        result?;
        self.verify(peripheral)?;
        self.complete(Settled::Done)
    }

    fn complete(&self, settled: Settled) -> Result<Settled, GattError> {
        self.set_status(GattRequestStatus::Completed);
        Ok(settled)
    }

    fn time_out(&self) -> Result<Settled, GattError> {
        self.set_status(GattRequestStatus::TimedOut);
        tracing::warn!(
            "TIMEOUT {} {} on {}",
            self.action.kind(),
            self.attribute.display_name,
            self.device.short_id()
        );
        self.bus.report([DeviceEvent::TimedOut {
            device: self.device.clone(),
            operation: self.action.kind(),
        }]);
        Err(GattError::TimedOut)
    }

    /// Unconditional cleanup shared by every settlement path
    fn finish(&mut self, result: Result<Settled, GattError>) {
        self.guard.release();
        let outcome = match &result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        if !self.outcome.settle(result) {
            tracing::debug!("Outcome already settled, dropping later result");
        }
        tracing::debug!(
            "ALWAYS {} {} on {} ({}, {})",
            self.action.kind(),
            self.attribute.display_name,
            self.device.short_id(),
            self.status(),
            outcome
        );
    }

    fn expects(&self, status: GattRequestStatus, characteristic: CharacteristicRef) -> bool {
        self.status() == status && characteristic.addresses(&self.attribute)
    }

    fn verify(&self, peripheral: &DeviceId) -> Result<(), GattError> {
        if *peripheral == self.device {
            Ok(())
        } else {
            tracing::warn!(
                "Callback from {} while talking to {}",
                peripheral.short_id(),
                self.device.short_id()
            );
            Err(GattError::MismatchedPeripheral)
        }
    }

    /// Re-resolve the device; gone or not connected counts as a disconnect
    fn resolve(&self) -> Result<Arc<BluetoothDevice>, GattError> {
        let device = self
            .registry
            .get(&self.device)
            .ok_or(GattError::PeripheralDisconnected(None))?;
        let state = device.connection_state();
        if state.is_connected() {
            Ok(device)
        } else {
            Err(GattError::PeripheralDisconnected(Some(state)))
        }
    }

    fn command_failed(&self, error: TransportError) -> GattError {
        tracing::error!(
            "Transport rejected {} {} on {}: {}",
            self.action.kind(),
            self.attribute.display_name,
            self.device.short_id(),
            error
        );
        error.into()
    }

    fn status(&self) -> GattRequestStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: GattRequestStatus) {
        *self.status.lock() = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind() {
        assert_eq!(Action::Read.kind(), OperationKind::Get);
        let write = Action::Write {
            payload: vec![1],
            write_type: WriteType::WithResponse,
        };
        assert_eq!(write.kind(), OperationKind::Set);
        assert_eq!(Action::Notify { enabled: true }.kind(), OperationKind::Notify);
    }

    #[test]
    fn test_status_finality() {
        assert!(GattRequestStatus::Completed.is_final());
        assert!(GattRequestStatus::TimedOut.is_final());
        assert!(!GattRequestStatus::Reading.is_final());
        assert_eq!(GattRequestStatus::default(), GattRequestStatus::Disconnected);
        assert_eq!(
            GattRequestStatus::DiscoveringCharacteristics.to_string(),
            "discovering characteristics"
        );
    }

    #[test]
    fn test_delegate_forwards_owned_copies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delegate = RequestDelegate { tx };
        let device = DeviceId::new("dev");
        let target = CharacteristicRef::new(Uuid::nil(), Uuid::nil());

        delegate.value_updated(&device, target, Ok(Some(&[7, 8])));
        delegate.rssi_updated(&device, Ok(-40));

        match rx.try_recv() {
            Ok(Signal::Value(peripheral, characteristic, Ok(Some(bytes)))) => {
                assert_eq!(peripheral, device);
                assert_eq!(characteristic, target);
                assert_eq!(bytes, vec![7, 8]);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}

//! # GATT Transactions
//!
//! [`GattClient`] is the caller-facing entry point for attribute operations.
//! Each call starts an independent transaction that:
//! - fails immediately with `NotConnected` when the device is not connected
//! - discovers the service and characteristic unless already cached
//! - performs the read, write or notify toggle
//! - settles once, on completion, timeout or disconnect
//!
//! Retrying is left to the caller; see [`GattError::is_retryable`].

mod outcome;
mod request;

pub use outcome::{Outcome, PendingOperation, Settled};
pub use request::GattRequestStatus;

use gattkit_core::constants::DEFAULT_TRANSACTION_TIMEOUT;
use gattkit_core::{DeviceId, EventBus, GattError, ServiceCharacteristic, WriteType};
use std::sync::Arc;
use std::time::Duration;

use crate::device::{DeviceRegistry, NotifyDelegate};
use outcome::{into_unit, into_value};
use request::{Action, GattRequest};

/// Configuration for attribute transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattClientConfig {
    /// Timeout used when a call does not supply one
    pub default_timeout: Duration,
}

impl Default for GattClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

/// One step of a batch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattOperation {
    /// Read the attribute
    Read(ServiceCharacteristic),
    /// Write the attribute
    Write {
        attribute: ServiceCharacteristic,
        payload: Vec<u8>,
        require_ack: bool,
    },
    /// Enable or disable notifications
    Notify {
        attribute: ServiceCharacteristic,
        enabled: bool,
    },
}

impl GattOperation {
    pub fn attribute(&self) -> &ServiceCharacteristic {
        match self {
            Self::Read(attribute) => attribute,
            Self::Write { attribute, .. } | Self::Notify { attribute, .. } => attribute,
        }
    }
}

/// Result of one batch step; reads carry their bytes, other steps an empty vec
pub type GattOperationResult = Result<Vec<u8>, GattError>;

/// Issues attribute transactions against registered devices
#[derive(Clone)]
pub struct GattClient {
    registry: Arc<DeviceRegistry>,
    bus: Arc<EventBus>,
    config: GattClientConfig,
}

impl GattClient {
    pub fn new(registry: Arc<DeviceRegistry>, bus: Arc<EventBus>) -> Self {
        Self::with_config(registry, bus, GattClientConfig::default())
    }

    pub fn with_config(
        registry: Arc<DeviceRegistry>,
        bus: Arc<EventBus>,
        config: GattClientConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            config,
        }
    }

    pub fn config(&self) -> &GattClientConfig {
        &self.config
    }

    /// Read an attribute
    pub fn get(
        &self,
        device: &DeviceId,
        attribute: &ServiceCharacteristic,
        timeout: Option<Duration>,
    ) -> PendingOperation<Vec<u8>> {
        self.launch(device, attribute, Action::Read, timeout, into_value)
    }

    /// Write an attribute
    ///
    /// Without `require_ack` the operation succeeds as soon as the transport
    /// accepts the write.
    pub fn set(
        &self,
        device: &DeviceId,
        attribute: &ServiceCharacteristic,
        payload: impl Into<Vec<u8>>,
        require_ack: bool,
        timeout: Option<Duration>,
    ) -> PendingOperation<()> {
        let action = Action::Write {
            payload: payload.into(),
            write_type: WriteType::from_ack(require_ack),
        };
        self.launch(device, attribute, action, timeout, into_unit)
    }

    /// Enable or disable change notifications for an attribute
    pub fn set_notify_enabled(
        &self,
        device: &DeviceId,
        attribute: &ServiceCharacteristic,
        enabled: bool,
        timeout: Option<Duration>,
    ) -> PendingOperation<()> {
        self.launch(device, attribute, Action::Notify { enabled }, timeout, into_unit)
    }

    /// Run operations one after another, returning one result per operation
    ///
    /// A failed step does not stop the batch, except `NotConnected`, which
    /// fails every remaining step the same way.
    pub async fn request(
        &self,
        device: &DeviceId,
        operations: Vec<GattOperation>,
    ) -> Vec<GattOperationResult> {
        let mut results = Vec::with_capacity(operations.len());
        let mut aborted = false;

        for operation in operations {
            if aborted {
                results.push(Err(GattError::NotConnected));
                continue;
            }
            let result = match operation {
                GattOperation::Read(attribute) => self.get(device, &attribute, None).await,
                GattOperation::Write {
                    attribute,
                    payload,
                    require_ack,
                } => self
                    .set(device, &attribute, payload, require_ack, None)
                    .await
                    .map(|_| Vec::new()),
                GattOperation::Notify { attribute, enabled } => self
                    .set_notify_enabled(device, &attribute, enabled, None)
                    .await
                    .map(|_| Vec::new()),
            };
            aborted = matches!(result, Err(GattError::NotConnected));
            results.push(result);
        }

        results
    }

    /// Enable notifications and route every later value to `delegate`
    ///
    /// The delegate is registered before notifications are enabled so the
    /// first notified value is not lost; it is removed again if enabling fails.
    pub async fn subscribe_notifications(
        &self,
        device: &DeviceId,
        attribute: &ServiceCharacteristic,
        key: impl Into<String>,
        delegate: Arc<dyn NotifyDelegate>,
    ) -> Result<(), GattError> {
        let key = key.into();
        let handle = self.registry.get(device).ok_or(GattError::NotConnected)?;
        handle.add_notify_subscriber(key.clone(), attribute.clone(), delegate);

        let result = self.set_notify_enabled(device, attribute, true, None).await;
        if result.is_err() {
            handle.remove_notify_subscriber(&key);
        }
        result
    }

    /// Remove a notification delegate and disable notifications
    pub async fn unsubscribe_notifications(
        &self,
        device: &DeviceId,
        attribute: &ServiceCharacteristic,
        key: &str,
    ) -> Result<(), GattError> {
        if let Some(handle) = self.registry.get(device) {
            handle.remove_notify_subscriber(key);
        }
        self.set_notify_enabled(device, attribute, false, None).await
    }

    fn launch<T>(
        &self,
        device: &DeviceId,
        attribute: &ServiceCharacteristic,
        action: Action,
        timeout: Option<Duration>,
        map: fn(Settled) -> T,
    ) -> PendingOperation<T> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        match GattRequest::start(&self.registry, &self.bus, device, attribute, action, timeout) {
            Ok(started) => PendingOperation::pending(started.receiver, started.status, map),
            Err(error) => PendingOperation::failed(error, map),
        }
    }
}

impl std::fmt::Debug for GattClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattClient")
            .field("devices", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

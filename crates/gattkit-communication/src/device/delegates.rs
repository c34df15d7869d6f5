//! Keyed fan-out registries for peripheral callbacks
//!
//! One physical callback surface is shared by every transaction running
//! against a device. Subscribers register under a stable key; delivery always
//! iterates a snapshot so subscribers may come and go while callbacks fire.

use gattkit_core::{GattValue, ServiceCharacteristic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::communication::PeripheralDelegate;

/// Receiver of value updates for a subscribed characteristic
pub trait NotifyDelegate: Send + Sync {
    /// Called for every notified (or read) value of the characteristic
    fn update(&self, attribute: &ServiceCharacteristic, value: GattValue);
}

impl<F> NotifyDelegate for F
where
    F: Fn(&ServiceCharacteristic, GattValue) + Send + Sync,
{
    fn update(&self, attribute: &ServiceCharacteristic, value: GattValue) {
        self(attribute, value);
    }
}

/// Registry of raw peripheral callback subscribers
#[derive(Default)]
pub struct DelegateRegistry {
    delegates: RwLock<HashMap<String, Arc<dyn PeripheralDelegate>>>,
}

impl DelegateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a delegate under `key`
    ///
    /// An existing registration under the same key is kept; returns false in
    /// that case.
    pub fn subscribe(&self, key: impl Into<String>, delegate: Arc<dyn PeripheralDelegate>) -> bool {
        let key = key.into();
        let mut delegates = self.delegates.write();
        if delegates.contains_key(&key) {
            tracing::warn!("Delegate key {} already registered, keeping existing", key);
            return false;
        }
        delegates.insert(key, delegate);
        true
    }

    /// Remove the delegate registered under `key`
    pub fn unsubscribe(&self, key: &str) -> bool {
        self.delegates.write().remove(key).is_some()
    }

    /// Stable copy of the current subscribers
    pub fn snapshot(&self) -> Vec<Arc<dyn PeripheralDelegate>> {
        self.delegates.read().values().cloned().collect()
    }

    /// Whether a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.delegates.read().contains_key(key)
    }

    /// Number of registered delegates
    pub fn len(&self) -> usize {
        self.delegates.read().len()
    }

    /// Whether no delegate is registered
    pub fn is_empty(&self) -> bool {
        self.delegates.read().is_empty()
    }
}

/// A notify subscriber bound to the characteristic it listens to
#[derive(Clone)]
pub(crate) struct NotifySubscription {
    pub attribute: ServiceCharacteristic,
    pub delegate: Arc<dyn NotifyDelegate>,
}

/// Registry of value-update subscribers keyed by caller-chosen keys
#[derive(Default)]
pub(crate) struct NotifyRegistry {
    subscriptions: RwLock<HashMap<String, NotifySubscription>>,
}

impl NotifyRegistry {
    pub fn insert(&self, key: String, subscription: NotifySubscription) {
        self.subscriptions.write().insert(key, subscription);
    }

    pub fn remove(&self, key: &str) -> Option<NotifySubscription> {
        self.subscriptions.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Subscribers listening to the given characteristic
    pub fn matching(&self, characteristic: uuid::Uuid) -> Vec<NotifySubscription> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| s.attribute.characteristic == characteristic)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattkit_core::DeviceId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        rssi: AtomicUsize,
    }

    impl PeripheralDelegate for Counting {
        fn rssi_updated(&self, _peripheral: &DeviceId, _rssi: Result<i32, &gattkit_core::TransportError>) {
            self.rssi.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscribe_keeps_first_registration() {
        let registry = DelegateRegistry::new();
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());

        assert!(registry.subscribe("GC:a", first.clone()));
        assert!(!registry.subscribe("GC:a", second.clone()));
        assert_eq!(registry.len(), 1);

        for delegate in registry.snapshot() {
            delegate.rssi_updated(&DeviceId::new("a"), Ok(-50));
        }
        assert_eq!(first.rssi.load(Ordering::SeqCst), 1);
        assert_eq!(second.rssi.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_during_delivery() {
        let registry = Arc::new(DelegateRegistry::new());
        registry.subscribe("one", Arc::new(Counting::default()));
        registry.subscribe("two", Arc::new(Counting::default()));

        let snapshot = registry.snapshot();
        assert!(registry.unsubscribe("one"));
        assert!(!registry.unsubscribe("one"));

        // The snapshot taken before removal still delivers to both
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("two"));
    }
}

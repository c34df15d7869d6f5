//! Event Bus implementation.
//!
//! Provides the keyed registry of subscription directives and the serialized
//! report path used to fan lifecycle events out to subscribers.

use parking_lot::{ReentrantMutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{DeviceEvent, EventKind};
use crate::data::DeviceId;

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Type alias for event handler functions
type EventHandler = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// One subscriber's interest in an event kind
#[derive(Clone)]
struct Directive {
    id: SubscriptionId,
    device: Option<DeviceId>,
    handler: EventHandler,
}

impl Directive {
    /// Unscoped directives see every device; scoped ones only an exact match
    fn matches(&self, event: &DeviceEvent) -> bool {
        self.device
            .as_ref()
            .is_none_or(|device| device == event.device())
    }
}

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
    /// Whether to keep event history.
    pub enable_history: bool,
    /// Maximum number of events to retain in history.
    pub max_history_size: usize,
    /// How long to retain events in history.
    pub history_retention: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enable_history: false,
            max_history_size: 1000,
            history_retention: Duration::from_secs(300),
        }
    }
}

/// Event with timestamp for history
#[derive(Debug, Clone)]
struct TimestampedEvent {
    event: DeviceEvent,
    timestamp: Instant,
}

/// Error types for event bus operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventBusError {
    /// No directive or receiver took the event
    #[error("No active subscribers")]
    NoSubscribers,
}

/// Keyed publish/subscribe registry for device lifecycle events
///
/// The bus is an explicitly constructed service; collaborators receive an
/// `Arc<EventBus>` rather than reaching for a global.
pub struct EventBus {
    /// Broadcast sender for async observers
    sender: broadcast::Sender<DeviceEvent>,
    /// Directives keyed by the event kind they listen for
    registry: RwLock<HashMap<EventKind, Vec<Directive>>>,
    /// Serial dispatch context; reentrant so handlers may call back into the bus
    dispatch: ReentrantMutex<()>,
    /// Event history (optional)
    history: RwLock<VecDeque<TimestampedEvent>>,
    /// Configuration
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            registry: RwLock::new(HashMap::new()),
            dispatch: ReentrantMutex::new(()),
            history: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Subscribe to events of the given kinds for every device
    pub fn subscribe_all<F>(&self, kinds: &[EventKind], handler: F) -> SubscriptionId
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        self.subscribe(kinds, None, handler)
    }

    /// Subscribe to events of the given kinds, optionally scoped to one device
    ///
    /// The directive is visible to every `report` issued after this returns.
    /// Registration waits for any in-flight report on another thread to finish.
    pub fn subscribe<F>(
        &self,
        kinds: &[EventKind],
        device: Option<&DeviceId>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        let directive = Directive {
            id: SubscriptionId::new(),
            device: device.cloned(),
            handler: Arc::new(handler),
        };
        let id = directive.id;

        let _serial = self.dispatch.lock();
        let mut registry = self.registry.write();
        for kind in kinds {
            registry.entry(*kind).or_default().push(directive.clone());
        }
        tracing::debug!(
            "Subscription {} added for {:?} (scope: {})",
            id,
            kinds,
            device.map_or("all", DeviceId::short_id)
        );
        id
    }

    /// Remove the directive registered under `id` for the given kinds
    ///
    /// Idempotent: returns false when nothing was removed.
    pub fn unsubscribe(&self, kinds: &[EventKind], id: SubscriptionId) -> bool {
        let _serial = self.dispatch.lock();
        let mut registry = self.registry.write();
        let mut removed = false;
        for kind in kinds {
            if let Some(directives) = registry.get_mut(kind) {
                let before = directives.len();
                directives.retain(|d| d.id != id);
                removed |= directives.len() != before;
                if directives.is_empty() {
                    registry.remove(kind);
                }
            }
        }
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Report a batch of events
    ///
    /// Handlers run on the calling task, serialized against other reports and
    /// registry changes. Each event is dispatched to a snapshot of matching
    /// directives so handlers may unsubscribe themselves. Returns the number of
    /// handler invocations.
    pub fn report<I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = DeviceEvent>,
    {
        let _serial = self.dispatch.lock();
        let mut delivered = 0;

        for event in events {
            if self.config.enable_history {
                self.add_to_history(&event);
            }

            let handlers: Vec<EventHandler> = {
                let registry = self.registry.read();
                registry
                    .get(&event.kind())
                    .map(|directives| {
                        directives
                            .iter()
                            .filter(|d| d.matches(&event))
                            .map(|d| Arc::clone(&d.handler))
                            .collect()
                    })
                    .unwrap_or_default()
            };

            tracing::trace!("Reporting {} to {} handler(s)", event.description(), handlers.len());

            for handler in handlers {
                handler(event.clone());
                delivered += 1;
            }

            // Async observers are optional; no receiver is not an error here
            let _ = self.sender.send(event);
        }

        delivered
    }

    /// Publish a single event
    ///
    /// Returns the number of handlers and receivers that saw the event, or an
    /// error if nobody was listening.
    pub fn publish(&self, event: DeviceEvent) -> Result<usize, EventBusError> {
        let receivers = self.sender.receiver_count();
        let delivered = self.report(std::iter::once(event));
        if delivered == 0 && receivers == 0 {
            Err(EventBusError::NoSubscribers)
        } else {
            Ok(delivered + receivers)
        }
    }

    /// Get a receiver for manual event polling
    ///
    /// This is useful for async contexts where you want to receive events
    /// in a tokio task.
    pub fn receiver(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Number of distinct active subscriptions
    pub fn subscriber_count(&self) -> usize {
        let registry = self.registry.read();
        registry
            .values()
            .flatten()
            .map(|d| d.id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Number of directives registered for one kind
    pub fn directive_count(&self, kind: EventKind) -> usize {
        self.registry.read().get(&kind).map_or(0, Vec::len)
    }

    /// Get recent event history (if enabled)
    ///
    /// Returns events since the given instant, or all history if None.
    pub fn history(&self, since: Option<Instant>) -> Vec<DeviceEvent> {
        if !self.config.enable_history {
            return Vec::new();
        }

        let history = self.history.read();
        match since {
            Some(since) => history
                .iter()
                .filter(|e| e.timestamp >= since)
                .map(|e| e.event.clone())
                .collect(),
            None => history.iter().map(|e| e.event.clone()).collect(),
        }
    }

    /// Clear event history
    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Add an event to history, maintaining size and age limits
    fn add_to_history(&self, event: &DeviceEvent) {
        let mut history = self.history.write();
        let now = Instant::now();

        history.push_back(TimestampedEvent {
            event: event.clone(),
            timestamp: now,
        });

        let retention = self.config.history_retention;
        while history
            .front()
            .is_some_and(|e| now.duration_since(e.timestamp) > retention)
        {
            history.pop_front();
        }

        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

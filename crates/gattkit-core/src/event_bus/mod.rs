//! # Event Bus Module
//!
//! Provides a keyed event bus for decoupled fan-out of device lifecycle events
//! (disconnects, transaction timeouts, connection failures, RSSI detections).
//!
//! ## Overview
//!
//! - Publishers report events without knowing subscribers
//! - Subscribers register a directive per event kind, optionally scoped to a
//!   single device
//! - Reports are serialized and dispatched over a snapshot of the registry
//! - Async observers can additionally poll a broadcast receiver
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gattkit_core::event_bus::{DeviceEvent, EventBus, EventKind};
//!
//! let bus = Arc::new(EventBus::new());
//! let key = bus.subscribe(&[EventKind::Disconnected], Some(&device_id), |event| {
//!     println!("{}", event.description());
//! });
//!
//! bus.report([DeviceEvent::Disconnected { device: device_id.clone(), last_state: None }]);
//!
//! bus.unsubscribe(&[EventKind::Disconnected], key);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;

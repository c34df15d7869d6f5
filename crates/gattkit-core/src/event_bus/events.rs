//! Event type definitions for the event bus.
//!
//! Lifecycle events are keyed by [`EventKind`] for subscription and always carry
//! the identity of the device they concern, so directives scoped to one device
//! can be matched exactly.

use serde::{Deserialize, Serialize};

use crate::data::{ConnectionState, DeviceId, OperationKind, Proximity};

/// Root event enum for device lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The link to a device dropped
    Disconnected {
        /// Device whose link dropped.
        device: DeviceId,
        /// Transport state last observed for the device.
        last_state: Option<ConnectionState>,
    },
    /// An attribute transaction ran out of time
    TimedOut {
        /// Device the transaction targeted.
        device: DeviceId,
        /// Operation that timed out.
        operation: OperationKind,
    },
    /// A connection attempt failed
    ConnectionFailed {
        /// Device that could not be connected.
        device: DeviceId,
        /// Transport-provided reason.
        reason: String,
    },
    /// A fresh RSSI reading was taken
    Detected {
        /// Device the reading belongs to.
        device: DeviceId,
        /// Signal strength in dBm.
        rssi: i32,
        /// Bucketed distance.
        proximity: Proximity,
    },
}

impl DeviceEvent {
    /// Get the subscription key of this event
    pub fn kind(&self) -> EventKind {
        match self {
            DeviceEvent::Disconnected { .. } => EventKind::Disconnected,
            DeviceEvent::TimedOut { .. } => EventKind::TimedOut,
            DeviceEvent::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            DeviceEvent::Detected { .. } => EventKind::Detected,
        }
    }

    /// Device this event concerns
    pub fn device(&self) -> &DeviceId {
        match self {
            DeviceEvent::Disconnected { device, .. }
            | DeviceEvent::TimedOut { device, .. }
            | DeviceEvent::ConnectionFailed { device, .. }
            | DeviceEvent::Detected { device, .. } => device,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            DeviceEvent::Disconnected { device, last_state } => match last_state {
                Some(state) => format!("{} disconnected (was {})", device.short_id(), state),
                None => format!("{} disconnected", device.short_id()),
            },
            DeviceEvent::TimedOut { device, operation } => {
                format!("{} timed out during {}", device.short_id(), operation)
            }
            DeviceEvent::ConnectionFailed { device, reason } => {
                format!("{} failed to connect: {}", device.short_id(), reason)
            }
            DeviceEvent::Detected {
                device,
                rssi,
                proximity,
            } => format!("{} detected at {} dBm ({})", device.short_id(), rssi, proximity),
        }
    }
}

/// Event kind used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Link dropped.
    Disconnected,
    /// Transaction deadline elapsed.
    TimedOut,
    /// Connection attempt failed.
    ConnectionFailed,
    /// RSSI reading taken.
    Detected,
}

impl EventKind {
    /// Every kind, for subscribers that want the full stream
    pub const ALL: [EventKind; 4] = [
        EventKind::Disconnected,
        EventKind::TimedOut,
        EventKind::ConnectionFailed,
        EventKind::Detected,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Disconnected => write!(f, "disconnected"),
            EventKind::TimedOut => write!(f, "timedOut"),
            EventKind::ConnectionFailed => write!(f, "connectionFailed"),
            EventKind::Detected => write!(f, "detected"),
        }
    }
}

//! Device identity and signal-strength proximity

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::DEFAULT_PROXIMITY_RSSI;

/// Stable identity of a remote peripheral
///
/// The identity is owned by the device registry; everything else refers to a
/// device only through this key and re-resolves it on each access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The full identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated identifier for log lines (last segment, at most 8 chars)
    pub fn short_id(&self) -> &str {
        let tail = self.0.rsplit(':').next().unwrap_or(&self.0);
        match tail.char_indices().nth(8) {
            Some((idx, _)) => &tail[..idx],
            None => tail,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Coarse distance bucket derived from RSSI
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Proximity {
    /// No signal has been recorded
    None,
    /// Signal too weak to be considered present
    OutOfRange,
    /// Very far away
    VeryFar,
    /// Far away
    Far,
    /// Mid range
    Medium,
    /// Near
    Near,
    /// Very near
    VeryNear,
    /// Practically touching the central
    Touching,
}

impl Proximity {
    /// Bucket an RSSI reading (dBm)
    pub fn from_rssi(rssi: i32) -> Self {
        match rssi {
            DEFAULT_PROXIMITY_RSSI => Proximity::None,
            r if r >= -40 => Proximity::Touching,
            r if r >= -60 => Proximity::VeryNear,
            r if r >= -70 => Proximity::Near,
            r if r >= -80 => Proximity::Medium,
            r if r >= -90 => Proximity::Far,
            r if r >= -200 => Proximity::VeryFar,
            _ => Proximity::OutOfRange,
        }
    }

    /// Whether this bucket counts as "in range"
    pub fn in_range(self) -> bool {
        !matches!(self, Proximity::None | Proximity::OutOfRange)
    }
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Proximity::None => "none",
            Proximity::OutOfRange => "out of range",
            Proximity::VeryFar => "very far",
            Proximity::Far => "far",
            Proximity::Medium => "medium",
            Proximity::Near => "near",
            Proximity::VeryNear => "very near",
            Proximity::Touching => "touching",
        };
        f.write_str(label)
    }
}

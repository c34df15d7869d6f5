//! Engine-wide defaults

use std::time::Duration;

/// Default deadline for one attribute transaction
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(18);

/// RSSI value meaning "no reading yet"
pub const DEFAULT_PROXIMITY_RSSI: i32 = -999;

/// How often a connected device's RSSI is re-read
pub const CONNECTED_RSSI_READ_INTERVAL: Duration = Duration::from_secs(3);

/// Delay before a reconnection attempt for a device still in the intent set
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long `connect` waits for the transport to report a link
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of per-transaction delegate keys
pub const DELEGATE_KEY_PREFIX: &str = "GC";

//! Connection lifecycle
//!
//! [`ConnectionManager`] owns the intent set: the devices callers want kept
//! connected. Membership is the only thing that triggers reconnection.

mod manager;

pub use manager::{ConnectionManager, ConnectionManagerConfig, ConnectionUpdate};

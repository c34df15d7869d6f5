//! Transport boundary
//!
//! The [`Transport`] capability the engine drives, the callback traits it
//! reacts to, the [`Central`] that routes transport callbacks into the
//! engine, and an in-memory [`SimulatedTransport`].

mod central;
mod simulated;
mod transport;

pub use central::Central;
pub use simulated::{SimulatedPeripheral, SimulatedTransport, TransportCall};
pub use transport::{CharacteristicRef, PeripheralDelegate, Transport, TransportDelegate};

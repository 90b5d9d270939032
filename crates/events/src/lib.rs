//! Pipeline event system: typed events and a broadcast bus.

pub mod bus;
pub mod types;

pub use bus::EventBus;
pub use types::{Event, EventEnvelope};

//! Fan-out layer for live observers.
//!
//! Connections are indexed by id, owning user, and optional job so one event
//! reaches its audience in O(1) lookups. Each connection is rate-limited by a
//! sliding window (overflow is dropped and counted, never queued), rapid
//! updates to the same key are debounced, and silent connections are reaped
//! by a heartbeat sweeper.

pub mod debounce;
pub mod error;
pub mod registry;

pub use debounce::Debouncer;
pub use error::{HubError, Result};
pub use registry::{HubConfig, HubMessage, HubStats, NotificationHub};

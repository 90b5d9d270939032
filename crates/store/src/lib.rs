//! Durable key-value store boundary.
//!
//! The pipeline persists checkpoints and pending feedback requests through
//! this narrow interface so it can recover them after a crash. The store's
//! own design is out of scope; `MemoryStore` is the in-process implementation
//! used by tests and by deployments that accept in-memory-only durability.

pub mod error;
pub mod memory;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Async key-value store with per-key TTLs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the raw value for a key, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value; `ttl = None` means no expiry.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List live keys beginning with a prefix (for recovery scans).
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// JSON helpers layered over the raw byte interface.
pub struct TypedStore;

impl TypedStore {
    pub async fn get_json<T: DeserializeOwned>(
        store: &dyn KeyValueStore,
        key: &str,
    ) -> Result<Option<T>> {
        match store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        store: &dyn KeyValueStore,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        store.set_with_ttl(key, bytes, ttl).await
    }
}

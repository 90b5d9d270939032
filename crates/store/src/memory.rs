//! In-memory TTL key-value store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use genflow_core::{Clock, SystemClock};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::Result;
use crate::KeyValueStore;

const MAX_KEY_BYTES: usize = 1024;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// HashMap-backed store with lazy TTL expiry.
///
/// Expired entries are dropped on read and by `sweep()`; there is no
/// background reaper of its own, callers drive sweeps from their retention
/// loops.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Drop all expired entries, returning how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        let removed = before - entries.len();
        if removed > 0 {
            trace!(removed, remaining = entries.len(), "Swept expired entries");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn live(entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at.map_or(true, |at| at > now)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| Self::live(entry, now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if key.len() > MAX_KEY_BYTES {
            return Err(crate::StoreError::KeyTooLarge(key.len()));
        }
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && Self::live(entry, now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genflow_core::ManualClock;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("job:1", b"payload".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(store.get("job:1").await.unwrap(), Some(b"payload".to_vec()));

        store.delete("job:1").await.unwrap();
        assert_eq!(store.get("job:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());

        store
            .set_with_ttl("k", b"v".to_vec(), Some(Duration::seconds(10)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::seconds(11));
        assert!(store.get("k").await.unwrap().is_none());

        // Still physically present until swept
        assert_eq!(store.len().await, 1);
        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_keys_with_prefix_skips_expired() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryStore::with_clock(clock.clone());

        store
            .set_with_ttl("feedback:a", b"1".to_vec(), Some(Duration::seconds(5)))
            .await
            .unwrap();
        store
            .set_with_ttl("feedback:b", b"2".to_vec(), None)
            .await
            .unwrap();
        store
            .set_with_ttl("checkpoint:c", b"3".to_vec(), None)
            .await
            .unwrap();

        clock.advance(Duration::seconds(6));
        let mut keys = store.keys_with_prefix("feedback:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["feedback:b".to_string()]);
    }

    #[tokio::test]
    async fn test_oversized_key_rejected() {
        let store = MemoryStore::new();
        let key = "k".repeat(2048);
        let result = store.set_with_ttl(&key, vec![], None).await;
        assert!(matches!(result, Err(crate::StoreError::KeyTooLarge(_))));
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store = MemoryStore::new();
        crate::TypedStore::set_json(&store, "n", &42u32, None)
            .await
            .unwrap();
        let value: Option<u32> = crate::TypedStore::get_json(&store, "n").await.unwrap();
        assert_eq!(value, Some(42));
    }
}

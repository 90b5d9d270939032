//! Coalesce rapid repeated updates to one logical key.
//!
//! Each new update cancels any send already scheduled for the key and
//! reschedules the window, so only the last update inside the window is
//! delivered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use events::EventEnvelope;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::registry::NotificationHub;

pub struct Debouncer {
    hub: Arc<NotificationHub>,
    window: Duration,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Debouncer {
    pub fn new(hub: Arc<NotificationHub>, window: Duration) -> Self {
        Self {
            hub,
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule (or reschedule) delivery of the latest update for a key.
    pub async fn submit(&self, key: impl Into<String>, job_id: Uuid, envelope: EventEnvelope) {
        let key = key.into();
        let mut pending = self.pending.lock().await;

        if let Some(previous) = pending.remove(&key) {
            previous.abort();
        }

        let hub = Arc::clone(&self.hub);
        let registry = Arc::clone(&self.pending);
        let window = self.window;
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            hub.publish_to_job(job_id, &envelope).await;
            registry.lock().await.remove(&task_key);
        });
        pending.insert(key, handle);
    }

    /// Number of keys with a send still scheduled.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Cancel all scheduled sends (shutdown/drain path).
    pub async fn shutdown(&self) {
        let mut pending = self.pending.lock().await;
        let cancelled = pending.len();
        for (_, handle) in pending.drain() {
            handle.abort();
        }
        if cancelled > 0 {
            debug!(cancelled, "Debouncer shut down with pending sends cancelled");
        }
    }
}

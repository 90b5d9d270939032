//! Connection registry, per-connection rate limiting, heartbeat sweeper.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use events::{EventBus, EventEnvelope};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HubError, Result};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Max messages per connection within one rate window.
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub heartbeat_interval: Duration,
    /// Silent for this many heartbeat intervals -> force disconnect.
    pub missed_heartbeat_limit: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: 20,
            rate_limit_window: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            missed_heartbeat_limit: 3,
        }
    }
}

/// Message pushed down a connection's channel.
///
/// Serializes adjacently tagged so transport layers can frame events and
/// pings the same way. The envelope keeps its own "type" field inside the
/// payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum HubMessage {
    Event(EventEnvelope),
    Ping,
}

struct ConnectionEntry {
    user_id: Uuid,
    job_id: Option<Uuid>,
    tx: UnboundedSender<HubMessage>,
    /// Send timestamps inside the current rate window.
    window: VecDeque<Instant>,
    dropped: u64,
    last_seen: Instant,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<Uuid, ConnectionEntry>,
    by_user: HashMap<Uuid, HashSet<Uuid>>,
    by_job: HashMap<Uuid, HashSet<Uuid>>,
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub total_dropped: u64,
}

/// Connection registry with O(1) fan-out by connection, user, or job.
pub struct NotificationHub {
    state: RwLock<HubState>,
    config: HubConfig,
}

impl NotificationHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            config,
        }
    }

    /// Accept a connection; the receiver is the observer's message stream.
    pub async fn register(
        &self,
        user_id: Uuid,
        job_id: Option<Uuid>,
    ) -> (Uuid, UnboundedReceiver<HubMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        let mut state = self.state.write().await;

        state.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                job_id,
                tx,
                window: VecDeque::new(),
                dropped: 0,
                last_seen: Instant::now(),
            },
        );
        state.by_user.entry(user_id).or_default().insert(connection_id);
        if let Some(job_id) = job_id {
            state.by_job.entry(job_id).or_default().insert(connection_id);
        }

        debug!(connection_id = %connection_id, user_id = %user_id, "Connection registered");
        (connection_id, rx)
    }

    pub async fn unregister(&self, connection_id: Uuid) {
        let mut state = self.state.write().await;
        Self::remove_connection(&mut state, connection_id);
        debug!(connection_id = %connection_id, "Connection unregistered");
    }

    /// Attach a connection to a job's index (job started).
    pub async fn subscribe_job(&self, connection_id: Uuid, job_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(HubError::ConnectionNotFound(connection_id))?;
        if let Some(previous) = entry.job_id.replace(job_id) {
            if let Some(set) = state.by_job.get_mut(&previous) {
                set.remove(&connection_id);
            }
        }
        state.by_job.entry(job_id).or_default().insert(connection_id);
        Ok(())
    }

    /// Detach a connection from its job index (job finished).
    pub async fn unsubscribe_job(&self, connection_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(HubError::ConnectionNotFound(connection_id))?;
        if let Some(job_id) = entry.job_id.take() {
            if let Some(set) = state.by_job.get_mut(&job_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    state.by_job.remove(&job_id);
                }
            }
        }
        Ok(())
    }

    /// Fan an event out to every connection watching a job.
    ///
    /// Returns how many connections actually received it after rate limiting.
    pub async fn publish_to_job(&self, job_id: Uuid, envelope: &EventEnvelope) -> usize {
        let targets: Vec<Uuid> = {
            let state = self.state.read().await;
            state
                .by_job
                .get(&job_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        self.send_to_many(&targets, envelope).await
    }

    pub async fn publish_to_user(&self, user_id: Uuid, envelope: &EventEnvelope) -> usize {
        let targets: Vec<Uuid> = {
            let state = self.state.read().await;
            state
                .by_user
                .get(&user_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        self.send_to_many(&targets, envelope).await
    }

    pub async fn publish_to_connection(
        &self,
        connection_id: Uuid,
        envelope: &EventEnvelope,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(HubError::ConnectionNotFound(connection_id))?;
        Ok(Self::send_rate_limited(entry, envelope, &self.config))
    }

    /// Record a heartbeat response from a connection.
    pub async fn mark_alive(&self, connection_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(HubError::ConnectionNotFound(connection_id))?;
        entry.last_seen = Instant::now();
        Ok(())
    }

    pub async fn stats(&self) -> HubStats {
        let state = self.state.read().await;
        HubStats {
            connections: state.connections.len(),
            total_dropped: state.connections.values().map(|entry| entry.dropped).sum(),
        }
    }

    pub async fn dropped_for(&self, connection_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|entry| entry.dropped)
            .ok_or(HubError::ConnectionNotFound(connection_id))
    }

    /// Spawn the heartbeat sweeper. Pings every connection each interval and
    /// force-disconnects any silent past the miss limit. Errors are logged,
    /// the loop never exits on its own.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(hub.config.heartbeat_interval);
            ticker.tick().await; // first tick is immediate
            loop {
                ticker.tick().await;
                hub.heartbeat_pass().await;
            }
        })
    }

    async fn heartbeat_pass(&self) {
        let deadline = self.config.heartbeat_interval * self.config.missed_heartbeat_limit;
        let now = Instant::now();
        let mut state = self.state.write().await;

        let stale: Vec<Uuid> = state
            .connections
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > deadline)
            .map(|(id, _)| *id)
            .collect();
        for connection_id in stale {
            warn!(connection_id = %connection_id, "Heartbeat missed, force disconnecting");
            Self::remove_connection(&mut state, connection_id);
        }

        // Pings bypass the rate window; they are liveness, not payload.
        let dead: Vec<Uuid> = state
            .connections
            .iter()
            .filter(|(_, entry)| entry.tx.send(HubMessage::Ping).is_err())
            .map(|(id, _)| *id)
            .collect();
        for connection_id in dead {
            Self::remove_connection(&mut state, connection_id);
        }
    }

    /// Spawn a relay that forwards every bus event carrying a job id to that
    /// job's connections.
    pub fn spawn_relay(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let Some(job_id) = envelope.event.job_id() {
                            hub.publish_to_job(job_id, &envelope).await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Hub relay lagged behind event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event bus closed, hub relay stopping");
                        break;
                    }
                }
            }
        })
    }

    async fn send_to_many(&self, targets: &[Uuid], envelope: &EventEnvelope) -> usize {
        let mut delivered = 0;
        let mut state = self.state.write().await;
        for connection_id in targets {
            if let Some(entry) = state.connections.get_mut(connection_id) {
                if Self::send_rate_limited(entry, envelope, &self.config) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Returns true when delivered; overflow is dropped and counted.
    fn send_rate_limited(
        entry: &mut ConnectionEntry,
        envelope: &EventEnvelope,
        config: &HubConfig,
    ) -> bool {
        let now = Instant::now();
        while let Some(front) = entry.window.front() {
            if now.duration_since(*front) > config.rate_limit_window {
                entry.window.pop_front();
            } else {
                break;
            }
        }
        if entry.window.len() >= config.rate_limit_max {
            entry.dropped += 1;
            return false;
        }
        if entry.tx.send(HubMessage::Event(envelope.clone())).is_err() {
            return false;
        }
        entry.window.push_back(now);
        true
    }

    fn remove_connection(state: &mut HubState, connection_id: Uuid) {
        let Some(entry) = state.connections.remove(&connection_id) else {
            return;
        };
        if let Some(set) = state.by_user.get_mut(&entry.user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                state.by_user.remove(&entry.user_id);
            }
        }
        if let Some(job_id) = entry.job_id {
            if let Some(set) = state.by_job.get_mut(&job_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    state.by_job.remove(&job_id);
                }
            }
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

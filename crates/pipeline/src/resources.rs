//! Resource sampling, circuit breaking, and health classification.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genflow_core::Clock;
use tokio::sync::Mutex;
use tracing::debug;

/// One utilization reading, both values in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu: f64,
    pub memory: f64,
}

/// Source of utilization readings.
///
/// Production deployments wire in a host-level sampler; tests use
/// `FixedMonitor` to script load conditions.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn sample(&self) -> ResourceSample;
}

/// A monitor that reports whatever it was last told.
#[derive(Default)]
pub struct FixedMonitor {
    sample: Mutex<ResourceSample>,
}

impl FixedMonitor {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            sample: Mutex::new(ResourceSample { cpu, memory }),
        }
    }

    pub async fn set(&self, cpu: f64, memory: f64) {
        *self.sample.lock().await = ResourceSample { cpu, memory };
    }
}

#[async_trait]
impl ResourceMonitor for FixedMonitor {
    async fn sample(&self) -> ResourceSample {
        *self.sample.lock().await
    }
}

/// Overall coordinator health, re-evaluated periodically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Active,
    Overloaded,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Overloaded => "overloaded",
            Self::Error => "error",
        }
    }
}

/// Sliding-window failure counter per error signature.
///
/// Once a signature accumulates `threshold` failures inside the window the
/// breaker reports open for it and automatic retries of that error class
/// are suppressed until the window drains.
pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    window: chrono::Duration,
    threshold: usize,
    failures: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>, window: chrono::Duration, threshold: usize) -> Self {
        Self {
            clock,
            window,
            threshold: threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure; returns the live count for the signature.
    pub async fn record(&self, signature: &str) -> usize {
        let now = self.clock.now();
        let mut failures = self.failures.lock().await;
        let entries = failures.entry(signature.to_string()).or_default();
        Self::prune(entries, now, self.window);
        entries.push_back(now);

        if entries.len() >= self.threshold {
            debug!(signature, count = entries.len(), "Circuit breaker open");
        }
        entries.len()
    }

    pub async fn is_open(&self, signature: &str) -> bool {
        let now = self.clock.now();
        let mut failures = self.failures.lock().await;
        match failures.get_mut(signature) {
            Some(entries) => {
                Self::prune(entries, now, self.window);
                entries.len() >= self.threshold
            }
            None => false,
        }
    }

    /// Clear one signature (manual operator reset).
    pub async fn reset(&self, signature: &str) {
        self.failures.lock().await.remove(signature);
    }

    fn prune(entries: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: chrono::Duration) {
        let cutoff = now - window;
        while entries.front().map_or(false, |at| *at < cutoff) {
            entries.pop_front();
        }
    }
}

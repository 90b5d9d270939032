//! Engine and coordinator tuning knobs.

use std::time::Duration;

/// Per-job execution settings for the phase engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock budget for one executor invocation.
    pub phase_timeout: Duration,
    /// How long a human-feedback window stays open.
    pub hitl_timeout: Duration,
    /// Attempts per phase before the failure path is taken.
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(45),
            hitl_timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl EngineConfig {
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_hitl_timeout(mut self, timeout: Duration) -> Self {
        self.hitl_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

/// Coordinator-level settings: admission, workers, background loops.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker tasks draining the queues.
    pub workers: usize,
    /// Starting value for the adaptive session limit.
    pub initial_max_sessions: usize,
    /// Adaptive limit never drops below this.
    pub min_sessions: usize,
    /// Adaptive limit never rises above this.
    pub max_sessions: usize,
    /// CPU utilization above which submissions are rejected.
    pub cpu_threshold: f64,
    /// Memory utilization above which submissions are rejected.
    pub memory_threshold: f64,
    /// How often the resource monitor is sampled.
    pub sample_interval: Duration,
    /// How often overall health is re-evaluated.
    pub health_interval: Duration,
    /// How often terminal jobs and old versions are swept.
    pub sweep_interval: Duration,
    /// Terminal jobs older than this are dropped by the sweep.
    pub retention_ttl: chrono::Duration,
    /// Failures of one error class within this window trip the breaker.
    pub breaker_window: chrono::Duration,
    /// Failure count that opens the breaker.
    pub breaker_threshold: usize,
    /// Recent failed-job fraction above which health reports ERROR.
    pub error_rate_limit: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            initial_max_sessions: 4,
            min_sessions: 1,
            max_sessions: 16,
            cpu_threshold: 0.85,
            memory_threshold: 0.90,
            sample_interval: Duration::from_secs(10),
            health_interval: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(60),
            retention_ttl: chrono::Duration::hours(1),
            breaker_window: chrono::Duration::seconds(60),
            breaker_threshold: 5,
            error_rate_limit: 0.5,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_session_limits(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.initial_max_sessions = initial.clamp(min, max);
        self.min_sessions = min;
        self.max_sessions = max;
        self
    }

    pub fn with_resource_thresholds(mut self, cpu: f64, memory: f64) -> Self {
        self.cpu_threshold = cpu;
        self.memory_threshold = memory;
        self
    }

    pub fn with_retention_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.retention_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_attempts, 3);
        assert_eq!(engine.hitl_timeout, Duration::from_secs(30));

        let coordinator = CoordinatorConfig::default();
        assert!(coordinator.min_sessions <= coordinator.initial_max_sessions);
        assert!(coordinator.initial_max_sessions <= coordinator.max_sessions);
    }

    #[test]
    fn test_builders_clamp() {
        let engine = EngineConfig::default().with_max_attempts(0);
        assert_eq!(engine.max_attempts, 1);

        let coordinator = CoordinatorConfig::default().with_session_limits(100, 1, 8);
        assert_eq!(coordinator.initial_max_sessions, 8);
    }
}

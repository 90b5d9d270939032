//! Rolling engagement metrics for the feedback loop.

use std::collections::HashMap;

use genflow_core::PhaseId;
use serde::{Deserialize, Serialize};

/// Per-phase engagement counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseEngagement {
    pub requested: u64,
    pub responded: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackMetrics {
    pub total_requests: u64,
    pub total_responses: u64,
    pub total_timeouts: u64,
    pub total_cancelled: u64,
    total_latency_ms: u64,
    pub per_phase: HashMap<PhaseId, PhaseEngagement>,
}

impl FeedbackMetrics {
    pub fn record_request(&mut self, phase: PhaseId) {
        self.total_requests += 1;
        self.per_phase.entry(phase).or_default().requested += 1;
    }

    pub fn record_response(&mut self, phase: PhaseId, latency_ms: u64) {
        self.total_responses += 1;
        self.total_latency_ms += latency_ms;
        self.per_phase.entry(phase).or_default().responded += 1;
    }

    pub fn record_timeout(&mut self, phase: PhaseId) {
        self.total_timeouts += 1;
        self.per_phase.entry(phase).or_default().timed_out += 1;
    }

    pub fn record_cancelled(&mut self, phase: PhaseId) {
        self.total_cancelled += 1;
        self.per_phase.entry(phase).or_default().cancelled += 1;
    }

    /// Fraction of requests that received a human response.
    pub fn response_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_responses as f64 / self.total_requests as f64
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.total_responses == 0 {
            return None;
        }
        Some(self.total_latency_ms as f64 / self.total_responses as f64)
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::phase::PhaseId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Pass,
    Retry,
    Fallback,
    ManualReview,
    Override,
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Retry => "retry",
            Self::Fallback => "fallback",
            Self::ManualReview => "manual_review",
            Self::Override => "override",
        }
    }
}

/// Outcome of gating one phase payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub id: Uuid,
    pub phase: PhaseId,
    /// Weighted overall score, always in [0, 1].
    pub overall_score: f64,
    pub dimension_scores: HashMap<String, f64>,
    pub decision: GateDecision,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    /// sha256 of the canonical payload, hex-encoded.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl QualityAssessment {
    pub fn passed(&self) -> bool {
        matches!(self.decision, GateDecision::Pass | GateDecision::Override)
    }
}

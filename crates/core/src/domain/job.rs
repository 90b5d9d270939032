use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::domain::phase::PhaseId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    WaitingFeedback,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::WaitingFeedback => "waiting_feedback",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "waiting_feedback" => Some(Self::WaitingFeedback),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    #[default]
    Normal,
    Priority,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Priority => "priority",
        }
    }
}

/// The submitted generation brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub brief: String,
    #[serde(default)]
    pub attributes: Document,
}

impl JobInput {
    pub fn new(brief: impl Into<String>) -> Self {
        Self {
            brief: brief.into(),
            attributes: Document::new(),
        }
    }
}

/// Per-submission options the request layer forwards untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubmitOptions {
    /// Phases that pause for human feedback after gating.
    #[serde(default)]
    pub hitl_phases: Vec<PhaseId>,
    /// Branch name for checkpoints; defaults to "main".
    #[serde(default)]
    pub branch: Option<String>,
}

/// One entry in the job's human-feedback log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackLogEntry {
    pub phase: PhaseId,
    pub action: String,
    pub received_at: DateTime<Utc>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner: Uuid,
    pub input: JobInput,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Index of the phase currently (or next) being executed.
    pub current_phase: usize,
    pub phase_scores: HashMap<PhaseId, f64>,
    pub retry_counts: HashMap<PhaseId, u32>,
    pub feedback_log: Vec<FeedbackLogEntry>,
    pub options: SubmitOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(owner: Uuid, input: JobInput, priority: JobPriority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            input,
            status: JobStatus::Queued,
            priority,
            current_phase: 0,
            phase_scores: HashMap::new(),
            retry_counts: HashMap::new(),
            feedback_log: Vec::new(),
            options: SubmitOptions::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_options(mut self, options: SubmitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn branch_name(&self) -> &str {
        self.options.branch.as_deref().unwrap_or("main")
    }

    pub fn record_score(&mut self, phase: PhaseId, score: f64) {
        self.phase_scores.insert(phase, score.clamp(0.0, 1.0));
    }

    /// Mean of recorded phase scores; None until at least one phase scored.
    pub fn aggregate_quality(&self) -> Option<f64> {
        if self.phase_scores.is_empty() {
            return None;
        }
        let sum: f64 = self.phase_scores.values().sum();
        Some(sum / self.phase_scores.len() as f64)
    }
}

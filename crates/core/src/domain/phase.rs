use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of ordered generation phases every job runs through.
pub const PHASE_COUNT: usize = 7;

/// The seven ordered generation stages of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    #[default]
    Concept,
    Outline,
    Draft,
    Refine,
    Imagery,
    Layout,
    Export,
}

impl PhaseId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "concept",
            Self::Outline => "outline",
            Self::Draft => "draft",
            Self::Refine => "refine",
            Self::Imagery => "imagery",
            Self::Layout => "layout",
            Self::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concept" => Some(Self::Concept),
            "outline" => Some(Self::Outline),
            "draft" => Some(Self::Draft),
            "refine" => Some(Self::Refine),
            "imagery" => Some(Self::Imagery),
            "layout" => Some(Self::Layout),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    /// Zero-based position in the pipeline order.
    pub fn index(&self) -> usize {
        match self {
            Self::Concept => 0,
            Self::Outline => 1,
            Self::Draft => 2,
            Self::Refine => 3,
            Self::Imagery => 4,
            Self::Layout => 5,
            Self::Export => 6,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::all().get(index).copied()
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn all() -> [Self; PHASE_COUNT] {
        [
            Self::Concept,
            Self::Outline,
            Self::Draft,
            Self::Refine,
            Self::Imagery,
            Self::Layout,
            Self::Export,
        ]
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    WaitingHitl,
    Retrying,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::WaitingHitl => "waiting_hitl",
            Self::Retrying => "retrying",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "waiting_hitl" => Some(Self::WaitingHitl),
            "retrying" => Some(Self::Retrying),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Per-phase execution record, created at phase start and finalized at end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: PhaseId,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub quality_score: Option<f64>,
    pub retry_count: u32,
    pub used_fallback: bool,
}

impl PhaseRecord {
    pub fn new(phase: PhaseId) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            quality_score: None,
            retry_count: 0,
            used_fallback: false,
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = PhaseStatus::Running;
        self.started_at = Some(at);
    }

    pub fn complete(&mut self, at: DateTime<Utc>, score: f64) {
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(at);
        self.quality_score = Some(score.clamp(0.0, 1.0));
    }

    pub fn fail(&mut self, at: DateTime<Utc>) {
        self.status = PhaseStatus::Failed;
        self.completed_at = Some(at);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::domain::phase::PhaseId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    #[default]
    FreeText,
    QuickOption,
    Skip,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRequestStatus {
    #[default]
    Pending,
    Received,
    Timeout,
    Cancelled,
    Processed,
}

impl FeedbackRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Received => "received",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Processed => "processed",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A pending human-in-the-loop question attached to one (job, phase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub id: Uuid,
    pub job_id: Uuid,
    pub phase: PhaseId,
    pub kind: FeedbackKind,
    pub status: FeedbackRequestStatus,
    pub expires_at: DateTime<Utc>,
    /// Quick-option choices offered to the reviewer.
    pub options: Vec<String>,
    /// Rendered preview of the phase output, if the executor produced one.
    pub preview: Option<Document>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRequest {
    pub fn new(
        job_id: Uuid,
        phase: PhaseId,
        kind: FeedbackKind,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            phase,
            kind,
            status: FeedbackRequestStatus::Pending,
            expires_at,
            options: Vec::new(),
            preview: None,
            created_at,
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_preview(mut self, preview: Document) -> Self {
        self.preview = Some(preview);
        self
    }
}

/// Raw reviewer response before parsing into an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub request_id: Uuid,
    pub action: FeedbackAction,
    pub text: Option<String>,
    /// 1-5 reviewer rating, if given.
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Approve,
    Modify,
    Regenerate,
    Skip,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Modify => "modify",
            Self::Regenerate => "regenerate",
            Self::Skip => "skip",
        }
    }
}

use std::time::Duration;

use genflow_core::PhaseId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Phase {phase} execution failed: {reason}")]
    Execution { phase: PhaseId, reason: String },

    #[error("Phase {phase} timed out after {timeout:?}")]
    Timeout { phase: PhaseId, timeout: Duration },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No executor registered for phase: {0}")]
    ExecutorMissing(PhaseId),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} is already queued or processing")]
    ConcurrencyLimit(Uuid),

    #[error("Capacity exhausted, retry in {retry_after:?}")]
    ResourceExhausted { retry_after: Duration },

    #[error(transparent)]
    Versioning(#[from] versioning::VersioningError),

    #[error(transparent)]
    Quality(#[from] quality::QualityError),

    #[error(transparent)]
    Feedback(#[from] feedback::FeedbackError),

    #[error(transparent)]
    Store(#[from] store::StoreError),
}

impl PipelineError {
    /// True for errors the submitter may retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. } | Self::Timeout { .. }
        )
    }

    /// Suggested backoff before resubmitting, when one applies.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ResourceExhausted { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

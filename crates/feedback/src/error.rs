use genflow_core::PhaseId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FeedbackError {
    /// Concurrency-limit violation: a request for this (job, phase) is
    /// already awaiting a response.
    #[error("Feedback already pending for job {job_id} phase {phase}")]
    DuplicatePending { job_id: Uuid, phase: PhaseId },

    #[error("Feedback request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("Feedback request {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("Feedback request {0} expired before the response arrived")]
    Expired(Uuid),

    #[error("Persistence error: {0}")]
    Persistence(#[from] store::StoreError),
}

pub type Result<T> = std::result::Result<T, FeedbackError>;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum VersioningError {
    #[error("Version not found: {0}")]
    VersionNotFound(Uuid),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("No version history for job: {0}")]
    JobNotFound(Uuid),

    #[error("Version {version} does not belong to job {job}")]
    JobMismatch { version: Uuid, job: Uuid },

    #[error("Persistence error: {0}")]
    Persistence(#[from] store::StoreError),
}

pub type Result<T> = std::result::Result<T, VersioningError>;

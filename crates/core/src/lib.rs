pub mod clock;
pub mod document;
pub mod domain;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document::Document;
pub use domain::feedback::{
    FeedbackAction, FeedbackKind, FeedbackRequest, FeedbackRequestStatus, FeedbackResponse,
};
pub use domain::job::{FeedbackLogEntry, Job, JobInput, JobPriority, JobStatus, SubmitOptions};
pub use domain::phase::{PhaseId, PhaseRecord, PhaseStatus, PHASE_COUNT};
pub use domain::quality::{GateDecision, QualityAssessment};
pub use domain::version::{Branch, VersionKind, VersionNode};
pub use error::{CoreError, Result};

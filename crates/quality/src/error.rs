use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QualityError {
    #[error("Assessment not found: {0}")]
    AssessmentNotFound(Uuid),

    #[error("No rule set defined for phase: {0}")]
    NoRuleSet(String),

    /// A single rule evaluator failed; recorded as an issue, never fatal to
    /// the assessment itself.
    #[error("Rule evaluation failed for dimension {dimension}: {reason}")]
    RuleFailed { dimension: String, reason: String },
}

pub type Result<T> = std::result::Result<T, QualityError>;

//! Event types published by the generation pipeline.

use chrono::{DateTime, Utc};
use genflow_core::{FeedbackAction, PhaseId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new envelope with auto-generated ID and timestamp.
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn at(event: Event, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            event,
        }
    }
}

/// All progress events a running job can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted and placed on a queue
    JobQueued {
        job_id: Uuid,
        priority: String,
        queue_depth: usize,
    },

    /// A phase began executing
    PhaseStarted {
        job_id: Uuid,
        phase: PhaseId,
        attempt: u32,
    },

    /// A phase passed its quality gate and was checkpointed
    PhaseCompleted {
        job_id: Uuid,
        phase: PhaseId,
        quality_score: f64,
        version_id: Option<Uuid>,
        used_fallback: bool,
    },

    /// A phase is being retried after a failure or gate RETRY decision
    PhaseRetry {
        job_id: Uuid,
        phase: PhaseId,
        retry_count: u32,
        reason: String,
    },

    /// A phase paused for optional human feedback
    HitlOpportunity {
        job_id: Uuid,
        phase: PhaseId,
        request_id: Uuid,
        expires_at: DateTime<Utc>,
    },

    /// Human feedback was applied to a phase payload
    HitlApplied {
        job_id: Uuid,
        phase: PhaseId,
        action: FeedbackAction,
    },

    /// Reviewer responded to a pending feedback request
    FeedbackReceived {
        job_id: Uuid,
        phase: PhaseId,
        request_id: Uuid,
        action: FeedbackAction,
    },

    /// All phases finished; aggregate quality attached
    PipelineCompleted {
        job_id: Uuid,
        aggregate_quality: f64,
        phases_completed: usize,
    },

    /// The job failed terminally
    SessionFailed {
        job_id: Uuid,
        phase: Option<PhaseId>,
        reason: String,
    },

    /// The job was cancelled cooperatively
    SessionCancelled { job_id: Uuid },

    /// A phase executor produced a renderable preview
    PreviewReady {
        job_id: Uuid,
        phase: PhaseId,
        preview: serde_json::Value,
    },

    /// Generic error surfaced to observers
    Error {
        message: String,
        job_id: Option<Uuid>,
    },
}

impl Event {
    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Event::JobQueued { job_id, .. } => Some(*job_id),
            Event::PhaseStarted { job_id, .. } => Some(*job_id),
            Event::PhaseCompleted { job_id, .. } => Some(*job_id),
            Event::PhaseRetry { job_id, .. } => Some(*job_id),
            Event::HitlOpportunity { job_id, .. } => Some(*job_id),
            Event::HitlApplied { job_id, .. } => Some(*job_id),
            Event::FeedbackReceived { job_id, .. } => Some(*job_id),
            Event::PipelineCompleted { job_id, .. } => Some(*job_id),
            Event::SessionFailed { job_id, .. } => Some(*job_id),
            Event::SessionCancelled { job_id } => Some(*job_id),
            Event::PreviewReady { job_id, .. } => Some(*job_id),
            Event::Error { job_id, .. } => *job_id,
        }
    }

    /// Wire-level type tag for this event.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::JobQueued { .. } => "job_queued",
            Event::PhaseStarted { .. } => "phase_started",
            Event::PhaseCompleted { .. } => "phase_completed",
            Event::PhaseRetry { .. } => "phase_retry",
            Event::HitlOpportunity { .. } => "hitl_opportunity",
            Event::HitlApplied { .. } => "hitl_applied",
            Event::FeedbackReceived { .. } => "feedback_received",
            Event::PipelineCompleted { .. } => "pipeline_completed",
            Event::SessionFailed { .. } => "session_failed",
            Event::SessionCancelled { .. } => "session_cancelled",
            Event::PreviewReady { .. } => "preview_ready",
            Event::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new(Event::SessionCancelled {
            job_id: Uuid::new_v4(),
        });
        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_wire_shape_has_type_and_timestamp() {
        let envelope = EventEnvelope::new(Event::PhaseStarted {
            job_id: Uuid::new_v4(),
            phase: PhaseId::Concept,
            attempt: 1,
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "phase_started");
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["phase"], "concept");
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"phase_retry","job_id":"550e8400-e29b-41d4-a716-446655440000","phase":"draft","retry_count":2,"reason":"timeout"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        match event {
            Event::PhaseRetry { retry_count, phase, .. } => {
                assert_eq!(retry_count, 2);
                assert_eq!(phase, PhaseId::Draft);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_job_id() {
        let job_id = Uuid::new_v4();
        let event = Event::PipelineCompleted {
            job_id,
            aggregate_quality: 0.9,
            phases_completed: 7,
        };
        assert_eq!(event.job_id(), Some(job_id));

        let error = Event::Error {
            message: "boom".to_string(),
            job_id: None,
        };
        assert_eq!(error.job_id(), None);
    }

    #[test]
    fn test_type_name_matches_serde_tag() {
        let event = Event::HitlOpportunity {
            job_id: Uuid::new_v4(),
            phase: PhaseId::Outline,
            request_id: Uuid::new_v4(),
            expires_at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.type_name());
    }
}

//! The executor seam: phase implementations plug in behind a trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use feedback::ParsedFeedback;
use genflow_core::{Document, JobInput, PhaseId};
use serde_json::json;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Everything an executor gets to see about the phase it is running.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub job_id: Uuid,
    pub phase: PhaseId,
    /// 1-based attempt number, so executors can vary retries.
    pub attempt: u32,
    pub input: JobInput,
    /// Accepted payload of the previous phase, None for the first.
    pub prior: Option<Document>,
}

/// What an executor hands back for gating.
#[derive(Debug, Clone)]
pub struct PhaseOutput {
    pub payload: Document,
    /// Per-dimension quality scores the gate weighs.
    pub dimension_scores: HashMap<String, f64>,
    /// Optional renderable preview surfaced to observers.
    pub preview: Option<Document>,
}

impl PhaseOutput {
    pub fn new(payload: Document) -> Self {
        Self {
            payload,
            dimension_scores: HashMap::new(),
            preview: None,
        }
    }

    pub fn with_score(mut self, dimension: impl Into<String>, score: f64) -> Self {
        self.dimension_scores.insert(dimension.into(), score);
        self
    }

    pub fn with_preview(mut self, preview: Document) -> Self {
        self.preview = Some(preview);
        self
    }
}

/// A generative phase implementation.
///
/// `execute` failures and timeouts count against the phase retry budget.
/// `apply_feedback` revises an accepted payload after a reviewer asked for
/// modifications; the default keeps the payload unchanged.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput>;

    async fn apply_feedback(
        &self,
        _ctx: &PhaseContext,
        payload: &Document,
        _feedback: &ParsedFeedback,
    ) -> Result<PhaseOutput> {
        Ok(PhaseOutput::new(payload.clone()))
    }
}

/// Static phase -> executor map, assembled once at startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<PhaseId, Arc<dyn PhaseExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, phase: PhaseId, executor: Arc<dyn PhaseExecutor>) -> Self {
        self.executors.insert(phase, executor);
        self
    }

    /// Register one executor for every phase (common for stubs).
    pub fn register_all(mut self, executor: Arc<dyn PhaseExecutor>) -> Self {
        for phase in PhaseId::all() {
            self.executors.insert(phase, executor.clone());
        }
        self
    }

    pub fn get(&self, phase: PhaseId) -> Result<Arc<dyn PhaseExecutor>> {
        self.executors
            .get(&phase)
            .cloned()
            .ok_or(PipelineError::ExecutorMissing(phase))
    }

    pub fn is_complete(&self) -> bool {
        PhaseId::all()
            .iter()
            .all(|phase| self.executors.contains_key(phase))
    }
}

/// Deterministic stand-in payload used when a phase falls back.
///
/// Carries the prior phase's payload forward untouched and marks the phase
/// as degraded so downstream consumers can surface it.
pub fn fallback_payload(phase: PhaseId, prior: Option<&Document>) -> Document {
    let mut payload = prior.cloned().unwrap_or_default();
    payload.insert("degraded", json!(true));
    payload.insert("degraded_phase", json!(phase.as_str()));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl PhaseExecutor for Noop {
        async fn execute(&self, _ctx: &PhaseContext) -> Result<PhaseOutput> {
            Ok(PhaseOutput::new(Document::new()))
        }
    }

    #[test]
    fn test_registry_missing_phase() {
        let registry = ExecutorRegistry::new().register(PhaseId::Concept, Arc::new(Noop));
        assert!(registry.get(PhaseId::Concept).is_ok());
        assert!(matches!(
            registry.get(PhaseId::Export),
            Err(PipelineError::ExecutorMissing(PhaseId::Export))
        ));
        assert!(!registry.is_complete());
    }

    #[test]
    fn test_register_all_completes_registry() {
        let registry = ExecutorRegistry::new().register_all(Arc::new(Noop));
        assert!(registry.is_complete());
    }

    #[test]
    fn test_fallback_payload_carries_prior() {
        let mut prior = Document::new();
        prior.insert("outline", json!(["a", "b"]));

        let payload = fallback_payload(PhaseId::Draft, Some(&prior));
        assert_eq!(payload.get("outline"), Some(&json!(["a", "b"])));
        assert_eq!(payload.get("degraded"), Some(&json!(true)));
        assert_eq!(payload.get("degraded_phase"), Some(&json!("draft")));
    }

    #[tokio::test]
    async fn test_default_apply_feedback_keeps_payload() {
        let executor = Noop;
        let ctx = PhaseContext {
            job_id: Uuid::new_v4(),
            phase: PhaseId::Draft,
            attempt: 1,
            input: JobInput::new("brief"),
            prior: None,
        };
        let mut payload = Document::new();
        payload.insert("body", json!("text"));
        let feedback = ParsedFeedback {
            action: genflow_core::FeedbackAction::Modify,
            text: Some("tighter".to_string()),
            rating: None,
            latency_ms: 5,
        };

        let revised = executor
            .apply_feedback(&ctx, &payload, &feedback)
            .await
            .unwrap();
        assert_eq!(revised.payload, payload);
    }
}

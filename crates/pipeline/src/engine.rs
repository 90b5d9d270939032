//! Per-job execution: the seven-phase loop with gating, retries, HITL,
//! fallback payloads, and checkpointing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};
use feedback::{FeedbackCoordinator, FeedbackOutcome, RequestParams};
use genflow_core::{
    Clock, Document, FeedbackAction, FeedbackKind, FeedbackLogEntry, GateDecision, Job, JobStatus,
    PhaseId, PhaseRecord, PhaseStatus, SystemClock,
};
use quality::{AggregateQuality, QualityGate};
use tracing::{debug, info, warn};
use uuid::Uuid;
use versioning::{CheckpointMeta, VersionStore};

use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::executor::{fallback_payload, ExecutorRegistry, PhaseContext, PhaseExecutor};
use crate::resources::CircuitBreaker;
use crate::state_machine::{JobStateMachine, PhaseStateMachine};

/// Cooperative cancellation flag, checked at phase boundaries.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How one pipeline run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(PipelineResult),
    Failed { phase: PhaseId, reason: String },
    Cancelled,
}

/// Result assembly for a completed run.
#[derive(Debug)]
pub struct PipelineResult {
    pub job_id: Uuid,
    /// Mean of per-phase quality scores.
    pub aggregate_quality: f64,
    /// Score dispersion measure from the gate.
    pub consistency: f64,
    pub phases_completed: usize,
    /// Branch head after the final checkpoint.
    pub head_version: Option<Uuid>,
    /// Phases that shipped a fallback payload.
    pub fallback_phases: Vec<PhaseId>,
    pub phase_records: Vec<PhaseRecord>,
}

struct AcceptedPhase {
    payload: Document,
    score: f64,
    needs_review: bool,
    used_fallback: bool,
    preview: Option<Document>,
}

enum PhaseLoopOutcome {
    Accepted(AcceptedPhase),
    Failed { reason: String },
}

enum RetryVerdict {
    Retry,
    GiveUp(String),
}

/// Runs one job through all seven phases.
pub struct PhaseEngine {
    config: EngineConfig,
    bus: EventBus,
    registry: Arc<ExecutorRegistry>,
    gate: Arc<QualityGate>,
    versions: Arc<VersionStore>,
    feedback: Arc<FeedbackCoordinator>,
    breaker: Option<Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
}

impl PhaseEngine {
    pub fn new(
        bus: EventBus,
        registry: Arc<ExecutorRegistry>,
        gate: Arc<QualityGate>,
        versions: Arc<VersionStore>,
        feedback: Arc<FeedbackCoordinator>,
    ) -> Self {
        Self {
            config: EngineConfig::default(),
            bus,
            registry,
            gate,
            versions,
            feedback,
            breaker: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Failures recorded here suppress automatic retries once an error
    /// class trips the breaker.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Execute every phase of the job in order.
    ///
    /// The job is mutated in place: status, scores, retry counts, and the
    /// feedback log all end up reflecting the run.
    pub async fn run(&self, job: &mut Job, cancel: CancelToken) -> Result<PipelineOutcome> {
        self.transition_job(job, JobStatus::Processing)?;
        let branch = job.branch_name().to_string();
        info!(job_id = %job.id, branch = %branch, "Pipeline started");

        let mut prior: Option<Document> = None;
        let mut head_version = None;
        let mut fallback_phases = Vec::new();
        let mut phase_records = Vec::new();

        for phase in PhaseId::all() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(job).await;
            }
            job.current_phase = phase.index();

            let mut record = PhaseRecord::new(phase);
            PhaseStateMachine::validate_transition(&record.status, &PhaseStatus::Running)?;
            record.start(self.clock.now());

            let executor = self.registry.get(phase)?;
            let accepted = match self
                .run_phase(job, phase, executor.as_ref(), prior.as_ref(), &mut record)
                .await?
            {
                PhaseLoopOutcome::Accepted(accepted) => accepted,
                PhaseLoopOutcome::Failed { reason } => {
                    record.fail(self.clock.now());
                    job.retry_counts.insert(phase, record.retry_count);
                    return self.finish_failed(job, phase, reason).await;
                }
            };

            // Results of an in-flight phase are discarded at the boundary.
            if cancel.is_cancelled() {
                return self.finish_cancelled(job).await;
            }

            let mut payload = accepted.payload;
            if job.options.hitl_phases.contains(&phase) || accepted.needs_review {
                PhaseStateMachine::validate_transition(&record.status, &PhaseStatus::WaitingHitl)?;
                record.status = PhaseStatus::WaitingHitl;

                let ctx = PhaseContext {
                    job_id: job.id,
                    phase,
                    attempt: record.retry_count + 1,
                    input: job.input.clone(),
                    prior: prior.clone(),
                };
                payload = self
                    .hitl_window(job, phase, executor.as_ref(), &ctx, payload, accepted.preview.clone())
                    .await?;
            }
            if cancel.is_cancelled() {
                return self.finish_cancelled(job).await;
            }

            job.record_score(phase, accepted.score);
            job.retry_counts.insert(phase, record.retry_count);
            if accepted.used_fallback {
                fallback_phases.push(phase);
            }

            let node = self
                .versions
                .checkpoint(
                    job.id,
                    &branch,
                    phase,
                    payload.clone(),
                    CheckpointMeta::checkpoint().with_score(accepted.score),
                )
                .await?;
            head_version = Some(node.id);

            PhaseStateMachine::validate_transition(&record.status, &PhaseStatus::Completed)?;
            record.complete(self.clock.now(), accepted.score);
            record.used_fallback = accepted.used_fallback;

            self.publish(Event::PhaseCompleted {
                job_id: job.id,
                phase,
                quality_score: accepted.score,
                version_id: Some(node.id),
                used_fallback: accepted.used_fallback,
            });
            if let Some(preview) = accepted.preview {
                self.publish(Event::PreviewReady {
                    job_id: job.id,
                    phase,
                    preview: preview.as_value(),
                });
            }

            prior = Some(payload);
            phase_records.push(record);
        }

        let aggregate = QualityGate::aggregate(&job.phase_scores).unwrap_or(AggregateQuality {
            mean: 0.0,
            consistency: 1.0,
        });
        self.transition_job(job, JobStatus::Completed)?;
        self.publish(Event::PipelineCompleted {
            job_id: job.id,
            aggregate_quality: aggregate.mean,
            phases_completed: phase_records.len(),
        });
        info!(
            job_id = %job.id,
            aggregate_quality = aggregate.mean,
            consistency = aggregate.consistency,
            "Pipeline completed"
        );

        Ok(PipelineOutcome::Completed(PipelineResult {
            job_id: job.id,
            aggregate_quality: aggregate.mean,
            consistency: aggregate.consistency,
            phases_completed: phase_records.len(),
            head_version,
            fallback_phases,
            phase_records,
        }))
    }

    /// Execute-and-gate loop for one phase.
    async fn run_phase(
        &self,
        job: &Job,
        phase: PhaseId,
        executor: &dyn PhaseExecutor,
        prior: Option<&Document>,
        record: &mut PhaseRecord,
    ) -> Result<PhaseLoopOutcome> {
        loop {
            let attempt = record.retry_count + 1;
            self.publish(Event::PhaseStarted {
                job_id: job.id,
                phase,
                attempt,
            });

            let ctx = PhaseContext {
                job_id: job.id,
                phase,
                attempt,
                input: job.input.clone(),
                prior: prior.cloned(),
            };

            let output =
                match tokio::time::timeout(self.config.phase_timeout, executor.execute(&ctx)).await
                {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => {
                        match self
                            .note_failure(job, phase, record, e.to_string(), "execution")
                            .await?
                        {
                            RetryVerdict::Retry => continue,
                            RetryVerdict::GiveUp(reason) => {
                                return Ok(PhaseLoopOutcome::Failed { reason })
                            }
                        }
                    }
                    Err(_) => {
                        let reason = PipelineError::Timeout {
                            phase,
                            timeout: self.config.phase_timeout,
                        }
                        .to_string();
                        match self.note_failure(job, phase, record, reason, "timeout").await? {
                            RetryVerdict::Retry => continue,
                            RetryVerdict::GiveUp(reason) => {
                                return Ok(PhaseLoopOutcome::Failed { reason })
                            }
                        }
                    }
                };

            let assessment = self
                .gate
                .evaluate(phase, &output.payload, &output.dimension_scores)
                .await;

            match assessment.decision {
                GateDecision::Pass | GateDecision::Override => {
                    return Ok(PhaseLoopOutcome::Accepted(AcceptedPhase {
                        payload: output.payload,
                        score: assessment.overall_score,
                        needs_review: false,
                        used_fallback: false,
                        preview: output.preview,
                    }));
                }
                GateDecision::ManualReview => {
                    info!(
                        job_id = %job.id,
                        phase = %phase,
                        score = assessment.overall_score,
                        "Gate requests manual review"
                    );
                    return Ok(PhaseLoopOutcome::Accepted(AcceptedPhase {
                        payload: output.payload,
                        score: assessment.overall_score,
                        needs_review: true,
                        used_fallback: false,
                        preview: output.preview,
                    }));
                }
                GateDecision::Fallback => {
                    warn!(
                        job_id = %job.id,
                        phase = %phase,
                        score = assessment.overall_score,
                        "Gate decision FALLBACK, shipping fallback payload"
                    );
                    return Ok(PhaseLoopOutcome::Accepted(AcceptedPhase {
                        payload: fallback_payload(phase, prior),
                        score: assessment.overall_score,
                        needs_review: false,
                        used_fallback: true,
                        preview: None,
                    }));
                }
                GateDecision::Retry => {
                    record.retry_count += 1;
                    if record.retry_count >= self.config.max_attempts {
                        warn!(
                            job_id = %job.id,
                            phase = %phase,
                            retries = record.retry_count,
                            "Retry budget exhausted at the gate, shipping fallback payload"
                        );
                        return Ok(PhaseLoopOutcome::Accepted(AcceptedPhase {
                            payload: fallback_payload(phase, prior),
                            score: assessment.overall_score,
                            needs_review: false,
                            used_fallback: true,
                            preview: None,
                        }));
                    }
                    let reason = assessment
                        .issues
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "quality below threshold".to_string());
                    self.loop_back(job, phase, record, reason)?;
                }
            }
        }
    }

    /// Count an execution failure against the retry budget.
    async fn note_failure(
        &self,
        job: &Job,
        phase: PhaseId,
        record: &mut PhaseRecord,
        reason: String,
        class: &str,
    ) -> Result<RetryVerdict> {
        record.retry_count += 1;
        let signature = format!("{phase}:{class}");
        if let Some(ref breaker) = self.breaker {
            breaker.record(&signature).await;
        }

        if record.retry_count >= self.config.max_attempts {
            return Ok(RetryVerdict::GiveUp(reason));
        }
        if let Some(ref breaker) = self.breaker {
            if breaker.is_open(&signature).await {
                warn!(
                    job_id = %job.id,
                    signature = %signature,
                    "Circuit open, suppressing automatic retry"
                );
                return Ok(RetryVerdict::GiveUp(reason));
            }
        }

        self.loop_back(job, phase, record, reason)?;
        Ok(RetryVerdict::Retry)
    }

    fn loop_back(
        &self,
        job: &Job,
        phase: PhaseId,
        record: &mut PhaseRecord,
        reason: String,
    ) -> Result<()> {
        PhaseStateMachine::validate_transition(&record.status, &PhaseStatus::Retrying)?;
        record.status = PhaseStatus::Retrying;
        self.publish(Event::PhaseRetry {
            job_id: job.id,
            phase,
            retry_count: record.retry_count,
            reason,
        });
        PhaseStateMachine::validate_transition(&record.status, &PhaseStatus::Running)?;
        record.status = PhaseStatus::Running;
        Ok(())
    }

    /// Open a bounded feedback window and apply the reviewer's response.
    async fn hitl_window(
        &self,
        job: &mut Job,
        phase: PhaseId,
        executor: &dyn PhaseExecutor,
        ctx: &PhaseContext,
        payload: Document,
        preview: Option<Document>,
    ) -> Result<Document> {
        self.transition_job(job, JobStatus::WaitingFeedback)?;

        let params = RequestParams {
            kind: FeedbackKind::FreeText,
            options: vec![
                "approve".to_string(),
                "modify".to_string(),
                "regenerate".to_string(),
                "skip".to_string(),
            ],
            preview,
        };

        let mut result = payload;
        match self
            .feedback
            .request(job.id, phase, self.config.hitl_timeout, params)
            .await
        {
            Ok(FeedbackOutcome::Response(parsed)) => {
                job.feedback_log.push(FeedbackLogEntry {
                    phase,
                    action: parsed.action.as_str().to_string(),
                    received_at: self.clock.now(),
                    latency_ms: parsed.latency_ms,
                });
                if parsed.action == FeedbackAction::Modify {
                    match executor.apply_feedback(ctx, &result, &parsed).await {
                        Ok(revised) => {
                            result = revised.payload;
                            self.publish(Event::HitlApplied {
                                job_id: job.id,
                                phase,
                                action: parsed.action,
                            });
                            info!(job_id = %job.id, phase = %phase, "Reviewer feedback applied");
                        }
                        Err(e) => {
                            warn!(
                                job_id = %job.id,
                                phase = %phase,
                                error = %e,
                                "Feedback application failed, keeping original payload"
                            );
                        }
                    }
                } else {
                    debug!(
                        job_id = %job.id,
                        phase = %phase,
                        action = parsed.action.as_str(),
                        "Reviewer responded, proceeding with original payload"
                    );
                }
            }
            Ok(FeedbackOutcome::TimedOut) => {
                debug!(job_id = %job.id, phase = %phase, "Feedback window timed out, proceeding unmodified");
            }
            Ok(FeedbackOutcome::Cancelled) => {
                debug!(job_id = %job.id, phase = %phase, "Feedback window cancelled");
            }
            Err(e) => {
                warn!(job_id = %job.id, phase = %phase, error = %e, "Feedback request failed, proceeding unmodified");
            }
        }

        self.transition_job(job, JobStatus::Processing)?;
        Ok(result)
    }

    async fn finish_failed(
        &self,
        job: &mut Job,
        phase: PhaseId,
        reason: String,
    ) -> Result<PipelineOutcome> {
        self.transition_job(job, JobStatus::Failed)?;
        self.publish(Event::SessionFailed {
            job_id: job.id,
            phase: Some(phase),
            reason: reason.clone(),
        });
        warn!(job_id = %job.id, phase = %phase, reason = %reason, "Pipeline failed");
        Ok(PipelineOutcome::Failed { phase, reason })
    }

    async fn finish_cancelled(&self, job: &mut Job) -> Result<PipelineOutcome> {
        self.transition_job(job, JobStatus::Cancelled)?;
        self.feedback.cancel_all_for_job(job.id).await;
        self.publish(Event::SessionCancelled { job_id: job.id });
        info!(job_id = %job.id, "Pipeline cancelled");
        Ok(PipelineOutcome::Cancelled)
    }

    fn transition_job(&self, job: &mut Job, to: JobStatus) -> Result<()> {
        JobStateMachine::validate_transition(&job.status, &to)?;
        job.status = to;
        job.updated_at = self.clock.now();
        Ok(())
    }

    fn publish(&self, event: Event) {
        self.bus.publish(EventEnvelope::at(event, self.clock.now()));
    }
}

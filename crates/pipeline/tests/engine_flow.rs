//! End-to-end engine runs: gating, retries, HITL, cancellation, previews.

mod common;

use std::sync::Arc;

use common::{build_engine, GatedExecutor, ScriptedExecutor, Step};
use events::Event;
use genflow_core::{
    FeedbackAction, FeedbackResponse, Job, JobInput, JobPriority, JobStatus, PhaseId,
};
use pipeline::{CancelToken, PipelineOutcome};
use serde_json::json;
use uuid::Uuid;

fn job(brief: &str) -> Job {
    Job::new(Uuid::new_v4(), JobInput::new(brief), JobPriority::Normal)
}

#[tokio::test]
async fn test_worked_scenario_retry_then_checkpoint_chain() {
    // Concept passes first try at 0.82; Outline scores 0.55, failing the
    // critical structure rule, retries, then passes at 0.78. Everything
    // after scores 0.9.
    let executor = Arc::new(
        ScriptedExecutor::new(0.9)
            .script(PhaseId::Concept, vec![Step::Score(0.82)])
            .script(PhaseId::Outline, vec![Step::Score(0.55), Step::Score(0.78)]),
    );
    let parts = build_engine(executor);
    let mut rx = parts.bus.subscribe();
    let mut job = job("product launch deck");
    let job_id = job.id;

    let outcome = parts
        .engine
        .run(&mut job, CancelToken::new())
        .await
        .unwrap();
    let result = match outcome {
        PipelineOutcome::Completed(result) => result,
        other => panic!("expected completion, got {other:?}"),
    };

    assert_eq!(result.phases_completed, 7);
    assert!(result.fallback_phases.is_empty());
    assert!((job.phase_scores[&PhaseId::Concept] - 0.82).abs() < 1e-9);
    assert!((job.phase_scores[&PhaseId::Outline] - 0.78).abs() < 1e-9);
    assert_eq!(job.retry_counts[&PhaseId::Outline], 1);
    assert_eq!(job.retry_counts[&PhaseId::Concept], 0);

    // Head-to-root walk: seven checkpoints chained on "main".
    let history = parts.versions.history(job_id, "main").await.unwrap();
    assert_eq!(history.len(), 7);
    let root = history.last().unwrap();
    assert_eq!(root.phase, PhaseId::Concept);
    assert!(root.is_root());
    assert_eq!(root.quality_score, Some(0.82));

    let outline = &history[history.len() - 2];
    assert_eq!(outline.phase, PhaseId::Outline);
    assert_eq!(outline.parent_id, Some(root.id));
    assert_eq!(outline.quality_score, Some(0.78));

    // Exactly one retry, on the outline phase.
    let mut retries = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        if let Event::PhaseRetry {
            phase, retry_count, ..
        } = envelope.event
        {
            retries.push((phase, retry_count));
        }
    }
    assert_eq!(retries, vec![(PhaseId::Outline, 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_hitl_timeout_proceeds_unmodified() {
    let parts = build_engine(Arc::new(ScriptedExecutor::new(0.9)));
    let mut rx = parts.bus.subscribe();

    let mut job = job("quarterly newsletter");
    job.options.hitl_phases = vec![PhaseId::Outline];
    let job_id = job.id;

    let outcome = parts
        .engine
        .run(&mut job, CancelToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Completed(_)));
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.feedback_log.is_empty());

    // The window was opened, then timed out without touching the payload.
    let mut saw_opportunity = false;
    while let Ok(envelope) = rx.try_recv() {
        match envelope.event {
            Event::HitlOpportunity { phase, .. } => {
                assert_eq!(phase, PhaseId::Outline);
                saw_opportunity = true;
            }
            Event::HitlApplied { .. } => panic!("no feedback was given"),
            _ => {}
        }
    }
    assert!(saw_opportunity);

    let history = parts.versions.history(job_id, "main").await.unwrap();
    let outline = history
        .iter()
        .find(|node| node.phase == PhaseId::Outline)
        .unwrap();
    assert!(outline.payload.get("revised").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hitl_modify_revises_checkpointed_payload() {
    let parts = build_engine(Arc::new(ScriptedExecutor::new(0.9)));
    let mut rx = parts.bus.subscribe();
    let feedback = parts.feedback.clone();
    let versions = parts.versions.clone();
    let engine = parts.engine.clone();

    let mut job = job("landing page copy");
    job.options.hitl_phases = vec![PhaseId::Draft];
    let job_id = job.id;

    let handle = tokio::spawn(async move {
        let outcome = engine.run(&mut job, CancelToken::new()).await.unwrap();
        (outcome, job)
    });

    let request_id = loop {
        let envelope = rx.recv().await.unwrap();
        if let Event::HitlOpportunity {
            phase, request_id, ..
        } = envelope.event
        {
            assert_eq!(phase, PhaseId::Draft);
            break request_id;
        }
    };
    feedback
        .respond(FeedbackResponse {
            request_id,
            action: FeedbackAction::Modify,
            text: Some("tighten the intro".to_string()),
            rating: Some(4),
        })
        .await
        .unwrap();

    let (outcome, job) = handle.await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Completed(_)));
    assert_eq!(job.feedback_log.len(), 1);
    assert_eq!(job.feedback_log[0].phase, PhaseId::Draft);
    assert_eq!(job.feedback_log[0].action, "modify");

    let history = versions.history(job_id, "main").await.unwrap();
    let draft = history
        .iter()
        .find(|node| node.phase == PhaseId::Draft)
        .unwrap();
    assert_eq!(draft.payload.get("revised"), Some(&json!(true)));
    assert_eq!(
        draft.payload.get("revision_note"),
        Some(&json!("tighten the intro"))
    );

    let mut saw_applied = false;
    while let Ok(envelope) = rx.try_recv() {
        if let Event::HitlApplied { phase, action, .. } = envelope.event {
            assert_eq!(phase, PhaseId::Draft);
            assert_eq!(action, FeedbackAction::Modify);
            saw_applied = true;
        }
    }
    assert!(saw_applied);
}

#[tokio::test]
async fn test_cancellation_discards_in_flight_phase() {
    let executor = Arc::new(GatedExecutor::new(PhaseId::Outline, 0.9));
    let parts = build_engine(executor.clone());
    let mut rx = parts.bus.subscribe();
    let engine = parts.engine.clone();

    let mut job = job("brand guidelines");
    let job_id = job.id;
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let outcome = engine.run(&mut job, cancel).await.unwrap();
        (outcome, job)
    });

    // Outline is mid-flight when the cancel lands; its result is discarded
    // at the phase boundary.
    executor.started.notified().await;
    token.cancel();
    executor.release.notify_one();

    let (outcome, job) = handle.await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Cancelled));
    assert_eq!(job.status, JobStatus::Cancelled);

    // Only the concept checkpoint exists.
    assert_eq!(parts.versions.node_count(job_id).await, 1);

    let mut cancelled_events = 0;
    let mut outline_completed = 0;
    while let Ok(envelope) = rx.try_recv() {
        match envelope.event {
            Event::SessionCancelled { .. } => cancelled_events += 1,
            Event::PhaseCompleted { phase, .. } if phase == PhaseId::Outline => {
                outline_completed += 1;
            }
            _ => {}
        }
    }
    assert_eq!(cancelled_events, 1);
    assert_eq!(outline_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_executor_hang_times_out_and_retries() {
    // First draft attempt hangs past the phase timeout; the second succeeds.
    let executor = Arc::new(
        ScriptedExecutor::new(0.9).script(PhaseId::Draft, vec![Step::Hang, Step::Score(0.85)]),
    );
    let parts = build_engine(executor);
    let mut rx = parts.bus.subscribe();

    let mut job = job("whitepaper");
    let outcome = parts
        .engine
        .run(&mut job, CancelToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Completed(_)));
    assert_eq!(job.retry_counts[&PhaseId::Draft], 1);

    let mut timeout_retry = false;
    while let Ok(envelope) = rx.try_recv() {
        if let Event::PhaseRetry { phase, reason, .. } = envelope.event {
            assert_eq!(phase, PhaseId::Draft);
            assert!(reason.contains("timed out"));
            timeout_retry = true;
        }
    }
    assert!(timeout_retry);
}

#[tokio::test]
async fn test_previews_surface_as_events() {
    let parts = build_engine(Arc::new(ScriptedExecutor::new(0.9).with_previews()));
    let mut rx = parts.bus.subscribe();

    let mut job = job("pitch deck");
    parts
        .engine
        .run(&mut job, CancelToken::new())
        .await
        .unwrap();

    let mut previews = 0;
    while let Ok(envelope) = rx.try_recv() {
        if let Event::PreviewReady { preview, .. } = envelope.event {
            assert!(preview.get("thumbnail").is_some());
            previews += 1;
        }
    }
    assert_eq!(previews, 7);
}

//! Runs one brief through all seven phases with a canned executor.
//!
//! Useful as a smoke check and as a wiring reference; set RUST_LOG=info to
//! watch the phases go by.

use std::sync::Arc;

use async_trait::async_trait;
use events::{Event, EventBus};
use feedback::FeedbackCoordinator;
use genflow_core::{Document, JobInput, JobPriority, SubmitOptions, SystemClock};
use hub::{HubConfig, NotificationHub};
use pipeline::{
    Coordinator, CoordinatorConfig, ExecutorRegistry, PhaseContext, PhaseEngine, PhaseExecutor,
    PhaseOutput,
};
use quality::{PhaseRuleSet, QualityGate};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use versioning::VersionStore;

struct CannedExecutor;

#[async_trait]
impl PhaseExecutor for CannedExecutor {
    async fn execute(&self, ctx: &PhaseContext) -> pipeline::Result<PhaseOutput> {
        let mut payload = Document::new();
        payload.insert("phase", json!(ctx.phase.as_str()));
        payload.insert(
            "content",
            json!(format!("{} for: {}", ctx.phase, ctx.input.brief)),
        );

        let mut output = PhaseOutput::new(payload);
        for rule in &PhaseRuleSet::for_phase(ctx.phase).rules {
            output = output.with_score(rule.dimension, 0.87);
        }
        Ok(output)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CoordinatorConfig::default();
    let bus = EventBus::new();
    let versions = Arc::new(VersionStore::new());
    let feedback = Arc::new(FeedbackCoordinator::new(bus.clone()));
    let breaker = Coordinator::build_breaker(&config, Arc::new(SystemClock));
    let engine = Arc::new(
        PhaseEngine::new(
            bus,
            Arc::new(ExecutorRegistry::new().register_all(Arc::new(CannedExecutor))),
            Arc::new(QualityGate::new()),
            versions.clone(),
            feedback.clone(),
        )
        .with_breaker(breaker),
    );
    let hub = Arc::new(NotificationHub::new(HubConfig::default()));
    let coordinator = Coordinator::new(config, engine, hub, feedback, versions.clone()).start();

    let (job_id, mut events) = coordinator
        .submit(
            Uuid::new_v4(),
            JobInput::new("a one-page brochure for a reusable water bottle"),
            JobPriority::Normal,
            SubmitOptions::default(),
        )
        .await?;
    info!(%job_id, "Job submitted");

    while let Some(envelope) = events.recv().await {
        match envelope.event {
            Event::PhaseCompleted {
                phase,
                quality_score,
                ..
            } => {
                info!(%phase, quality_score, "Phase completed");
            }
            Event::PipelineCompleted {
                aggregate_quality,
                phases_completed,
                ..
            } => {
                info!(
                    aggregate_quality,
                    phases_completed,
                    checkpoints = versions.node_count(job_id).await,
                    "Pipeline completed"
                );
                break;
            }
            Event::SessionFailed { reason, .. } => {
                anyhow::bail!("pipeline failed: {reason}");
            }
            _ => {}
        }
    }
    Ok(())
}

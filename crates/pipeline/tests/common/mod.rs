#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use events::EventBus;
use feedback::{FeedbackCoordinator, ParsedFeedback};
use genflow_core::{Clock, Document, PhaseId};
use hub::{HubConfig, NotificationHub};
use pipeline::{
    Coordinator, CoordinatorConfig, ExecutorRegistry, FixedMonitor, PhaseContext, PhaseEngine,
    PhaseExecutor, PhaseOutput, PipelineError,
};
use quality::{PhaseRuleSet, QualityGate};
use serde_json::json;
use tokio::sync::Notify;
use versioning::VersionStore;

/// One scripted executor reply for a phase attempt.
pub enum Step {
    Score(f64),
    Fail(String),
    Hang,
}

/// Identical score on every dimension of the phase's rule set.
pub fn uniform_scores(phase: PhaseId, score: f64) -> HashMap<String, f64> {
    PhaseRuleSet::for_phase(phase)
        .rules
        .iter()
        .map(|rule| (rule.dimension.to_string(), score))
        .collect()
}

/// Executor that replays a per-phase script, then a default score forever.
pub struct ScriptedExecutor {
    default_score: f64,
    with_preview: bool,
    steps: Mutex<HashMap<PhaseId, VecDeque<Step>>>,
}

impl ScriptedExecutor {
    pub fn new(default_score: f64) -> Self {
        Self {
            default_score,
            with_preview: false,
            steps: Mutex::new(HashMap::new()),
        }
    }

    pub fn script(self, phase: PhaseId, steps: Vec<Step>) -> Self {
        self.steps
            .lock()
            .unwrap()
            .insert(phase, steps.into_iter().collect());
        self
    }

    pub fn with_previews(mut self) -> Self {
        self.with_preview = true;
        self
    }

    fn output(&self, ctx: &PhaseContext, score: f64) -> PhaseOutput {
        let mut payload = Document::new();
        payload.insert("phase", json!(ctx.phase.as_str()));
        payload.insert("attempt", json!(ctx.attempt));
        payload.insert("brief", json!(ctx.input.brief));

        let mut output = PhaseOutput {
            payload,
            dimension_scores: uniform_scores(ctx.phase, score),
            preview: None,
        };
        if self.with_preview {
            let mut preview = Document::new();
            preview.insert("thumbnail", json!(format!("{}-preview", ctx.phase)));
            output.preview = Some(preview);
        }
        output
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: &PhaseContext) -> pipeline::Result<PhaseOutput> {
        let step = self
            .steps
            .lock()
            .unwrap()
            .get_mut(&ctx.phase)
            .and_then(|queue| queue.pop_front());

        match step.unwrap_or(Step::Score(self.default_score)) {
            Step::Score(score) => Ok(self.output(ctx, score)),
            Step::Fail(reason) => Err(PipelineError::Execution {
                phase: ctx.phase,
                reason,
            }),
            Step::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(PipelineError::Execution {
                    phase: ctx.phase,
                    reason: "hung executor woke up".to_string(),
                })
            }
        }
    }

    async fn apply_feedback(
        &self,
        _ctx: &PhaseContext,
        payload: &Document,
        feedback: &ParsedFeedback,
    ) -> pipeline::Result<PhaseOutput> {
        let mut revised = payload.clone();
        revised.insert("revised", json!(true));
        if let Some(text) = &feedback.text {
            revised.insert("revision_note", json!(text));
        }
        Ok(PhaseOutput::new(revised))
    }
}

/// Executor that parks at one phase until the test releases it.
pub struct GatedExecutor {
    inner: ScriptedExecutor,
    gate_phase: PhaseId,
    only_first: bool,
    gated_already: AtomicBool,
    pub started: Notify,
    pub release: Notify,
}

impl GatedExecutor {
    pub fn new(gate_phase: PhaseId, default_score: f64) -> Self {
        Self {
            inner: ScriptedExecutor::new(default_score),
            gate_phase,
            only_first: false,
            gated_already: AtomicBool::new(false),
            started: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Only the first execution of the gate phase blocks.
    pub fn gate_first_only(mut self) -> Self {
        self.only_first = true;
        self
    }
}

#[async_trait]
impl PhaseExecutor for GatedExecutor {
    async fn execute(&self, ctx: &PhaseContext) -> pipeline::Result<PhaseOutput> {
        if ctx.phase == self.gate_phase {
            let skip = self.only_first && self.gated_already.swap(true, Ordering::SeqCst);
            if !skip {
                self.started.notify_one();
                self.release.notified().await;
            }
        }
        self.inner.execute(ctx).await
    }
}

pub struct EngineParts {
    pub engine: Arc<PhaseEngine>,
    pub bus: EventBus,
    pub versions: Arc<VersionStore>,
    pub feedback: Arc<FeedbackCoordinator>,
}

pub fn build_engine(executor: Arc<dyn PhaseExecutor>) -> EngineParts {
    let bus = EventBus::new();
    let versions = Arc::new(VersionStore::new());
    let feedback = Arc::new(FeedbackCoordinator::new(bus.clone()));
    let engine = Arc::new(PhaseEngine::new(
        bus.clone(),
        Arc::new(ExecutorRegistry::new().register_all(executor)),
        Arc::new(QualityGate::new()),
        versions.clone(),
        feedback.clone(),
    ));
    EngineParts {
        engine,
        bus,
        versions,
        feedback,
    }
}

/// Poll until the coordinator's view of the job reaches a terminal status.
///
/// The final write-back happens after the completion event is published, so
/// tests that assert on stored job state wait here first.
pub async fn wait_terminal(coordinator: &Arc<Coordinator>, job_id: uuid::Uuid) -> genflow_core::Job {
    for _ in 0..500 {
        if let Ok(job) = coordinator.job(job_id).await {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached a terminal status");
}

/// Stack wired from an explicit registry, incomplete ones included.
pub fn build_stack_from_registry(registry: ExecutorRegistry, config: CoordinatorConfig) -> Stack {
    let bus = EventBus::new();
    let versions = Arc::new(VersionStore::new());
    let feedback = Arc::new(FeedbackCoordinator::new(bus.clone()));
    let engine = Arc::new(PhaseEngine::new(
        bus.clone(),
        Arc::new(registry),
        Arc::new(QualityGate::new()),
        versions.clone(),
        feedback.clone(),
    ));
    let hub = Arc::new(NotificationHub::new(HubConfig::default()));
    let monitor = Arc::new(FixedMonitor::default());
    let coordinator = Coordinator::new(
        config,
        engine,
        hub.clone(),
        feedback.clone(),
        versions.clone(),
    )
    .with_monitor(monitor.clone())
    .start();

    Stack {
        coordinator,
        bus,
        versions,
        feedback,
        hub,
        monitor,
    }
}

pub struct Stack {
    pub coordinator: Arc<Coordinator>,
    pub bus: EventBus,
    pub versions: Arc<VersionStore>,
    pub feedback: Arc<FeedbackCoordinator>,
    pub hub: Arc<NotificationHub>,
    pub monitor: Arc<FixedMonitor>,
}

pub fn build_stack(executor: Arc<dyn PhaseExecutor>, config: CoordinatorConfig) -> Stack {
    build_stack_with(executor, config, None)
}

pub fn build_stack_with(
    executor: Arc<dyn PhaseExecutor>,
    config: CoordinatorConfig,
    clock: Option<Arc<dyn Clock>>,
) -> Stack {
    let parts = build_engine(executor);
    let hub = Arc::new(NotificationHub::new(HubConfig::default()));
    let monitor = Arc::new(FixedMonitor::default());

    let mut coordinator = Coordinator::new(
        config,
        parts.engine,
        hub.clone(),
        parts.feedback.clone(),
        parts.versions.clone(),
    )
    .with_monitor(monitor.clone());
    if let Some(clock) = clock {
        coordinator = coordinator.with_clock(clock);
    }

    Stack {
        coordinator: coordinator.start(),
        bus: parts.bus,
        versions: parts.versions,
        feedback: parts.feedback,
        hub,
        monitor,
    }
}

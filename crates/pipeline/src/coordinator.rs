//! Submission gateway: admission control, priority queues, the worker pool,
//! and the background loops that keep the pipeline healthy.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use events::{Event, EventBus, EventEnvelope};
use feedback::FeedbackCoordinator;
use genflow_core::{Clock, Job, JobInput, JobPriority, JobStatus, SubmitOptions, SystemClock};
use hub::NotificationHub;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use versioning::VersionStore;

use crate::config::CoordinatorConfig;
use crate::engine::{CancelToken, PhaseEngine, PipelineOutcome};
use crate::error::{PipelineError, Result};
use crate::resources::{
    CircuitBreaker, FixedMonitor, HealthStatus, ResourceMonitor, ResourceSample,
};

struct JobEntry {
    job: Job,
    cancel: CancelToken,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Queues {
    priority: VecDeque<Uuid>,
    normal: VecDeque<Uuid>,
}

impl Queues {
    fn depth(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    fn pop(&mut self) -> Option<Uuid> {
        self.priority
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    fn remove(&mut self, job_id: Uuid) {
        self.priority.retain(|id| *id != job_id);
        self.normal.retain(|id| *id != job_id);
    }
}

/// Point-in-time coordinator metrics.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    pub active_sessions: usize,
    pub queued_priority: usize,
    pub queued_normal: usize,
    pub max_sessions: usize,
    pub jobs_tracked: usize,
    pub health: HealthStatus,
}

/// Front door of the pipeline.
///
/// Owns the job table, the two FIFO queues, and the worker pool; relays each
/// job's events to the submitter's stream and to the notification hub.
pub struct Coordinator {
    config: CoordinatorConfig,
    bus: EventBus,
    engine: Arc<PhaseEngine>,
    hub: Arc<NotificationHub>,
    feedback: Arc<FeedbackCoordinator>,
    versions: Arc<VersionStore>,
    monitor: Arc<dyn ResourceMonitor>,
    clock: Arc<dyn Clock>,
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    queues: Mutex<Queues>,
    streams: RwLock<HashMap<Uuid, mpsc::UnboundedSender<EventEnvelope>>>,
    work_available: Notify,
    active: AtomicUsize,
    max_sessions: AtomicUsize,
    last_sample: RwLock<ResourceSample>,
    health: RwLock<HealthStatus>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        engine: Arc<PhaseEngine>,
        hub: Arc<NotificationHub>,
        feedback: Arc<FeedbackCoordinator>,
        versions: Arc<VersionStore>,
    ) -> Self {
        let initial_max = config.initial_max_sessions;
        Self {
            config,
            bus: engine.bus().clone(),
            engine,
            hub,
            feedback,
            versions,
            monitor: Arc::new(FixedMonitor::default()),
            clock: Arc::new(SystemClock),
            jobs: RwLock::new(HashMap::new()),
            queues: Mutex::new(Queues::default()),
            streams: RwLock::new(HashMap::new()),
            work_available: Notify::new(),
            active: AtomicUsize::new(0),
            max_sessions: AtomicUsize::new(initial_max),
            last_sample: RwLock::new(ResourceSample::default()),
            health: RwLock::new(HealthStatus::Active),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Breaker wired from coordinator settings, for attaching to the engine.
    pub fn build_breaker(config: &CoordinatorConfig, clock: Arc<dyn Clock>) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            clock,
            config.breaker_window,
            config.breaker_threshold,
        ))
    }

    /// Spawn workers and background loops; the coordinator is live after this.
    pub fn start(self) -> Arc<Self> {
        let this = Arc::new(self);
        for worker_id in 0..this.config.workers {
            this.spawn_worker(worker_id);
        }
        this.spawn_event_router();
        this.hub.spawn_relay(&this.bus);
        this.hub.spawn_heartbeat();
        this.spawn_resource_sampler();
        this.spawn_health_monitor();
        this.spawn_retention_sweeper();
        info!(workers = this.config.workers, "Coordinator started");
        this
    }

    /// Submit a new job; returns its id and a stream of its progress events.
    pub async fn submit(
        &self,
        owner: Uuid,
        input: JobInput,
        priority: JobPriority,
        options: SubmitOptions,
    ) -> Result<(Uuid, mpsc::UnboundedReceiver<EventEnvelope>)> {
        let job = Job::new(owner, input, priority).with_options(options);
        self.admit(job).await
    }

    /// Submit a pre-built job (resubmission path, caller-assigned ids).
    pub async fn submit_job(
        &self,
        job: Job,
    ) -> Result<(Uuid, mpsc::UnboundedReceiver<EventEnvelope>)> {
        self.admit(job).await
    }

    async fn admit(&self, job: Job) -> Result<(Uuid, mpsc::UnboundedReceiver<EventEnvelope>)> {
        if job.input.brief.trim().is_empty() {
            return Err(PipelineError::Validation(
                "job brief must not be empty".to_string(),
            ));
        }

        let job_id = job.id;
        let priority = job.priority;
        let (tx, rx) = mpsc::unbounded_channel();

        // Duplicate check and tracking insert happen under one write lock so
        // two submits of the same id cannot both pass the check.
        {
            let mut jobs = self.jobs.write().await;
            if let Some(entry) = jobs.get(&job_id) {
                if !entry.job.status.is_terminal() {
                    return Err(PipelineError::ConcurrencyLimit(job_id));
                }
            }
            jobs.insert(
                job_id,
                JobEntry {
                    job,
                    cancel: CancelToken::new(),
                    finished_at: None,
                },
            );
        }
        self.streams.write().await.insert(job_id, tx);

        // Capacity check and enqueue share the queues lock: concurrent
        // submits serialize here, so the second one sees the first one's
        // slot already claimed and the cap stays strict.
        let max_sessions = self.max_sessions.load(Ordering::SeqCst);
        let sample = *self.last_sample.read().await;
        let depth = {
            let mut queues = self.queues.lock().await;
            let in_flight = self.active.load(Ordering::SeqCst) + queues.depth();
            if in_flight >= max_sessions
                || sample.cpu > self.config.cpu_threshold
                || sample.memory > self.config.memory_threshold
            {
                let retry_after = Self::suggested_backoff(queues.depth());
                drop(queues);
                self.jobs.write().await.remove(&job_id);
                self.streams.write().await.remove(&job_id);
                debug!(
                    in_flight,
                    max_sessions,
                    cpu = sample.cpu,
                    memory = sample.memory,
                    "Submission rejected at admission"
                );
                return Err(PipelineError::ResourceExhausted { retry_after });
            }
            match priority {
                JobPriority::Priority => queues.priority.push_back(job_id),
                JobPriority::Normal => queues.normal.push_back(job_id),
            }
            queues.depth()
        };

        self.bus.publish(EventEnvelope::at(
            Event::JobQueued {
                job_id,
                priority: priority.as_str().to_string(),
                queue_depth: depth,
            },
            self.clock.now(),
        ));
        self.work_available.notify_one();

        info!(job_id = %job_id, priority = priority.as_str(), depth, "Job queued");
        Ok((job_id, rx))
    }

    /// Cooperative cancel: queued jobs finish immediately, running jobs stop
    /// at the next phase boundary.
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let was_queued = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job_id)
                .ok_or(PipelineError::JobNotFound(job_id))?;
            if entry.job.status.is_terminal() {
                return Ok(());
            }
            entry.cancel.cancel();

            let was_queued = entry.job.status == JobStatus::Queued;
            if was_queued {
                entry.job.status = JobStatus::Cancelled;
                entry.finished_at = Some(self.clock.now());
            }
            was_queued
        };

        if was_queued {
            self.queues.lock().await.remove(job_id);
            self.bus.publish(EventEnvelope::at(
                Event::SessionCancelled { job_id },
                self.clock.now(),
            ));
        }
        self.feedback.cancel_all_for_job(job_id).await;

        info!(job_id = %job_id, was_queued, "Job cancelled");
        Ok(())
    }

    pub async fn job(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.job.clone())
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let queues = self.queues.lock().await;
        CoordinatorStats {
            active_sessions: self.active.load(Ordering::SeqCst),
            queued_priority: queues.priority.len(),
            queued_normal: queues.normal.len(),
            max_sessions: self.max_sessions.load(Ordering::SeqCst),
            jobs_tracked: self.jobs.read().await.len(),
            health: *self.health.read().await,
        }
    }

    pub async fn health(&self) -> HealthStatus {
        *self.health.read().await
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions.load(Ordering::SeqCst)
    }

    fn suggested_backoff(queue_depth: usize) -> Duration {
        Duration::from_secs((5 * (queue_depth as u64 + 1)).min(60))
    }

    fn spawn_worker(self: &Arc<Self>, worker_id: usize) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            debug!(worker_id, "Worker started");
            loop {
                let next = {
                    let mut queues = this.queues.lock().await;
                    let next = queues.pop();
                    if next.is_some() {
                        // Claimed under the lock so admission never sees the
                        // job missing from both the queue and the active count.
                        this.active.fetch_add(1, Ordering::SeqCst);
                    }
                    next
                };
                let Some(job_id) = next else {
                    this.work_available.notified().await;
                    continue;
                };
                this.run_job(job_id).await;
                this.active.fetch_sub(1, Ordering::SeqCst);
            }
        })
    }

    async fn run_job(&self, job_id: Uuid) {
        let (mut job, cancel) = {
            let mut jobs = self.jobs.write().await;
            let Some(entry) = jobs.get_mut(&job_id) else {
                return;
            };
            // Cancelled while queued: nothing to run.
            if entry.job.status.is_terminal() {
                return;
            }
            let cloned = entry.job.clone();
            // Mark the tracked entry so cancel() sees the job as running.
            // The local clone stays Queued for the engine's own transition.
            entry.job.status = JobStatus::Processing;
            (cloned, entry.cancel.clone())
        };

        let outcome = self.engine.run(&mut job, cancel).await;
        match &outcome {
            Ok(PipelineOutcome::Completed(result)) => {
                debug!(
                    job_id = %job_id,
                    aggregate_quality = result.aggregate_quality,
                    "Job finished"
                );
            }
            Ok(PipelineOutcome::Failed { phase, reason }) => {
                debug!(job_id = %job_id, phase = %phase, reason = %reason, "Job failed");
            }
            Ok(PipelineOutcome::Cancelled) => {
                debug!(job_id = %job_id, "Job cancelled during execution");
            }
            Err(e) => {
                // Setup-level failure (missing executor, broken transition).
                error!(job_id = %job_id, error = %e, "Job aborted");
                job.status = JobStatus::Failed;
                job.updated_at = self.clock.now();
                self.bus.publish(EventEnvelope::at(
                    Event::Error {
                        message: e.to_string(),
                        job_id: Some(job_id),
                    },
                    self.clock.now(),
                ));
                self.bus.publish(EventEnvelope::at(
                    Event::SessionFailed {
                        job_id,
                        phase: None,
                        reason: e.to_string(),
                    },
                    self.clock.now(),
                ));
            }
        }

        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.job = job;
            entry.finished_at = Some(now);
        }
    }

    /// Forward every bus event to the submitting caller's stream.
    fn spawn_event_router(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let Some(job_id) = envelope.event.job_id() else {
                            continue;
                        };
                        let streams = this.streams.read().await;
                        if let Some(tx) = streams.get(&job_id) {
                            // A dropped receiver just means the caller left.
                            let _ = tx.send(envelope);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event router lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Sample utilization and adapt the session limit one step per tick.
    fn spawn_resource_sampler(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.sample_interval);
            loop {
                ticker.tick().await;
                let sample = this.monitor.sample().await;
                *this.last_sample.write().await = sample;
                this.adapt_session_limit(sample);
            }
        })
    }

    fn adapt_session_limit(&self, sample: ResourceSample) {
        let current = self.max_sessions.load(Ordering::SeqCst);
        let overloaded =
            sample.cpu > self.config.cpu_threshold || sample.memory > self.config.memory_threshold;
        let idle = sample.cpu < self.config.cpu_threshold * 0.5
            && sample.memory < self.config.memory_threshold * 0.5;

        let target = if overloaded {
            current.saturating_sub(1).max(self.config.min_sessions)
        } else if idle {
            (current + 1).min(self.config.max_sessions)
        } else {
            current
        };

        if target != current {
            self.max_sessions.store(target, Ordering::SeqCst);
            info!(
                from = current,
                to = target,
                cpu = sample.cpu,
                memory = sample.memory,
                "Adapted session limit"
            );
        }
    }

    /// Classify overall health from recent failures, load, and queue depth.
    fn spawn_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.health_interval);
            loop {
                ticker.tick().await;
                let status = this.classify_health().await;
                let mut health = this.health.write().await;
                if *health != status {
                    info!(
                        from = health.as_str(),
                        to = status.as_str(),
                        "Health status changed"
                    );
                    *health = status;
                }
            }
        })
    }

    async fn classify_health(&self) -> HealthStatus {
        let window_start = self.clock.now() - self.config.breaker_window;
        let (recent_total, recent_failed) = {
            let jobs = self.jobs.read().await;
            let recent: Vec<&JobEntry> = jobs
                .values()
                .filter(|entry| entry.finished_at.map_or(false, |at| at >= window_start))
                .collect();
            let failed = recent
                .iter()
                .filter(|entry| entry.job.status == JobStatus::Failed)
                .count();
            (recent.len(), failed)
        };

        if recent_total > 0 {
            let error_rate = recent_failed as f64 / recent_total as f64;
            if error_rate > self.config.error_rate_limit {
                return HealthStatus::Error;
            }
        }

        let sample = *self.last_sample.read().await;
        let queue_depth = self.queues.lock().await.depth();
        let max_sessions = self.max_sessions.load(Ordering::SeqCst);
        if sample.cpu > self.config.cpu_threshold
            || sample.memory > self.config.memory_threshold
            || queue_depth > max_sessions * 2
        {
            return HealthStatus::Overloaded;
        }
        HealthStatus::Active
    }

    /// Drop terminal jobs past the retention TTL and sweep old versions.
    fn spawn_retention_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.sweep_interval);
            loop {
                ticker.tick().await;
                let removed = this.sweep_terminal_jobs().await;
                let versions_removed = this.versions.sweep().await;
                if removed > 0 || versions_removed > 0 {
                    debug!(jobs = removed, versions = versions_removed, "Retention sweep");
                }
            }
        })
    }

    async fn sweep_terminal_jobs(&self) -> usize {
        let cutoff = self.clock.now() - self.config.retention_ttl;
        let expired: Vec<Uuid> = {
            let jobs = self.jobs.read().await;
            jobs.iter()
                .filter(|(_, entry)| {
                    entry.job.status.is_terminal()
                        && entry.finished_at.map_or(false, |at| at < cutoff)
                })
                .map(|(id, _)| *id)
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }

        let mut jobs = self.jobs.write().await;
        let mut streams = self.streams.write().await;
        for job_id in &expired {
            jobs.remove(job_id);
            streams.remove(job_id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_backoff_grows_with_depth() {
        assert_eq!(Coordinator::suggested_backoff(0), Duration::from_secs(5));
        assert_eq!(Coordinator::suggested_backoff(3), Duration::from_secs(20));
        assert_eq!(Coordinator::suggested_backoff(100), Duration::from_secs(60));
    }

    #[test]
    fn test_queues_priority_first() {
        let mut queues = Queues::default();
        let normal = Uuid::new_v4();
        let urgent = Uuid::new_v4();
        queues.normal.push_back(normal);
        queues.priority.push_back(urgent);

        assert_eq!(queues.pop(), Some(urgent));
        assert_eq!(queues.pop(), Some(normal));
        assert_eq!(queues.pop(), None);
    }

    #[test]
    fn test_queues_remove() {
        let mut queues = Queues::default();
        let job_id = Uuid::new_v4();
        queues.normal.push_back(job_id);
        queues.remove(job_id);
        assert_eq!(queues.depth(), 0);
    }
}

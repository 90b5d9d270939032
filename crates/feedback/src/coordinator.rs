//! The request/response broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use events::{Event, EventBus, EventEnvelope};
use genflow_core::{
    Clock, Document, FeedbackAction, FeedbackKind, FeedbackRequest, FeedbackRequestStatus,
    FeedbackResponse, PhaseId, SystemClock,
};
use store::{KeyValueStore, TypedStore};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FeedbackError, Result};
use crate::metrics::FeedbackMetrics;

const STORE_PREFIX: &str = "feedback:";

/// How a wait on a feedback request concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Response(ParsedFeedback),
    TimedOut,
    Cancelled,
}

/// A reviewer response parsed into a structured action.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeedback {
    pub action: FeedbackAction,
    pub text: Option<String>,
    pub rating: Option<u8>,
    pub latency_ms: u64,
}

/// Parameters for opening a feedback window.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub kind: FeedbackKind,
    pub options: Vec<String>,
    pub preview: Option<Document>,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            kind: FeedbackKind::FreeText,
            options: Vec::new(),
            preview: None,
        }
    }
}

enum Resolution {
    Response(FeedbackResponse),
    Cancelled,
}

struct PendingEntry {
    request: FeedbackRequest,
    /// None for requests recovered after a restart: their waiter is gone,
    /// but a late response still resolves and records the request.
    tx: Option<oneshot::Sender<Resolution>>,
}

#[derive(Default)]
struct PendingState {
    by_id: HashMap<Uuid, PendingEntry>,
    by_key: HashMap<(Uuid, PhaseId), Uuid>,
}

/// Bounded-wait request/response broker, one pending request per (job, phase).
pub struct FeedbackCoordinator {
    clock: Arc<dyn Clock>,
    bus: EventBus,
    durable: Option<Arc<dyn KeyValueStore>>,
    pending: Mutex<PendingState>,
    metrics: Mutex<FeedbackMetrics>,
}

impl FeedbackCoordinator {
    pub fn new(bus: EventBus) -> Self {
        Self::with_clock(bus, Arc::new(SystemClock))
    }

    pub fn with_clock(bus: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            bus,
            durable: None,
            pending: Mutex::new(PendingState::default()),
            metrics: Mutex::new(FeedbackMetrics::default()),
        }
    }

    pub fn with_durable(mut self, durable: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Open a feedback window and wait for its resolution.
    ///
    /// Publishes `hitl_opportunity`, then blocks until exactly one of: a
    /// matching response arrives, the timeout elapses, or the request is
    /// cancelled. A second concurrent request for the same (job, phase) is
    /// rejected before any state is created.
    pub async fn request(
        &self,
        job_id: Uuid,
        phase: PhaseId,
        timeout: Duration,
        params: RequestParams,
    ) -> Result<FeedbackOutcome> {
        let now = self.clock.now();
        let expires_at = now
            + ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::seconds(30));

        let mut request = FeedbackRequest::new(job_id, phase, params.kind, now, expires_at)
            .with_options(params.options);
        if let Some(preview) = params.preview {
            request = request.with_preview(preview);
        }
        let request_id = request.id;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.by_key.contains_key(&(job_id, phase)) {
                return Err(FeedbackError::DuplicatePending { job_id, phase });
            }
            pending.by_key.insert((job_id, phase), request_id);
            pending.by_id.insert(
                request_id,
                PendingEntry {
                    request: request.clone(),
                    tx: Some(tx),
                },
            );
        }

        self.persist(&request).await;
        self.metrics.lock().await.record_request(phase);
        self.bus.publish(EventEnvelope::new(Event::HitlOpportunity {
            job_id,
            phase,
            request_id,
            expires_at,
        }));

        info!(
            job_id = %job_id,
            phase = %phase,
            request_id = %request_id,
            timeout_secs = timeout.as_secs(),
            "Feedback window opened"
        );

        let outcome = tokio::select! {
            resolution = rx => match resolution {
                Ok(Resolution::Response(response)) => {
                    let latency_ms = (self.clock.now() - now).num_milliseconds().max(0) as u64;
                    self.metrics.lock().await.record_response(phase, latency_ms);
                    FeedbackOutcome::Response(ParsedFeedback {
                        action: response.action,
                        text: response.text,
                        rating: response.rating,
                        latency_ms,
                    })
                }
                Ok(Resolution::Cancelled) | Err(_) => {
                    self.metrics.lock().await.record_cancelled(phase);
                    FeedbackOutcome::Cancelled
                }
            },
            _ = tokio::time::sleep(timeout) => {
                self.metrics.lock().await.record_timeout(phase);
                FeedbackOutcome::TimedOut
            }
        };

        let final_status = match &outcome {
            FeedbackOutcome::Response(_) => FeedbackRequestStatus::Processed,
            FeedbackOutcome::TimedOut => FeedbackRequestStatus::Timeout,
            FeedbackOutcome::Cancelled => FeedbackRequestStatus::Cancelled,
        };
        self.finalize(request_id, job_id, phase, final_status).await;

        info!(
            request_id = %request_id,
            status = final_status.as_str(),
            "Feedback window resolved"
        );
        Ok(outcome)
    }

    /// Deliver a reviewer response to a pending request.
    pub async fn respond(&self, response: FeedbackResponse) -> Result<()> {
        let request_id = response.request_id;
        let mut pending = self.pending.lock().await;
        let entry = pending
            .by_id
            .get_mut(&request_id)
            .ok_or(FeedbackError::RequestNotFound(request_id))?;

        if self.clock.now() > entry.request.expires_at {
            return Err(FeedbackError::Expired(request_id));
        }

        let job_id = entry.request.job_id;
        let phase = entry.request.phase;
        let action = response.action;

        match entry.tx.take() {
            Some(tx) => {
                // Mark the hop before handing off: the waiter finalizes to
                // PROCESSED under this same lock, so RECEIVED cannot land
                // after it in the store.
                entry.request.status = FeedbackRequestStatus::Received;
                let received = entry.request.clone();
                self.persist(&received).await;
                if tx.send(Resolution::Response(response)).is_err() {
                    // Waiter raced the timeout; its finalize records TIMEOUT.
                    return Err(FeedbackError::AlreadyResolved(request_id));
                }
                drop(pending);
            }
            None => {
                // Recovered request with no live waiter: record and close out.
                entry.request.status = FeedbackRequestStatus::Processed;
                let request = entry.request.clone();
                pending.by_id.remove(&request_id);
                pending.by_key.remove(&(job_id, phase));
                drop(pending);
                self.persist(&request).await;
                self.metrics.lock().await.record_response(phase, 0);
                debug!(request_id = %request_id, "Late response to recovered request recorded");
            }
        }

        self.bus.publish(EventEnvelope::new(Event::FeedbackReceived {
            job_id,
            phase,
            request_id,
            action,
        }));
        Ok(())
    }

    /// Cancel a pending request explicitly.
    pub async fn cancel(&self, request_id: Uuid) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let entry = pending
            .by_id
            .get_mut(&request_id)
            .ok_or(FeedbackError::RequestNotFound(request_id))?;

        if let Some(tx) = entry.tx.take() {
            let _ = tx.send(Resolution::Cancelled);
        } else {
            let job_id = entry.request.job_id;
            let phase = entry.request.phase;
            pending.by_id.remove(&request_id);
            pending.by_key.remove(&(job_id, phase));
        }
        Ok(())
    }

    /// Cancel every pending request for a job (job cleanup path).
    pub async fn cancel_all_for_job(&self, job_id: Uuid) {
        let request_ids: Vec<Uuid> = {
            let pending = self.pending.lock().await;
            pending
                .by_key
                .iter()
                .filter(|((job, _), _)| *job == job_id)
                .map(|(_, id)| *id)
                .collect()
        };
        for request_id in request_ids {
            if let Err(e) = self.cancel(request_id).await {
                debug!(request_id = %request_id, error = %e, "Cancel during cleanup skipped");
            }
        }
    }

    /// Is a request currently pending for this (job, phase)?
    pub async fn has_pending(&self, job_id: Uuid, phase: PhaseId) -> bool {
        self.pending
            .lock()
            .await
            .by_key
            .contains_key(&(job_id, phase))
    }

    pub async fn metrics(&self) -> FeedbackMetrics {
        self.metrics.lock().await.clone()
    }

    /// Recovery scan: reload persisted PENDING requests after a restart.
    ///
    /// Expired ones are marked TIMEOUT in the store; live ones are
    /// re-registered without a waiter so a late response is still recorded.
    pub async fn recover(&self) -> Result<usize> {
        let Some(ref durable) = self.durable else {
            return Ok(0);
        };
        let now = self.clock.now();
        let mut recovered = 0;

        for key in durable.keys_with_prefix(STORE_PREFIX).await? {
            let Some(mut request) =
                TypedStore::get_json::<FeedbackRequest>(durable.as_ref(), &key).await?
            else {
                continue;
            };
            if request.status != FeedbackRequestStatus::Pending {
                continue;
            }
            if request.expires_at <= now {
                request.status = FeedbackRequestStatus::Timeout;
                self.persist(&request).await;
                continue;
            }
            let mut pending = self.pending.lock().await;
            if pending.by_key.contains_key(&(request.job_id, request.phase)) {
                continue;
            }
            pending
                .by_key
                .insert((request.job_id, request.phase), request.id);
            pending.by_id.insert(
                request.id,
                PendingEntry {
                    request: request.clone(),
                    tx: None,
                },
            );
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "Recovered pending feedback requests");
        }
        Ok(recovered)
    }

    async fn finalize(
        &self,
        request_id: Uuid,
        job_id: Uuid,
        phase: PhaseId,
        status: FeedbackRequestStatus,
    ) {
        let request = {
            let mut pending = self.pending.lock().await;
            pending.by_key.remove(&(job_id, phase));
            pending.by_id.remove(&request_id).map(|mut entry| {
                entry.request.status = status;
                entry.request
            })
        };
        if let Some(request) = request {
            self.persist(&request).await;
        }
    }

    async fn persist(&self, request: &FeedbackRequest) {
        let Some(ref durable) = self.durable else {
            return;
        };
        let key = format!("{STORE_PREFIX}{}", request.id);
        let ttl = ChronoDuration::hours(1);
        if let Err(e) = TypedStore::set_json(durable.as_ref(), &key, request, Some(ttl)).await {
            // Degraded mode: the request lives in memory only.
            warn!(error = %e, request_id = %request.id, "Failed to persist feedback request");
        }
    }
}

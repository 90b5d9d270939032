//! The gate itself: evaluation, caching, override, aggregate quality.

use std::collections::HashMap;
use std::sync::Arc;

use genflow_core::{Clock, Document, GateDecision, PhaseId, QualityAssessment, SystemClock};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditEntry};
use crate::error::{QualityError, Result};
use crate::rules::PhaseRuleSet;

/// Result of an override attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideOutcome {
    Accepted,
    Denied,
}

/// Aggregate quality across completed phases.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuality {
    /// Mean of per-phase scores.
    pub mean: f64,
    /// 1.0 when all phases scored identically, approaching 0 as scores
    /// spread; derived from the standard deviation.
    pub consistency: f64,
}

/// Rule-weighted evaluator with an assessment cache keyed by content hash.
pub struct QualityGate {
    clock: Arc<dyn Clock>,
    /// content-hash -> finished assessment (same payload gates identically)
    cache: RwLock<HashMap<String, QualityAssessment>>,
    /// assessment id -> assessment, for the override path
    assessments: RwLock<HashMap<Uuid, QualityAssessment>>,
    audit_log: Mutex<Vec<AuditEntry>>,
}

impl QualityGate {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cache: RwLock::new(HashMap::new()),
            assessments: RwLock::new(HashMap::new()),
            audit_log: Mutex::new(Vec::new()),
        }
    }

    /// Evaluate a phase payload against the phase's fixed rule set.
    ///
    /// `dimension_scores` come from the phase executor. A rule whose
    /// dimension is missing is skipped and recorded as an issue; its weight
    /// is excluded from the weighted average.
    pub async fn evaluate(
        &self,
        phase: PhaseId,
        payload: &Document,
        dimension_scores: &HashMap<String, f64>,
    ) -> QualityAssessment {
        let content_hash = Self::content_hash(phase, payload);

        if let Some(cached) = self.cache.read().await.get(&content_hash) {
            debug!(phase = %phase, hash = %content_hash, "Assessment cache hit");
            return cached.clone();
        }

        let rule_set = PhaseRuleSet::for_phase(phase);
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut critical_failure = false;
        let mut scored = HashMap::new();

        for rule in &rule_set.rules {
            match dimension_scores.get(rule.dimension) {
                Some(raw) => {
                    let score = raw.clamp(0.0, 1.0);
                    scored.insert(rule.dimension.to_string(), score);
                    weighted_sum += score * rule.weight;
                    weight_total += rule.weight;

                    if score < rule.threshold {
                        issues.push(format!(
                            "{} scored {score:.2}, below threshold {:.2}",
                            rule.dimension, rule.threshold
                        ));
                        recommendations
                            .push(format!("Improve {} before the next attempt", rule.dimension));
                        if rule.critical {
                            critical_failure = true;
                        }
                    }
                }
                None => {
                    // QualityRuleError path: skipped, never fatal.
                    let err = QualityError::RuleFailed {
                        dimension: rule.dimension.to_string(),
                        reason: "dimension score missing from executor output".to_string(),
                    };
                    warn!(phase = %phase, error = %err, "Skipping rule");
                    issues.push(format!("rule {} skipped: no score reported", rule.dimension));
                }
            }
        }

        let overall = if weight_total > 0.0 {
            (weighted_sum / weight_total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let decision = Self::decide(overall, rule_set.threshold, critical_failure);

        let assessment = QualityAssessment {
            id: Uuid::new_v4(),
            phase,
            overall_score: overall,
            dimension_scores: scored,
            decision,
            issues,
            recommendations,
            content_hash: content_hash.clone(),
            created_at: self.clock.now(),
        };

        info!(
            phase = %phase,
            score = overall,
            decision = decision.as_str(),
            "Phase payload assessed"
        );

        self.cache
            .write()
            .await
            .insert(content_hash, assessment.clone());
        self.assessments
            .write()
            .await
            .insert(assessment.id, assessment.clone());
        assessment
    }

    /// The decision table.
    fn decide(score: f64, threshold: f64, critical_failure: bool) -> GateDecision {
        if critical_failure {
            GateDecision::Retry
        } else if score >= threshold {
            GateDecision::Pass
        } else if score >= 0.8 * threshold {
            GateDecision::Retry
        } else if score >= 0.5 * threshold {
            GateDecision::ManualReview
        } else {
            GateDecision::Fallback
        }
    }

    /// Force an assessment to PASS. Permission-checked, always audit-logged.
    pub async fn override_decision(
        &self,
        actor: &Actor,
        phase: PhaseId,
        assessment_id: Uuid,
        reason: &str,
    ) -> Result<OverrideOutcome> {
        let accepted = actor.role.can_override();

        self.audit_log.lock().await.push(AuditEntry {
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            phase,
            assessment_id,
            reason: reason.to_string(),
            accepted,
            at: self.clock.now(),
        });

        if !accepted {
            warn!(
                actor = %actor.name,
                assessment_id = %assessment_id,
                "Override DENIED: insufficient role"
            );
            return Ok(OverrideOutcome::Denied);
        }

        let mut assessments = self.assessments.write().await;
        let assessment = assessments
            .get_mut(&assessment_id)
            .ok_or(QualityError::AssessmentNotFound(assessment_id))?;
        assessment.decision = GateDecision::Override;

        // Keep the cache entry consistent with the overridden decision.
        self.cache
            .write()
            .await
            .insert(assessment.content_hash.clone(), assessment.clone());

        info!(
            actor = %actor.name,
            assessment_id = %assessment_id,
            reason = %reason,
            "Override ACCEPTED"
        );
        Ok(OverrideOutcome::Accepted)
    }

    pub async fn assessment(&self, id: Uuid) -> Result<QualityAssessment> {
        self.assessments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(QualityError::AssessmentNotFound(id))
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().await.clone()
    }

    /// Mean and dispersion-derived consistency of per-phase scores.
    pub fn aggregate(scores: &HashMap<PhaseId, f64>) -> Option<AggregateQuality> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let mean = scores.values().sum::<f64>() / n;
        let variance = scores
            .values()
            .map(|score| (score - mean).powi(2))
            .sum::<f64>()
            / n;
        let consistency = (1.0 - variance.sqrt() * 2.0).clamp(0.0, 1.0);
        Some(AggregateQuality { mean, consistency })
    }

    fn content_hash(phase: PhaseId, payload: &Document) -> String {
        let mut hasher = Sha256::new();
        hasher.update(phase.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(payload.canonical_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new()
    }
}

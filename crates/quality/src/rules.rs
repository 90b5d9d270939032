//! Fixed per-phase weighted rule sets.

use genflow_core::PhaseId;
use serde::{Deserialize, Serialize};

/// One quality dimension checked against a phase payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRule {
    /// Dimension name; executors report a score for it in [0, 1].
    pub dimension: &'static str,
    /// Relative weight within the phase's rule set.
    pub weight: f64,
    /// Minimum acceptable dimension score.
    pub threshold: f64,
    /// Critical rules force a retry on failure regardless of overall score.
    pub critical: bool,
}

impl QualityRule {
    const fn new(dimension: &'static str, weight: f64, threshold: f64, critical: bool) -> Self {
        Self {
            dimension,
            weight,
            threshold,
            critical,
        }
    }
}

/// The rule set and overall pass threshold for one phase.
#[derive(Debug, Clone)]
pub struct PhaseRuleSet {
    pub phase: PhaseId,
    /// Overall weighted score required for PASS.
    pub threshold: f64,
    pub rules: Vec<QualityRule>,
}

impl PhaseRuleSet {
    /// The fixed rule set for a phase.
    pub fn for_phase(phase: PhaseId) -> Self {
        let (threshold, rules) = match phase {
            PhaseId::Concept => (
                0.70,
                vec![
                    QualityRule::new("relevance", 0.5, 0.6, true),
                    QualityRule::new("originality", 0.3, 0.5, false),
                    QualityRule::new("clarity", 0.2, 0.5, false),
                ],
            ),
            PhaseId::Outline => (
                0.75,
                vec![
                    QualityRule::new("structure", 0.4, 0.6, true),
                    QualityRule::new("coverage", 0.35, 0.5, false),
                    QualityRule::new("coherence", 0.25, 0.5, false),
                ],
            ),
            PhaseId::Draft => (
                0.75,
                vec![
                    QualityRule::new("accuracy", 0.4, 0.65, true),
                    QualityRule::new("completeness", 0.35, 0.5, false),
                    QualityRule::new("readability", 0.25, 0.5, false),
                ],
            ),
            PhaseId::Refine => (
                0.72,
                vec![
                    QualityRule::new("consistency", 0.4, 0.6, false),
                    QualityRule::new("tone", 0.3, 0.5, false),
                    QualityRule::new("grammar", 0.3, 0.6, true),
                ],
            ),
            PhaseId::Imagery => (
                0.68,
                vec![
                    QualityRule::new("fidelity", 0.45, 0.6, true),
                    QualityRule::new("composition", 0.3, 0.5, false),
                    QualityRule::new("style_match", 0.25, 0.45, false),
                ],
            ),
            PhaseId::Layout => (
                0.70,
                vec![
                    QualityRule::new("balance", 0.35, 0.5, false),
                    QualityRule::new("hierarchy", 0.35, 0.55, false),
                    QualityRule::new("accessibility", 0.3, 0.6, true),
                ],
            ),
            PhaseId::Export => (
                0.80,
                vec![
                    QualityRule::new("integrity", 0.6, 0.7, true),
                    QualityRule::new("format_fidelity", 0.4, 0.6, false),
                ],
            ),
        };
        Self {
            phase,
            threshold,
            rules,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.rules.iter().map(|rule| rule.weight).sum()
    }
}

//! Quality gate: rule-weighted evaluation of phase payloads.
//!
//! Each phase carries a fixed weighted rule set. Executors report
//! per-dimension scores alongside their payload; the gate weighs them,
//! applies the decision table, caches assessments by content hash, and
//! offers an audited override path.

pub mod audit;
pub mod error;
pub mod gate;
pub mod rules;

pub use audit::{Actor, ActorRole, AuditEntry};
pub use error::{QualityError, Result};
pub use gate::{AggregateQuality, OverrideOutcome, QualityGate};
pub use rules::{PhaseRuleSet, QualityRule};

//! Actors and the override audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use genflow_core::PhaseId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Viewer,
    Editor,
    QualityManager,
    Admin,
}

impl ActorRole {
    /// Only quality managers and admins may force a gate decision.
    pub fn can_override(&self) -> bool {
        matches!(self, Self::QualityManager | Self::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
        }
    }
}

/// One audit record; written for every override attempt, accepted or denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub actor_name: String,
    pub phase: PhaseId,
    pub assessment_id: Uuid,
    pub reason: String,
    pub accepted: bool,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_permissions() {
        assert!(!ActorRole::Viewer.can_override());
        assert!(!ActorRole::Editor.can_override());
        assert!(ActorRole::QualityManager.can_override());
        assert!(ActorRole::Admin.can_override());
    }
}

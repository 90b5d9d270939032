use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::domain::phase::PhaseId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    #[default]
    Checkpoint,
    Milestone,
    Branch,
    Merge,
    Rollback,
    Snapshot,
}

impl VersionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::Milestone => "milestone",
            Self::Branch => "branch",
            Self::Merge => "merge",
            Self::Rollback => "rollback",
            Self::Snapshot => "snapshot",
        }
    }

    /// Milestones survive retention sweeps regardless of age.
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Milestone)
    }
}

/// One immutable node in a job's version tree.
///
/// Everything except `active`, `tags`, and `metadata` is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionNode {
    pub id: Uuid,
    pub job_id: Uuid,
    pub phase: PhaseId,
    /// None only for a branch root.
    pub parent_id: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub branch: String,
    pub kind: VersionKind,
    pub payload: Document,
    pub quality_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub active: bool,
    pub metadata: Document,
}

impl VersionNode {
    pub fn new(
        job_id: Uuid,
        phase: PhaseId,
        branch: impl Into<String>,
        kind: VersionKind,
        payload: Document,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            phase,
            parent_id: None,
            children: Vec::new(),
            branch: branch.into(),
            kind,
            payload,
            quality_score: None,
            created_at,
            tags: Vec::new(),
            active: false,
            metadata: Document::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.quality_score = Some(score.clamp(0.0, 1.0));
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A named, independently advancing pointer into a job's version tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub job_id: Uuid,
    pub head: Option<Uuid>,
    /// Node this branch forked from; None for the default branch.
    pub base: Option<Uuid>,
    pub version_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(name: impl Into<String>, job_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            job_id,
            head: None,
            base: None,
            version_count: 0,
            created_at,
            updated_at: created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_root_and_parent() {
        let node = VersionNode::new(
            Uuid::new_v4(),
            PhaseId::Concept,
            "main",
            VersionKind::Checkpoint,
            Document::new(),
            Utc::now(),
        );
        assert!(node.is_root());

        let child = VersionNode::new(
            node.job_id,
            PhaseId::Outline,
            "main",
            VersionKind::Checkpoint,
            Document::new(),
            Utc::now(),
        )
        .with_parent(node.id);
        assert!(!child.is_root());
        assert_eq!(child.parent_id, Some(node.id));
    }

    #[test]
    fn test_score_clamped() {
        let node = VersionNode::new(
            Uuid::new_v4(),
            PhaseId::Draft,
            "main",
            VersionKind::Checkpoint,
            Document::new(),
            Utc::now(),
        )
        .with_score(2.5);
        assert_eq!(node.quality_score, Some(1.0));
    }

    #[test]
    fn test_protected_kinds() {
        assert!(VersionKind::Milestone.is_protected());
        assert!(!VersionKind::Checkpoint.is_protected());
        assert!(!VersionKind::Rollback.is_protected());
    }
}

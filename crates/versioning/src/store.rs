//! Per-job version trees with named branch pointers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use genflow_core::{Branch, Clock, Document, PhaseId, SystemClock, VersionKind, VersionNode};
use store::{KeyValueStore, TypedStore};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::diff::{compare_documents, VersionDiff};
use crate::error::{Result, VersioningError};

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone)]
pub struct VersionStoreConfig {
    /// Nodes older than this are eligible for the retention sweep.
    pub retention_ttl: Duration,
}

impl Default for VersionStoreConfig {
    fn default() -> Self {
        Self {
            retention_ttl: Duration::hours(24),
        }
    }
}

/// Metadata attached to a new checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CheckpointMeta {
    pub kind: VersionKind,
    pub quality_score: Option<f64>,
    pub tags: Vec<String>,
    pub metadata: Document,
}

impl CheckpointMeta {
    pub fn checkpoint() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub fn with_kind(mut self, kind: VersionKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Default)]
struct JobHistory {
    nodes: HashMap<Uuid, VersionNode>,
    branches: HashMap<String, Branch>,
}

/// Append-only branching version store, keyed per job.
///
/// All mutation happens under one per-store lock; trees are keyed by job id
/// so contention stays at job granularity for readers.
pub struct VersionStore {
    jobs: RwLock<HashMap<Uuid, JobHistory>>,
    clock: Arc<dyn Clock>,
    /// Checkpoints are mirrored here for crash recovery when configured.
    durable: Option<Arc<dyn KeyValueStore>>,
    config: VersionStoreConfig,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
            durable: None,
            config: VersionStoreConfig::default(),
        }
    }

    pub fn with_durable(mut self, durable: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn with_config(mut self, config: VersionStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a checkpoint as a child of the branch head and advance the head.
    ///
    /// The branch (and the job's history) is created on first use. The new
    /// node becomes the branch's active version.
    pub async fn checkpoint(
        &self,
        job_id: Uuid,
        branch_name: &str,
        phase: PhaseId,
        payload: Document,
        meta: CheckpointMeta,
    ) -> Result<VersionNode> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let history = jobs.entry(job_id).or_default();

        let branch = history
            .branches
            .entry(branch_name.to_string())
            .or_insert_with(|| Branch::new(branch_name, job_id, now));

        let mut node = VersionNode::new(job_id, phase, branch_name, meta.kind, payload, now);
        node.tags = meta.tags;
        node.metadata = meta.metadata;
        if let Some(score) = meta.quality_score {
            node = node.with_score(score);
        }
        if let Some(head_id) = branch.head {
            node = node.with_parent(head_id);
        }
        node.active = true;

        branch.head = Some(node.id);
        branch.version_count += 1;
        branch.updated_at = now;

        if let Some(parent_id) = node.parent_id {
            if let Some(parent) = history.nodes.get_mut(&parent_id) {
                parent.children.push(node.id);
                parent.active = false;
            }
        }

        history.nodes.insert(node.id, node.clone());
        drop(jobs);

        debug!(
            job_id = %job_id,
            version_id = %node.id,
            branch = %branch_name,
            phase = %phase,
            "Checkpoint appended"
        );

        self.mirror_checkpoint(&node).await;
        Ok(node)
    }

    /// Fork a new branch pointer at an existing version without copying data.
    pub async fn branch(&self, job_id: Uuid, name: &str, base_version: Uuid) -> Result<Branch> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let history = jobs
            .get_mut(&job_id)
            .ok_or(VersioningError::JobNotFound(job_id))?;

        if history.branches.contains_key(name) {
            return Err(VersioningError::BranchExists(name.to_string()));
        }
        if !history.nodes.contains_key(&base_version) {
            return Err(VersioningError::VersionNotFound(base_version));
        }

        let mut branch = Branch::new(name, job_id, now);
        branch.head = Some(base_version);
        branch.base = Some(base_version);
        history.branches.insert(name.to_string(), branch.clone());

        debug!(job_id = %job_id, branch = %name, base = %base_version, "Branch created");
        Ok(branch)
    }

    /// Repoint a branch head to an earlier version. History is never deleted.
    ///
    /// With `checkpoint_current` set, the current head payload is first
    /// re-appended as a rollback-safety node so the pre-restore state stays
    /// directly reachable from the branch.
    pub async fn restore(
        &self,
        job_id: Uuid,
        version_id: Uuid,
        target_branch: &str,
        checkpoint_current: bool,
    ) -> Result<VersionNode> {
        let current_head = {
            let jobs = self.jobs.read().await;
            let history = jobs
                .get(&job_id)
                .ok_or(VersioningError::JobNotFound(job_id))?;
            let node = history
                .nodes
                .get(&version_id)
                .ok_or(VersioningError::VersionNotFound(version_id))?;
            if node.job_id != job_id {
                return Err(VersioningError::JobMismatch {
                    version: version_id,
                    job: job_id,
                });
            }
            let branch = history
                .branches
                .get(target_branch)
                .ok_or_else(|| VersioningError::BranchNotFound(target_branch.to_string()))?;
            branch.head.and_then(|id| history.nodes.get(&id).cloned())
        };

        if checkpoint_current {
            if let Some(head_node) = current_head {
                self.checkpoint(
                    job_id,
                    target_branch,
                    head_node.phase,
                    head_node.payload.clone(),
                    CheckpointMeta::default().with_kind(VersionKind::Rollback),
                )
                .await?;
            }
        }

        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let history = jobs
            .get_mut(&job_id)
            .ok_or(VersioningError::JobNotFound(job_id))?;

        if let Some(branch) = history.branches.get_mut(target_branch) {
            if let Some(old_head) = branch.head {
                if let Some(node) = history.nodes.get_mut(&old_head) {
                    node.active = false;
                }
            }
            branch.head = Some(version_id);
            branch.updated_at = now;
        }
        let restored = history
            .nodes
            .get_mut(&version_id)
            .ok_or(VersioningError::VersionNotFound(version_id))?;
        restored.active = true;

        debug!(
            job_id = %job_id,
            version_id = %version_id,
            branch = %target_branch,
            "Branch restored to earlier version"
        );
        Ok(restored.clone())
    }

    /// Structural diff of two versions' payloads.
    pub async fn compare(&self, job_id: Uuid, a: Uuid, b: Uuid) -> Result<VersionDiff> {
        let jobs = self.jobs.read().await;
        let history = jobs
            .get(&job_id)
            .ok_or(VersioningError::JobNotFound(job_id))?;
        let node_a = history
            .nodes
            .get(&a)
            .ok_or(VersioningError::VersionNotFound(a))?;
        let node_b = history
            .nodes
            .get(&b)
            .ok_or(VersioningError::VersionNotFound(b))?;
        Ok(compare_documents(&node_a.payload, &node_b.payload))
    }

    pub async fn node(&self, job_id: Uuid, version_id: Uuid) -> Result<VersionNode> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .ok_or(VersioningError::JobNotFound(job_id))?
            .nodes
            .get(&version_id)
            .cloned()
            .ok_or(VersioningError::VersionNotFound(version_id))
    }

    pub async fn branch_info(&self, job_id: Uuid, name: &str) -> Result<Branch> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .ok_or(VersioningError::JobNotFound(job_id))?
            .branches
            .get(name)
            .cloned()
            .ok_or_else(|| VersioningError::BranchNotFound(name.to_string()))
    }

    /// Walk a branch from head to root, newest first.
    pub async fn history(&self, job_id: Uuid, branch_name: &str) -> Result<Vec<VersionNode>> {
        let jobs = self.jobs.read().await;
        let history = jobs
            .get(&job_id)
            .ok_or(VersioningError::JobNotFound(job_id))?;
        let branch = history
            .branches
            .get(branch_name)
            .ok_or_else(|| VersioningError::BranchNotFound(branch_name.to_string()))?;

        let mut chain = Vec::new();
        let mut cursor = branch.head;
        while let Some(id) = cursor {
            match history.nodes.get(&id) {
                Some(node) => {
                    chain.push(node.clone());
                    cursor = node.parent_id;
                }
                None => break,
            }
        }
        Ok(chain)
    }

    pub async fn tag(&self, job_id: Uuid, version_id: Uuid, tag: impl Into<String>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let node = jobs
            .get_mut(&job_id)
            .ok_or(VersioningError::JobNotFound(job_id))?
            .nodes
            .get_mut(&version_id)
            .ok_or(VersioningError::VersionNotFound(version_id))?;
        node.tags.push(tag.into());
        Ok(())
    }

    pub async fn node_count(&self, job_id: Uuid) -> usize {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id).map(|h| h.nodes.len()).unwrap_or(0)
    }

    /// Retention sweep: delete leaf nodes past the TTL that are neither
    /// active, protected (milestone), nor a branch head. Branches whose head
    /// is gone are removed; empty job histories are dropped.
    pub async fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - self.config.retention_ttl;
        let mut removed = 0;
        let mut jobs = self.jobs.write().await;

        for history in jobs.values_mut() {
            let heads: Vec<Uuid> = history.branches.values().filter_map(|b| b.head).collect();
            let expired: Vec<Uuid> = history
                .nodes
                .values()
                .filter(|node| {
                    node.created_at < cutoff
                        && !node.active
                        && !node.kind.is_protected()
                        && node.children.is_empty()
                        && !heads.contains(&node.id)
                })
                .map(|node| node.id)
                .collect();

            for id in expired {
                if let Some(node) = history.nodes.remove(&id) {
                    if let Some(parent_id) = node.parent_id {
                        if let Some(parent) = history.nodes.get_mut(&parent_id) {
                            parent.children.retain(|child| *child != id);
                        }
                    }
                    removed += 1;
                }
            }

            history
                .branches
                .retain(|_, branch| branch.head.map_or(false, |h| history.nodes.contains_key(&h)));
        }
        jobs.retain(|_, history| !history.nodes.is_empty());

        if removed > 0 {
            debug!(removed, "Version retention sweep completed");
        }
        removed
    }

    async fn mirror_checkpoint(&self, node: &VersionNode) {
        let Some(ref durable) = self.durable else {
            return;
        };
        let key = format!("checkpoint:{}:{}", node.job_id, node.id);
        if let Err(e) =
            TypedStore::set_json(durable.as_ref(), &key, node, Some(self.config.retention_ttl))
                .await
        {
            // Degraded mode: history survives in memory only.
            warn!(error = %e, version_id = %node.id, "Failed to persist checkpoint");
        }
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

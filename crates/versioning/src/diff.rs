//! Structural comparison of two payload documents.
//!
//! Both documents are flattened to dotted key paths and bucketed into
//! added/removed/modified/unchanged. Similarity weighs modified keys at half:
//! `(unchanged + 0.5 * modified) / total`.

use genflow_core::Document;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionDiff {
    /// Keys present in `b` but not `a`
    pub added: Vec<String>,
    /// Keys present in `a` but not `b`
    pub removed: Vec<String>,
    /// Keys present in both with differing values
    pub modified: Vec<String>,
    /// Keys present in both with equal values
    pub unchanged: Vec<String>,
    /// Symmetric similarity in [0, 1]; 1.0 for two empty documents
    pub similarity: f64,
}

impl VersionDiff {
    pub fn total_keys(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len() + self.unchanged.len()
    }
}

/// Compare two documents key-path by key-path.
pub fn compare_documents(a: &Document, b: &Document) -> VersionDiff {
    let flat_a = a.flatten();
    let flat_b = b.flatten();

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut unchanged = Vec::new();

    for (key, value_a) in &flat_a {
        match flat_b.get(key) {
            Some(value_b) if value_a == value_b => unchanged.push(key.clone()),
            Some(_) => modified.push(key.clone()),
            None => removed.push(key.clone()),
        }
    }
    for key in flat_b.keys() {
        if !flat_a.contains_key(key) {
            added.push(key.clone());
        }
    }

    let total = added.len() + removed.len() + modified.len() + unchanged.len();
    let similarity = if total == 0 {
        1.0
    } else {
        (unchanged.len() as f64 + 0.5 * modified.len() as f64) / total as f64
    };

    VersionDiff {
        added,
        removed,
        modified,
        unchanged,
        similarity,
    }
}

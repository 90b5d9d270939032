//! Append-only branching version history for generation jobs.
//!
//! Every accepted phase result becomes an immutable node in a per-job tree.
//! Branches are named pointers that advance as checkpoints are appended;
//! restore repoints a branch without deleting history.

pub mod diff;
pub mod error;
pub mod store;

pub use diff::{compare_documents, VersionDiff};
pub use error::{Result, VersioningError};
pub use store::{CheckpointMeta, VersionStore, VersionStoreConfig};

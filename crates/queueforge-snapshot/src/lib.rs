//! QueueForge snapshot engine
//!
//! Deterministic capture, diffing, and restore of queue, job, and worker
//! state for regression testing. A snapshot's collections are held in
//! canonical order and its checksum is stable: two captures over identical
//! external state produce byte-identical serializations.

pub mod config;
pub mod differ;
pub mod engine;
pub mod model;
pub mod storage;

pub use config::SnapshotConfig;
pub use differ::{
    Change, ChangeType, DiffOptions, DiffResult, DiffTotals, Differ, Impact, SemanticChange,
};
pub use engine::{AssertionOutcome, SnapshotEngine};
pub use model::{JobState, JobStatus, QueueState, Snapshot, WorkerState};
pub use storage::{SnapshotMeta, SnapshotStorage};

use thiserror::Error;

/// Snapshot engine errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("invalid configuration: {field}: {reason}")]
    Config {
        /// Offending configuration field
        field: &'static str,
        /// Why validation rejected it
        reason: String,
    },

    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("snapshot {id} is corrupt: {reason}")]
    Corrupt {
        /// Snapshot id
        id: String,
        /// Checksum or parse failure detail
        reason: String,
    },

    #[error("restore conflict for snapshot {id}: {reason}")]
    RestoreConflict {
        /// Snapshot id
        id: String,
        /// Why restore refused to proceed
        reason: String,
    },

    #[error("capture timed out")]
    CaptureTimeout,

    #[error(transparent)]
    Store(#[from] queueforge_core::CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

//! QueueForge core types
//!
//! Shared data model for the QueueForge control plane: job priorities, queue
//! statistics, and the provider traits the engines consume (live queue stats
//! and the Redis-like store surface used by the snapshot engine).

pub mod provider;
pub mod store;
pub mod types;

pub use provider::{StaticStatsProvider, StatsProvider};
pub use store::{MemoryStore, QueueStore};
pub use types::{Priority, QueueMetrics, QueueStats};

use thiserror::Error;

/// Errors shared across the control plane
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("stats provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

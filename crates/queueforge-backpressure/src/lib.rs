//! QueueForge backpressure controller
//!
//! Producer-side admission control driven by queue backlog: callers ask for a
//! throttle decision before enqueueing work, and the controller answers with
//! a delay (possibly zero), or sheds the job outright when a low-priority
//! queue is saturated. Per-queue circuit breakers guard against repeatedly
//! failing downstreams, and decisions are memoized in a TTL cache so the
//! stats provider is not consulted on every call.

pub mod cache;
pub mod circuit;
pub mod config;
pub mod controller;
pub mod metrics;

pub use cache::DecisionCache;
pub use circuit::{CircuitBreaker, CircuitBreakerManager, CircuitState};
pub use config::{BacklogWindow, BackpressureConfig, CircuitBreakerConfig, FallbackMode};
pub use controller::{
    BackpressureController, BatchJob, BatchOutcome, BatchResult, ThrottleDecision,
};
pub use metrics::BackpressureMetrics;

use thiserror::Error;

/// Backpressure controller errors
#[derive(Error, Debug)]
pub enum BackpressureError {
    #[error("invalid configuration: {field}: {reason}")]
    Config {
        /// Offending configuration field
        field: &'static str,
        /// Why validation rejected it
        reason: String,
    },

    #[error("controller is stopped")]
    Stopped,

    #[error("job shed on queue {queue}: {reason}")]
    JobShed {
        /// Queue the job was destined for
        queue: String,
        /// Decision reason that triggered the shed
        reason: String,
    },

    #[error("circuit breaker rejected queue {queue} (state: {state:?})")]
    CircuitOpen {
        /// Guarded queue
        queue: String,
        /// Breaker state at rejection time
        state: CircuitState,
    },

    #[error("job failed: {0}")]
    Job(#[from] anyhow::Error),

    #[error(transparent)]
    Core(#[from] queueforge_core::CoreError),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, BackpressureError>;

//! QueueForge chaos harness
//!
//! Scoped fault injection for the work queue: operators register injectors
//! (latency, error, panic, partial failure) scoped globally or to a worker,
//! queue, or tenant, and the job runtime consults the harness inline as
//! operations execute. Multi-stage scenarios orchestrate injectors and a
//! synthetic load generator under guardrails that abort the run when the
//! system degrades past configured limits.

pub mod api;
pub mod config;
pub mod engine;
pub mod fault;
pub mod load;
pub mod metrics;
pub mod scenario;

pub use api::{create_chaos_router, ChaosApiState};
pub use config::ChaosConfig;
pub use engine::{ChaosEngine, ChaosHarness};
pub use fault::{FaultParams, FaultScope, FaultSpec, FaultType};
pub use load::{LoadConfig, LoadGenerator, LoadPattern, LoadStats};
pub use metrics::ChaosMetrics;
pub use scenario::{
    Guardrails, Scenario, ScenarioMetrics, ScenarioRunner, ScenarioStatus, Stage, TimeSeriesPoint,
};

use thiserror::Error;

/// Chaos harness errors
#[derive(Error, Debug)]
pub enum ChaosError {
    #[error("invalid configuration: {field}: {reason}")]
    Config {
        /// Offending configuration field
        field: &'static str,
        /// Why validation rejected it
        reason: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("injected error from {injector_id}: {message}")]
    InjectedError {
        /// Injector that fired
        injector_id: String,
        /// Configured or default error text
        message: String,
    },

    #[error("injected panic from {injector_id}: {message}")]
    InjectedPanic {
        /// Injector that fired
        injector_id: String,
        /// Tag surfaced to the aborted operation
        message: String,
    },

    #[error("guardrail violated: {0}")]
    GuardrailViolation(String),

    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("harness is stopped")]
    Stopped,

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, ChaosError>;

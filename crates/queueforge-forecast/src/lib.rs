//! QueueForge forecasting and recommendation engine
//!
//! Online time-series models (EWMA and Holt-Winters) over queue metrics,
//! SLO burn tracking, and a recommendation engine that turns forecasts into
//! prioritized operator advisories: scale up before the projected peak,
//! schedule maintenance in the quietest window, investigate anomalies.

pub mod engine;
pub mod ewma;
pub mod holt_winters;
pub mod recommend;
pub mod slo;
pub mod storage;

pub use engine::{EngineConfig, ForecastConfig, ForecastEngine};
pub use ewma::{EwmaConfig, EwmaForecaster};
pub use holt_winters::{HoltWintersForecaster, HwConfig, SeasonalMethod};
pub use recommend::{
    CapacityEstimator, LinearCapacityEstimator, RecCategory, RecPriority, Recommendation,
    RecommendationConfig, RecommendationEngine,
};
pub use slo::{SloBudget, SloTracker};
pub use storage::{Aggregation, DataPoint, MetricStore, StorageConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tracked queue metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Pending jobs
    Backlog,
    /// Jobs completed per minute
    Throughput,
    /// Fraction of jobs failing
    ErrorRate,
    /// 99th percentile job latency (ms)
    LatencyP99,
    /// Registered workers
    Workers,
}

impl MetricKind {
    /// All tracked metrics
    pub const ALL: [Self; 5] =
        [Self::Backlog, Self::Throughput, Self::ErrorRate, Self::LatencyP99, Self::Workers];

    /// Stable string form used in series filenames and advisory text
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Throughput => "throughput",
            Self::ErrorRate => "error_rate",
            Self::LatencyP99 => "latency_p99",
            Self::Workers => "workers",
        }
    }

    /// Whether forecast lower bounds clamp at zero for this metric
    pub fn non_negative(&self) -> bool {
        // Every tracked metric is a count, rate, or duration
        true
    }
}

/// A forecast over a fixed horizon of 1-minute steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Point forecasts, one per minute ahead
    pub points: Vec<f64>,
    /// Upper confidence bounds, same length as `points`
    pub upper_bounds: Vec<f64>,
    /// Lower confidence bounds, same length as `points`
    pub lower_bounds: Vec<f64>,
    /// Confidence level the bounds were built for (0.0-1.0)
    pub confidence: f64,
    /// Which model produced the forecast
    pub model_used: String,
    /// Horizon length in minutes
    pub horizon_minutes: usize,
    /// Metric forecasted
    pub metric: MetricKind,
}

/// Forecasting model capability set
pub trait Forecaster: Send {
    /// Feed one observation
    fn update(&mut self, point: &DataPoint);

    /// Forecast `horizon` one-minute steps ahead
    fn forecast(&self, metric: MetricKind, horizon: usize) -> Result<ForecastResult>;

    /// Rolling accuracy estimate in [0, 1], when enough data exists
    fn accuracy(&self) -> Option<f64>;

    /// Model configuration for reports
    fn configuration(&self) -> serde_json::Value;

    /// Whether the model has seen enough data to forecast
    fn ready(&self) -> bool;
}

/// Forecasting engine errors
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("invalid configuration: {field}: {reason}")]
    Config {
        /// Offending configuration field
        field: &'static str,
        /// Why validation rejected it
        reason: String,
    },

    #[error("not enough data: have {have} observations, need {need}")]
    NotEnoughData {
        /// Observations seen so far
        have: usize,
        /// Observations required
        need: usize,
    },

    #[error("no series for metric {metric} on queue {queue}")]
    UnknownSeries {
        /// Metric requested
        metric: &'static str,
        /// Queue requested
        queue: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

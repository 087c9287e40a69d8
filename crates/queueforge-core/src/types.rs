//! Shared data model for queues, jobs, and workers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Latency-sensitive work, throttled last
    High,
    /// Default priority
    Medium,
    /// Bulk/background work, shed first under saturation
    Low,
}

impl Priority {
    /// All priorities in descending order
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    /// Stable string form used in metrics labels and decision reasons
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(crate::CoreError::InvalidInput(format!("unknown priority: {}", other))),
        }
    }
}

/// Point-in-time load snapshot for a single queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name
    pub queue_name: String,
    /// Number of pending jobs
    pub backlog_count: u64,
    /// Number of jobs currently being processed
    pub processing_count: u64,
    /// When the counts were observed
    pub last_updated: DateTime<Utc>,
}

impl QueueStats {
    /// Create stats observed now
    pub fn new(queue_name: impl Into<String>, backlog_count: u64, processing_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            backlog_count,
            processing_count,
            last_updated: Utc::now(),
        }
    }
}

/// Latest observation bundle consumed by the forecasting engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Pending jobs across the queue
    pub backlog: f64,
    /// Jobs completed per minute
    pub throughput: f64,
    /// Fraction of jobs failing (0.0-1.0)
    pub error_rate: f64,
    /// 99th percentile job latency in milliseconds
    pub latency_p99: f64,
    /// Workers currently registered
    pub active_workers: u64,
}

//! Advisory generation from forecasts and live metrics

use crate::slo::SloBudget;
use crate::{ForecastResult, MetricKind, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use parking_lot::Mutex;
use queueforge_core::QueueMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Advisory priority, ascending severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecPriority {
    /// Informational
    Info,
    /// Low priority
    Low,
    /// Medium priority
    Medium,
    /// High priority
    High,
    /// Act now
    Critical,
}

/// Advisory category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecCategory {
    /// Scale workers up or down
    CapacityScaling,
    /// Error budget management
    SloManagement,
    /// When to schedule maintenance
    MaintenanceScheduling,
    /// Live value breaks the forecast envelope
    Anomaly,
    /// Latency or throughput degradation
    Performance,
}

/// One operator advisory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Stable id used for cooldown deduplication
    pub id: String,
    /// Severity
    pub priority: RecPriority,
    /// Category
    pub category: RecCategory,
    /// Short title
    pub title: String,
    /// What was observed
    pub description: String,
    /// What to do about it
    pub action: String,
    /// When to act, when the advisory is time-bound
    pub timing: Option<DateTime<Utc>>,
    /// Confidence in the advisory (0.0-1.0)
    pub confidence: f64,
    /// When the advisory was generated
    pub created_at: DateTime<Utc>,
}

/// Worker-count estimation, pluggable per deployment
pub trait CapacityEstimator: Send + Sync {
    /// Workers needed to sustain `required_throughput`, given the current
    /// observed throughput and worker count
    fn workers_needed(
        &self,
        required_throughput: f64,
        current_throughput: f64,
        current_workers: u64,
    ) -> u64;
}

/// Assumes throughput scales linearly with workers
pub struct LinearCapacityEstimator;

impl CapacityEstimator for LinearCapacityEstimator {
    fn workers_needed(
        &self,
        required_throughput: f64,
        current_throughput: f64,
        current_workers: u64,
    ) -> u64 {
        let per_worker = current_throughput / current_workers.max(1) as f64;
        if per_worker <= 0.0 {
            return current_workers.max(1);
        }
        (required_throughput / per_worker).ceil().max(0.0) as u64
    }
}

/// Advisory engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// Forecast backlog peak that warrants a high-priority advisory
    pub high_backlog_threshold: f64,
    /// Forecast backlog peak that warrants a critical advisory
    pub critical_backlog_threshold: f64,
    /// Floor the scale-down advisory never goes below
    pub min_workers: u64,
    /// Ceiling for scale-up proposals
    pub max_workers: u64,
    /// Latency p99 above this is a performance advisory (ms)
    pub latency_threshold_ms: f64,
    /// Throughput below this is a performance advisory
    pub throughput_floor: f64,
    /// Window over which a peak backlog should be drained
    pub time_to_resolve: Duration,
    /// Same advisory id is suppressed within this window
    pub cooldown: Duration,
    /// Weekdays maintenance may be scheduled on
    pub maintenance_weekdays: Vec<Weekday>,
    /// Inclusive hour range (UTC) maintenance may start in
    pub maintenance_hours: (u32, u32),
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            high_backlog_threshold: 500.0,
            critical_backlog_threshold: 1_000.0,
            min_workers: 1,
            max_workers: 50,
            latency_threshold_ms: 1_000.0,
            throughput_floor: 1.0,
            time_to_resolve: Duration::from_secs(30 * 60),
            cooldown: Duration::from_secs(15 * 60),
            maintenance_weekdays: vec![Weekday::Sat, Weekday::Sun],
            maintenance_hours: (2, 5),
        }
    }
}

impl RecommendationConfig {
    /// Validate all fields
    pub fn validate(&self) -> Result<()> {
        if self.critical_backlog_threshold <= self.high_backlog_threshold {
            return Err(crate::ForecastError::Config {
                field: "recommendations.critical_backlog_threshold",
                reason: "must exceed high_backlog_threshold".to_string(),
            });
        }
        if self.max_workers < self.min_workers {
            return Err(crate::ForecastError::Config {
                field: "recommendations.max_workers",
                reason: "must be at least min_workers".to_string(),
            });
        }
        if self.maintenance_hours.0 > 23 || self.maintenance_hours.1 > 23 {
            return Err(crate::ForecastError::Config {
                field: "recommendations.maintenance_hours",
                reason: "hours must be 0-23".to_string(),
            });
        }
        if self.time_to_resolve.is_zero() {
            return Err(crate::ForecastError::Config {
                field: "recommendations.time_to_resolve",
                reason: "duration must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Turns forecasts, live metrics, and the SLO budget into deduplicated,
/// priority-sorted advisories
pub struct RecommendationEngine {
    config: RecommendationConfig,
    estimator: Box<dyn CapacityEstimator>,
    recent: Mutex<HashMap<String, Instant>>,
}

impl RecommendationEngine {
    /// Create an engine with the linear capacity estimator
    pub fn new(config: RecommendationConfig) -> Result<Self> {
        Self::with_estimator(config, Box::new(LinearCapacityEstimator))
    }

    /// Create an engine with a custom capacity estimator
    pub fn with_estimator(
        config: RecommendationConfig,
        estimator: Box<dyn CapacityEstimator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            estimator,
            recent: Mutex::new(HashMap::new()),
        })
    }

    /// Evaluate one cycle
    pub fn evaluate(
        &self,
        forecasts: &HashMap<MetricKind, ForecastResult>,
        latest: &QueueMetrics,
        slo: Option<&SloBudget>,
    ) -> Vec<Recommendation> {
        let mut advisories = Vec::new();

        if let Some(backlog) = forecasts.get(&MetricKind::Backlog) {
            advisories.extend(self.capacity(backlog, latest));
        }
        if let Some(budget) = slo {
            advisories.extend(self.slo(budget));
        }
        if let Some(backlog) = forecasts.get(&MetricKind::Backlog) {
            advisories.extend(self.maintenance(backlog));
        }
        advisories.extend(self.anomalies(forecasts, latest));
        advisories.extend(self.performance(latest));

        let mut kept = self.dedup(advisories);
        kept.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        kept
    }

    /// Peak and its index; later indices win ties so a flat forecast peaks
    /// at the end of the horizon
    fn peak(forecast: &ForecastResult) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, value) in forecast.points.iter().enumerate() {
            if best.is_none_or(|(_, best_value)| *value >= best_value) {
                best = Some((i, *value));
            }
        }
        best
    }

    fn capacity(&self, backlog: &ForecastResult, latest: &QueueMetrics) -> Vec<Recommendation> {
        let mut out = Vec::new();
        let Some((peak_index, peak)) = Self::peak(backlog) else {
            return out;
        };

        if peak > self.config.critical_backlog_threshold {
            let resolve_minutes = self.config.time_to_resolve.as_secs_f64() / 60.0;
            let required_throughput = peak / resolve_minutes;
            let needed = self.estimator.workers_needed(
                required_throughput,
                latest.throughput,
                latest.active_workers,
            );
            let capped = needed.min(self.config.max_workers);
            let delta = capped.saturating_sub(latest.active_workers);
            let peak_time = Utc::now() + ChronoDuration::minutes(peak_index as i64 + 1);

            out.push(Recommendation {
                id: "capacity-critical".to_string(),
                priority: RecPriority::Critical,
                category: RecCategory::CapacityScaling,
                title: "Backlog peak exceeds critical threshold".to_string(),
                description: format!(
                    "forecast backlog peaks at {:.0} (critical threshold {:.0}) in {} minutes",
                    peak,
                    self.config.critical_backlog_threshold,
                    peak_index + 1
                ),
                action: format!(
                    "scale workers up by {} (from {} to {})",
                    delta, latest.active_workers, capped
                ),
                timing: Some(peak_time - ChronoDuration::minutes(5)),
                confidence: backlog.confidence,
                created_at: Utc::now(),
            });
        } else if peak > self.config.high_backlog_threshold {
            out.push(Recommendation {
                id: "capacity-high".to_string(),
                priority: RecPriority::High,
                category: RecCategory::CapacityScaling,
                title: "Backlog peak approaching capacity".to_string(),
                description: format!(
                    "forecast backlog peaks at {:.0} (high threshold {:.0})",
                    peak, self.config.high_backlog_threshold
                ),
                action: "review worker capacity before the projected peak".to_string(),
                timing: None,
                confidence: backlog.confidence,
                created_at: Utc::now(),
            });
        }

        if latest.backlog < 100.0 && latest.active_workers > 2 * self.config.min_workers {
            let target = (latest.active_workers / 2).max(self.config.min_workers);
            out.push(Recommendation {
                id: "capacity-scale-down".to_string(),
                priority: RecPriority::Low,
                category: RecCategory::CapacityScaling,
                title: "Workers over-provisioned for current load".to_string(),
                description: format!(
                    "backlog {:.0} with {} workers",
                    latest.backlog, latest.active_workers
                ),
                action: format!("scale workers down toward {}", target),
                timing: None,
                confidence: 0.6,
                created_at: Utc::now(),
            });
        }

        out
    }

    fn slo(&self, budget: &SloBudget) -> Vec<Recommendation> {
        let mut out = Vec::new();
        if budget.weekly_burn_rate > 0.9 {
            out.push(Recommendation {
                id: "slo-critical".to_string(),
                priority: RecPriority::Critical,
                category: RecCategory::SloManagement,
                title: "Error budget nearly exhausted".to_string(),
                description: format!(
                    "weekly burn rate {:.2} against target {:.4}",
                    budget.weekly_burn_rate, budget.target
                ),
                action: "freeze risky changes and shed low-priority load".to_string(),
                timing: None,
                confidence: 0.9,
                created_at: Utc::now(),
            });
        } else if budget.weekly_burn_rate > 0.7 {
            let eta = budget
                .time_to_exhaustion
                .map(|d| format!("{:.0} minutes", d.as_secs_f64() / 60.0))
                .unwrap_or_else(|| "unknown".to_string());
            out.push(Recommendation {
                id: "slo-warning".to_string(),
                priority: RecPriority::High,
                category: RecCategory::SloManagement,
                title: "Error budget burning fast".to_string(),
                description: format!(
                    "weekly burn rate {:.2}, projected exhaustion in {}",
                    budget.weekly_burn_rate, eta
                ),
                action: "investigate the error-rate trend before the budget exhausts".to_string(),
                timing: None,
                confidence: 0.8,
                created_at: Utc::now(),
            });
        }
        out
    }

    fn maintenance(&self, backlog: &ForecastResult) -> Vec<Recommendation> {
        if backlog.points.is_empty() {
            return Vec::new();
        }
        let now = Utc::now();
        let mut best: Option<(DateTime<Utc>, f64)> = None;

        for day in 0..7_i64 {
            for hour in self.config.maintenance_hours.0..=self.config.maintenance_hours.1 {
                let Some(candidate) = (now + ChronoDuration::days(day))
                    .with_hour(hour)
                    .and_then(|t| t.with_minute(0))
                    .and_then(|t| t.with_second(0))
                else {
                    continue;
                };
                if candidate <= now {
                    continue;
                }
                if !self.config.maintenance_weekdays.contains(&candidate.weekday()) {
                    continue;
                }
                let minutes_ahead = (candidate - now).num_minutes().max(0) as usize;
                let index = minutes_ahead.min(backlog.points.len() - 1);
                let score = backlog.points[index];
                if best.is_none_or(|(_, best_score)| score < best_score) {
                    best = Some((candidate, score));
                }
            }
        }

        let Some((window, score)) = best else {
            return Vec::new();
        };
        vec![Recommendation {
            id: "maintenance-window".to_string(),
            priority: RecPriority::Info,
            category: RecCategory::MaintenanceScheduling,
            title: "Quiet maintenance window identified".to_string(),
            description: format!(
                "lowest forecast backlog ({:.0}) at {}",
                score,
                window.format("%a %H:%M UTC")
            ),
            action: "schedule maintenance in this window".to_string(),
            timing: Some(window),
            confidence: 0.5,
            created_at: Utc::now(),
        }]
    }

    fn anomalies(
        &self,
        forecasts: &HashMap<MetricKind, ForecastResult>,
        latest: &QueueMetrics,
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();
        for (kind, forecast) in forecasts {
            let Some(upper) = forecast.upper_bounds.first() else {
                continue;
            };
            if *upper <= 0.0 {
                continue;
            }
            let current = metric_value(latest, *kind);
            if current > 1.5 * upper {
                out.push(Recommendation {
                    id: format!("anomaly-{}", kind.as_str()),
                    priority: RecPriority::High,
                    category: RecCategory::Anomaly,
                    title: format!("{} outside forecast envelope", kind.as_str()),
                    description: format!(
                        "current {} is {:.2}, more than 1.5x the forecast upper bound {:.2}",
                        kind.as_str(),
                        current,
                        upper
                    ),
                    action: "investigate the divergence from expected behavior".to_string(),
                    timing: None,
                    confidence: forecast.confidence,
                    created_at: Utc::now(),
                });
            }
        }
        out
    }

    fn performance(&self, latest: &QueueMetrics) -> Vec<Recommendation> {
        let mut out = Vec::new();
        if latest.latency_p99 > self.config.latency_threshold_ms {
            out.push(Recommendation {
                id: "perf-latency".to_string(),
                priority: RecPriority::Medium,
                category: RecCategory::Performance,
                title: "Job latency above threshold".to_string(),
                description: format!(
                    "latency p99 {:.0}ms exceeds {:.0}ms",
                    latest.latency_p99, self.config.latency_threshold_ms
                ),
                action: "profile slow handlers or add workers".to_string(),
                timing: None,
                confidence: 0.7,
                created_at: Utc::now(),
            });
        }
        if latest.throughput < self.config.throughput_floor {
            out.push(Recommendation {
                id: "perf-throughput".to_string(),
                priority: RecPriority::Medium,
                category: RecCategory::Performance,
                title: "Throughput below floor".to_string(),
                description: format!(
                    "throughput {:.2}/min below floor {:.2}/min",
                    latest.throughput, self.config.throughput_floor
                ),
                action: "check for stalled workers or upstream starvation".to_string(),
                timing: None,
                confidence: 0.7,
                created_at: Utc::now(),
            });
        }
        out
    }

    fn dedup(&self, advisories: Vec<Recommendation>) -> Vec<Recommendation> {
        let now = Instant::now();
        let mut recent = self.recent.lock();
        recent.retain(|_, emitted| now.duration_since(*emitted) < self.config.cooldown);

        advisories
            .into_iter()
            .filter(|advisory| {
                if recent.contains_key(&advisory.id) {
                    debug!(id = %advisory.id, "advisory suppressed by cooldown");
                    false
                } else {
                    recent.insert(advisory.id.clone(), now);
                    true
                }
            })
            .collect()
    }
}

fn metric_value(metrics: &QueueMetrics, kind: MetricKind) -> f64 {
    match kind {
        MetricKind::Backlog => metrics.backlog,
        MetricKind::Throughput => metrics.throughput,
        MetricKind::ErrorRate => metrics.error_rate,
        MetricKind::LatencyP99 => metrics.latency_p99,
        MetricKind::Workers => metrics.active_workers as f64,
    }
}

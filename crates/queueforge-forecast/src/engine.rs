//! Forecast engine: storage, models, SLO tracking, and advisories

use crate::ewma::{EwmaConfig, EwmaForecaster};
use crate::holt_winters::{HoltWintersForecaster, HwConfig};
use crate::recommend::{Recommendation, RecommendationConfig, RecommendationEngine};
use crate::slo::SloTracker;
use crate::storage::{DataPoint, MetricStore, StorageConfig};
use crate::{ForecastError, Forecaster, ForecastResult, MetricKind, Result};
use parking_lot::Mutex;
use queueforge_core::QueueMetrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Engine-level settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cadence of the background maintenance task
    pub evaluation_interval: Duration,
    /// Forecast horizon used for recommendations, in minutes
    pub horizon_minutes: usize,
    /// Availability target for the SLO tracker
    pub slo_target: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(60),
            horizon_minutes: 30,
            slo_target: 0.999,
        }
    }
}

/// Full forecasting configuration
#[derive(Debug, Clone, Default)]
pub struct ForecastConfig {
    /// EWMA model settings
    pub ewma: EwmaConfig,
    /// Holt-Winters model settings
    pub holt_winters: HwConfig,
    /// Time-series storage settings
    pub storage: StorageConfig,
    /// Engine settings
    pub engine: EngineConfig,
    /// Advisory settings
    pub recommendations: RecommendationConfig,
}

impl ForecastConfig {
    /// Validate all subconfigs; called at engine construction
    pub fn validate(&self) -> Result<()> {
        self.ewma.validate()?;
        self.holt_winters.validate()?;
        self.recommendations.validate()?;
        if self.engine.horizon_minutes == 0 {
            return Err(ForecastError::Config {
                field: "engine.horizon_minutes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.engine.evaluation_interval.is_zero() {
            return Err(ForecastError::Config {
                field: "engine.evaluation_interval",
                reason: "duration must be positive".to_string(),
            });
        }
        if !(0.0 < self.engine.slo_target && self.engine.slo_target < 1.0) {
            return Err(ForecastError::Config {
                field: "engine.slo_target",
                reason: format!("{} out of range (0, 1)", self.engine.slo_target),
            });
        }
        Ok(())
    }
}

struct ModelPair {
    ewma: EwmaForecaster,
    holt_winters: HoltWintersForecaster,
}

/// Owns the metric store, per-(metric, queue) models, the SLO tracker, and
/// the recommendation engine
pub struct ForecastEngine {
    config: ForecastConfig,
    store: Arc<MetricStore>,
    models: Mutex<HashMap<(MetricKind, String), ModelPair>>,
    slo: Mutex<SloTracker>,
    recommender: RecommendationEngine,
    latest_advisories: Mutex<Vec<Recommendation>>,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ForecastEngine {
    /// Create an engine; configuration errors are fatal here
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        let recommender = RecommendationEngine::new(config.recommendations.clone())?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            store: Arc::new(MetricStore::new(config.storage.clone())),
            slo: Mutex::new(SloTracker::new(config.engine.slo_target)),
            recommender,
            latest_advisories: Mutex::new(Vec::new()),
            models: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    /// The underlying metric store
    pub fn store(&self) -> Arc<MetricStore> {
        self.store.clone()
    }

    /// Record one observation and update both models for its series
    pub fn ingest(&self, metric: MetricKind, queue: &str, value: f64) {
        let point = DataPoint::now(value);
        self.store.record(metric, queue, point);

        let mut models = self.models.lock();
        let pair = models.entry((metric, queue.to_string())).or_insert_with(|| ModelPair {
            // Config was validated at construction; per-series models
            // inherit it unchanged.
            ewma: EwmaForecaster::new(self.config.ewma.clone())
                .unwrap_or_else(|_| unreachable!("validated config")),
            holt_winters: HoltWintersForecaster::new(self.config.holt_winters.clone())
                .unwrap_or_else(|_| unreachable!("validated config")),
        });
        pair.ewma.update(&point);
        pair.holt_winters.update(&point);
    }

    /// Pull one backlog observation per queue from a stats provider
    ///
    /// Convenience for deployments that poll the same provider the
    /// backpressure controller uses; samples that fail to read are dropped.
    pub async fn ingest_from_provider(
        &self,
        provider: &dyn queueforge_core::StatsProvider,
    ) -> usize {
        let stats = match provider.all_queue_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "stats provider read failed, sample dropped");
                return 0;
            }
        };
        let count = stats.len();
        for (queue, s) in stats {
            self.ingest(MetricKind::Backlog, &queue, s.backlog_count as f64);
        }
        count
    }

    /// Forecast a series; Holt-Winters once it has two seasons, EWMA before
    pub fn forecast(&self, metric: MetricKind, queue: &str, horizon: usize) -> Result<ForecastResult> {
        let models = self.models.lock();
        let pair = models.get(&(metric, queue.to_string())).ok_or_else(|| {
            ForecastError::UnknownSeries {
                metric: metric.as_str(),
                queue: queue.to_string(),
            }
        })?;

        if pair.holt_winters.ready() {
            pair.holt_winters.forecast(metric, horizon)
        } else {
            pair.ewma.forecast(metric, horizon)
        }
    }

    /// Model accuracy for a series, when measurable
    pub fn accuracy(&self, metric: MetricKind, queue: &str) -> Option<f64> {
        let models = self.models.lock();
        let pair = models.get(&(metric, queue.to_string()))?;
        if pair.holt_winters.ready() {
            pair.holt_winters.accuracy()
        } else {
            pair.ewma.accuracy()
        }
    }

    /// Evaluate advisories for a queue from its forecasts and live metrics
    pub fn recommendations(&self, queue: &str, latest: &QueueMetrics) -> Vec<Recommendation> {
        let horizon = self.config.engine.horizon_minutes;
        let mut forecasts = HashMap::new();
        for metric in MetricKind::ALL {
            if let Ok(forecast) = self.forecast(metric, queue, horizon) {
                forecasts.insert(metric, forecast);
            }
        }

        let budget = {
            let mut slo = self.slo.lock();
            slo.record(latest.error_rate);
            forecasts.get(&MetricKind::ErrorRate).map(|f| slo.project_budget_burn(f))
        };

        let advisories = self.recommender.evaluate(&forecasts, latest, budget.as_ref());
        *self.latest_advisories.lock() = advisories.clone();
        debug!(queue, count = advisories.len(), "advisories evaluated");
        advisories
    }

    /// Advisories from the most recent evaluation
    pub fn latest_recommendations(&self) -> Vec<Recommendation> {
        self.latest_advisories.lock().clone()
    }

    /// Spawn the background maintenance task (hourly prune, periodic flush)
    pub fn start(&self) {
        let store = self.store.clone();
        let interval = self.config.engine.evaluation_interval;
        let flush_interval = self.config.storage.flush_interval;
        let persist = self.config.storage.persist_dir.is_some();
        let mut shutdown = self.shutdown_tx.subscribe();

        self.tasks.lock().push(tokio::spawn(async move {
            let mut last_prune = Instant::now();
            let mut last_flush = Instant::now();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }

                if last_prune.elapsed() >= Duration::from_secs(3_600) {
                    store.prune();
                    last_prune = Instant::now();
                }
                if persist && last_flush.elapsed() >= flush_interval {
                    if let Err(e) = store.flush().await {
                        warn!(error = %e, "metric store flush failed");
                    }
                    last_flush = Instant::now();
                }
            }
            // Final flush so a clean stop loses nothing
            if persist {
                if let Err(e) = store.flush().await {
                    warn!(error = %e, "final metric store flush failed");
                }
            }
        }));
        info!("forecast engine started");
    }

    /// Stop background tasks; idempotent, 10 second drain bound
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
                warn!("forecast task failed to drain within 10s");
            }
        }
        info!("forecast engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::{RecCategory, RecPriority};

    fn engine() -> ForecastEngine {
        ForecastEngine::new(ForecastConfig::default()).unwrap()
    }

    #[test]
    fn test_unknown_series_error() {
        let engine = engine();
        let err = engine.forecast(MetricKind::Backlog, "jobs", 4).unwrap_err();
        assert!(matches!(err, ForecastError::UnknownSeries { .. }));
    }

    #[test]
    fn test_ewma_until_holt_winters_ready() {
        let mut config = ForecastConfig::default();
        config.holt_winters.season_length = 4;
        let engine = ForecastEngine::new(config).unwrap();

        for i in 0..6 {
            engine.ingest(MetricKind::Backlog, "jobs", 100.0 + i as f64);
        }
        let forecast = engine.forecast(MetricKind::Backlog, "jobs", 4).unwrap();
        assert_eq!(forecast.model_used, "ewma");

        for i in 0..10 {
            engine.ingest(MetricKind::Backlog, "jobs", 100.0 + i as f64);
        }
        let forecast = engine.forecast(MetricKind::Backlog, "jobs", 4).unwrap();
        assert_eq!(forecast.model_used, "holt_winters");
    }

    #[test]
    fn test_scaling_advisory_end_to_end() {
        let engine = engine();
        // Ascending backlog 100..1800 over ten samples
        for i in 0..10 {
            engine.ingest(MetricKind::Backlog, "jobs", 100.0 + (1_700.0 / 9.0) * i as f64);
        }

        let latest = QueueMetrics {
            backlog: 800.0,
            throughput: 10.0,
            error_rate: 0.0,
            latency_p99: 100.0,
            active_workers: 2,
        };
        let advisories = engine.recommendations("jobs", &latest);
        let critical: Vec<&Recommendation> = advisories
            .iter()
            .filter(|r| r.priority == RecPriority::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].category, RecCategory::CapacityScaling);
        assert!(critical[0].action.contains("scale workers up"));

        assert_eq!(engine.latest_recommendations().len(), advisories.len());
    }

    #[tokio::test]
    async fn test_ingest_from_provider() {
        use queueforge_core::StaticStatsProvider;

        let provider = StaticStatsProvider::new();
        provider.set_counts("jobs", 120, 4);
        provider.set_counts("emails", 30, 1);

        let engine = engine();
        assert_eq!(engine.ingest_from_provider(&provider).await, 2);
        assert_eq!(engine.store().points(MetricKind::Backlog, "jobs").len(), 1);
        assert_eq!(engine.store().points(MetricKind::Backlog, "emails").len(), 1);

        provider.set_failing(true);
        assert_eq!(engine.ingest_from_provider(&provider).await, 0);
    }

    #[test]
    fn test_accuracy_exposed() {
        let engine = engine();
        for _ in 0..10 {
            engine.ingest(MetricKind::Throughput, "jobs", 50.0);
        }
        let accuracy = engine.accuracy(MetricKind::Throughput, "jobs").unwrap();
        assert!(accuracy > 0.9);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let engine = engine();
        engine.start();
        engine.stop().await;
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_persistence_flush_on_stop() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ForecastConfig::default();
        config.storage.persist_dir = Some(dir.path().to_path_buf());
        config.engine.evaluation_interval = Duration::from_millis(20);
        config.storage.flush_interval = Duration::from_millis(20);
        let engine = ForecastEngine::new(config).unwrap();

        engine.ingest(MetricKind::Backlog, "jobs", 5.0);
        engine.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        engine.stop().await;

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(!files.is_empty());
    }
}

//! Backpressure controller
//!
//! The decision pipeline: manual override / emergency bypass, decision
//! cache, per-queue circuit breaker, live backlog lookup (with a fallback
//! path when the stats provider is down), then the color-band computation
//! that maps backlog to a delay or a shed.

use crate::cache::DecisionCache;
use crate::circuit::{CircuitBreakerManager, CircuitState};
use crate::config::{BackpressureConfig, FallbackMode};
use crate::metrics::BackpressureMetrics;
use crate::{BackpressureError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use queueforge_core::{Priority, QueueStats, StatsProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Decision reasons, fixed vocabulary
pub mod reason {
    /// Backlog at or below the green threshold
    pub const BACKLOG_GREEN: &str = "backlog_green";
    /// Backlog inside the linear-ramp band
    pub const BACKLOG_YELLOW: &str = "backlog_yellow";
    /// Red band, high priority (half base delay)
    pub const BACKLOG_RED_HIGH: &str = "backlog_red_high_priority";
    /// Red band, medium priority (full base delay)
    pub const BACKLOG_RED_MEDIUM: &str = "backlog_red_medium_priority";
    /// Red band, low priority (1.5x base delay)
    pub const BACKLOG_RED_LOW: &str = "backlog_red_low_priority";
    /// Red band saturation shed of low-priority work
    pub const BACKLOG_RED_SHED_LOW: &str = "backlog_red_shed_low_priority";
    /// All-or-nothing operator bypass engaged
    pub const MANUAL_OVERRIDE: &str = "manual_override_enabled";
    /// Emergency pass-through engaged
    pub const EMERGENCY: &str = "emergency_pass_through";
    /// Provider down, conservative fixed delays applied
    pub const FALLBACK_CONSERVATIVE: &str = "provider_fallback_conservative";
    /// Provider down, everything passes untouched
    pub const FALLBACK_PASS_THROUGH: &str = "provider_fallback_pass_through";
    /// Queue breaker is open
    pub const CIRCUIT_OPEN: &str = "circuit_breaker_open";
    /// Queue breaker is half-open and the probe budget is spent
    pub const CIRCUIT_HALF_OPEN: &str = "circuit_breaker_half_open";
}

/// Outcome of the admission decision for one (priority, queue) request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleDecision {
    /// Priority the decision was made for
    pub priority: Priority,
    /// Target queue
    pub queue: String,
    /// Delay to apply before enqueueing; `None` means infinite (shed)
    pub delay: Option<Duration>,
    /// Whether the job should be dropped instead of delayed
    pub should_shed: bool,
    /// Reason from the fixed vocabulary in [`reason`]
    pub reason: String,
    /// When the decision was made
    pub decided_at: DateTime<Utc>,
    /// Backlog observed at decision time (0 when unknown)
    pub backlog: u64,
}

impl ThrottleDecision {
    fn pass(priority: Priority, queue: &str, reason: &str) -> Self {
        Self {
            priority,
            queue: queue.to_string(),
            delay: Some(Duration::ZERO),
            should_shed: false,
            reason: reason.to_string(),
            decided_at: Utc::now(),
            backlog: 0,
        }
    }

    fn shed(priority: Priority, queue: &str, reason: &str, backlog: u64) -> Self {
        Self {
            priority,
            queue: queue.to_string(),
            delay: None,
            should_shed: true,
            reason: reason.to_string(),
            decided_at: Utc::now(),
            backlog,
        }
    }

    /// Delay in milliseconds for metrics; sheds count as the red-band ceiling
    pub fn delay_ms(&self) -> f64 {
        match self.delay {
            Some(delay) => delay.as_secs_f64() * 1000.0,
            None => 10_000.0,
        }
    }
}

/// One job in a [`BackpressureController::process_batch`] call
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Target queue
    pub queue: String,
    /// Job priority
    pub priority: Priority,
    /// Opaque payload handed to the batch handler
    pub payload: serde_json::Value,
}

/// Per-job outcome of a batch run
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Target queue
    pub queue: String,
    /// Job priority
    pub priority: Priority,
    /// What happened
    pub result: BatchResult,
}

/// What happened to a single batch job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    /// Work ran and succeeded
    Completed,
    /// Job was shed; the batch continued
    Shed(String),
    /// Work ran and failed
    Failed(String),
}

/// Producer-side admission controller
pub struct BackpressureController {
    config: BackpressureConfig,
    provider: Arc<dyn StatsProvider>,
    breakers: Arc<CircuitBreakerManager>,
    cache: Arc<DecisionCache>,
    metrics: Option<Arc<BackpressureMetrics>>,
    latest_stats: Arc<RwLock<HashMap<String, QueueStats>>>,
    manual_override: AtomicBool,
    emergency_mode: AtomicBool,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl BackpressureController {
    /// Create a controller; configuration errors are fatal here
    pub fn new(config: BackpressureConfig, provider: Arc<dyn StatsProvider>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            breakers: Arc::new(CircuitBreakerManager::new(config.circuit_breaker.clone())),
            cache: Arc::new(DecisionCache::new(config.cache_ttl)),
            config,
            provider,
            metrics: None,
            latest_stats: Arc::new(RwLock::new(HashMap::new())),
            manual_override: AtomicBool::new(false),
            emergency_mode: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Register metrics on the given registry
    pub fn with_metrics(mut self, registry: &prometheus::Registry) -> Result<Self> {
        self.metrics = Some(Arc::new(BackpressureMetrics::new(registry)?));
        Ok(self)
    }

    /// Spawn the cache GC task and, when configured, the stats poll loop
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        let cache = self.cache.clone();
        let ttl = self.config.cache_ttl;
        let mut gc_shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(ttl) => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, "decision cache GC");
                        }
                    }
                    _ = gc_shutdown.changed() => break,
                }
            }
        }));

        if let Some(poll_interval) = self.config.poll_interval {
            let provider = self.provider.clone();
            let latest = self.latest_stats.clone();
            let metrics = self.metrics.clone();
            let jitter = self.config.poll_jitter;
            let timeout = self.config.provider_timeout;
            let mut poll_shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    let jitter_ms = if jitter.is_zero() {
                        0
                    } else {
                        use rand::Rng;
                        rand::rng().random_range(0..=jitter.as_millis() as u64)
                    };
                    let sleep = poll_interval + Duration::from_millis(jitter_ms);
                    tokio::select! {
                        _ = tokio::time::sleep(sleep) => {}
                        _ = poll_shutdown.changed() => break,
                    }

                    match tokio::time::timeout(timeout, provider.all_queue_stats()).await {
                        Ok(Ok(stats)) => {
                            if let Some(metrics) = &metrics {
                                for (queue, s) in &stats {
                                    metrics
                                        .queue_backlog
                                        .with_label_values(&[queue])
                                        .set(s.backlog_count as f64);
                                }
                            }
                            *latest.write() = stats;
                        }
                        Ok(Err(e)) => warn!(error = %e, "stats poll failed"),
                        Err(_) => warn!("stats poll timed out"),
                    }
                }
            }));
        }

        info!("backpressure controller started");
    }

    /// Cancel background tasks and refuse further operations
    ///
    /// Idempotent; waits up to 10 seconds for tasks to drain.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
                warn!("backpressure task failed to drain within 10s");
            }
        }
        info!("backpressure controller stopped");
    }

    /// Toggle the all-or-nothing bypass
    pub fn set_manual_override(&self, enabled: bool) {
        self.manual_override.store(enabled, Ordering::SeqCst);
        info!(enabled, "manual override toggled");
    }

    /// Toggle emergency pass-through
    pub fn set_emergency_mode(&self, enabled: bool) {
        self.emergency_mode.store(enabled, Ordering::SeqCst);
        warn!(enabled, "emergency mode toggled");
    }

    /// Operator access to a queue's breaker
    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    /// Compute (or recall) the throttle decision for (priority, queue)
    pub async fn suggest_throttle(
        &self,
        priority: Priority,
        queue: &str,
    ) -> Result<ThrottleDecision> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BackpressureError::Stopped);
        }

        if self.manual_override.load(Ordering::SeqCst) {
            return Ok(ThrottleDecision::pass(priority, queue, reason::MANUAL_OVERRIDE));
        }
        if self.emergency_mode.load(Ordering::SeqCst) {
            return Ok(ThrottleDecision::pass(priority, queue, reason::EMERGENCY));
        }

        if let Some(cached) = self.cache.get(queue, priority) {
            return Ok(cached);
        }

        let breaker = self.breakers.breaker(queue);
        if !breaker.should_allow() {
            let state = breaker.state();
            let why = match state {
                CircuitState::HalfOpen => reason::CIRCUIT_HALF_OPEN,
                _ => reason::CIRCUIT_OPEN,
            };
            let decision = ThrottleDecision::shed(priority, queue, why, 0);
            self.observe(&decision, Some(state));
            return Ok(decision);
        }

        let backlog = match self.backlog_for(queue).await {
            Ok(backlog) => backlog,
            Err(e) => {
                debug!(queue, error = %e, "stats provider failed, using fallback");
                let decision = self.fallback_decision(priority, queue);
                self.observe(&decision, None);
                return Ok(decision);
            }
        };

        let decision = self.compute_decision(priority, queue, backlog);
        self.cache.insert(decision.clone());
        self.observe(&decision, Some(breaker.state()));
        Ok(decision)
    }

    /// Apply the decision, run the work, and feed the outcome to the breaker
    ///
    /// The throttle sleep is cancelled if the controller stops. Shed jobs
    /// return [`BackpressureError::JobShed`] (or `CircuitOpen` when the
    /// breaker refused admission) without running the work.
    pub async fn run<F, Fut>(&self, priority: Priority, queue: &str, work: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let decision = self.suggest_throttle(priority, queue).await?;

        if decision.should_shed {
            if decision.reason.starts_with("circuit_breaker") {
                return Err(BackpressureError::CircuitOpen {
                    queue: queue.to_string(),
                    state: self.breakers.breaker(queue).state(),
                });
            }
            return Err(BackpressureError::JobShed {
                queue: queue.to_string(),
                reason: decision.reason,
            });
        }

        if let Some(delay) = decision.delay {
            if !delay.is_zero() {
                let mut shutdown = self.shutdown_tx.subscribe();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Err(BackpressureError::Stopped),
                }
            }
        }

        let breaker = self.breakers.breaker(queue);
        match work().await {
            Ok(()) => {
                breaker.record_success();
                Ok(())
            }
            Err(e) => {
                breaker.record_failure();
                if let Some(metrics) = &self.metrics {
                    metrics.update_circuit_state(queue, breaker.state());
                }
                Err(BackpressureError::Job(e))
            }
        }
    }

    /// Run a batch; shed jobs are skipped, failures recorded, nothing aborts
    pub async fn process_batch<F, Fut>(
        &self,
        jobs: Vec<BatchJob>,
        handler: F,
    ) -> Result<Vec<BatchOutcome>>
    where
        F: Fn(BatchJob) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BackpressureError::Stopped);
        }

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let queue = job.queue.clone();
            let priority = job.priority;
            let result = match self.run(priority, &queue, || handler(job)).await {
                Ok(()) => BatchResult::Completed,
                Err(BackpressureError::JobShed { reason, .. }) => BatchResult::Shed(reason),
                Err(BackpressureError::CircuitOpen { state, .. }) => {
                    BatchResult::Shed(format!("circuit_breaker_{:?}", state).to_lowercase())
                }
                Err(e) => BatchResult::Failed(e.to_string()),
            };
            outcomes.push(BatchOutcome {
                queue,
                priority,
                result,
            });
        }
        Ok(outcomes)
    }

    async fn backlog_for(&self, queue: &str) -> Result<u64> {
        if self.config.poll_interval.is_some() {
            if let Some(stats) = self.latest_stats.read().get(queue) {
                return Ok(stats.backlog_count);
            }
        }

        let stats = tokio::time::timeout(
            self.config.provider_timeout,
            self.provider.queue_stats(queue),
        )
        .await
        .map_err(|_| {
            queueforge_core::CoreError::ProviderUnavailable(format!(
                "stats call for {} timed out",
                queue
            ))
        })??;
        Ok(stats.backlog_count)
    }

    fn fallback_decision(&self, priority: Priority, queue: &str) -> ThrottleDecision {
        match self.config.fallback_mode {
            FallbackMode::ConservativeDelays => ThrottleDecision {
                priority,
                queue: queue.to_string(),
                delay: Some(BackpressureConfig::fallback_delay(priority)),
                should_shed: false,
                reason: reason::FALLBACK_CONSERVATIVE.to_string(),
                decided_at: Utc::now(),
                backlog: 0,
            },
            FallbackMode::PassThrough => {
                ThrottleDecision::pass(priority, queue, reason::FALLBACK_PASS_THROUGH)
            }
        }
    }

    fn compute_decision(&self, priority: Priority, queue: &str, backlog: u64) -> ThrottleDecision {
        let window = self.config.window(priority);
        let (green, yellow, red) = (window.green, window.yellow, window.red);

        let (delay, should_shed, why) = if backlog <= green {
            (Some(Duration::ZERO), false, reason::BACKLOG_GREEN)
        } else if backlog <= yellow {
            let fraction = (backlog - green) as f64 / (yellow - green) as f64;
            let ms = 10.0 + 490.0 * fraction;
            (Some(Duration::from_secs_f64(ms / 1000.0)), false, reason::BACKLOG_YELLOW)
        } else {
            let ratio = (((backlog - yellow) as f64) / ((red - yellow) as f64)).min(1.0);
            let base_ms = 500.0 + 4500.0 * ratio;
            match priority {
                Priority::High => (
                    Some(Duration::from_secs_f64(base_ms * 0.5 / 1000.0)),
                    false,
                    reason::BACKLOG_RED_HIGH,
                ),
                Priority::Medium => (
                    Some(Duration::from_secs_f64(base_ms / 1000.0)),
                    false,
                    reason::BACKLOG_RED_MEDIUM,
                ),
                Priority::Low => {
                    if ratio > 0.8 {
                        (None, true, reason::BACKLOG_RED_SHED_LOW)
                    } else {
                        (
                            Some(Duration::from_secs_f64(base_ms * 1.5 / 1000.0)),
                            false,
                            reason::BACKLOG_RED_LOW,
                        )
                    }
                }
            }
        };

        ThrottleDecision {
            priority,
            queue: queue.to_string(),
            delay,
            should_shed,
            reason: why.to_string(),
            decided_at: Utc::now(),
            backlog,
        }
    }

    fn observe(&self, decision: &ThrottleDecision, state: Option<CircuitState>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_decision(
            decision.priority.as_str(),
            &decision.reason,
            &decision.queue,
            decision.delay_ms(),
            decision.should_shed,
            decision.backlog,
        );
        if let Some(state) = state {
            metrics.update_circuit_state(&decision.queue, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queueforge_core::StaticStatsProvider;

    fn controller_with(backlogs: &[(&str, u64)]) -> (BackpressureController, StaticStatsProvider) {
        let provider = StaticStatsProvider::new();
        for (queue, backlog) in backlogs {
            provider.set_counts(queue, *backlog, 0);
        }
        let controller =
            BackpressureController::new(BackpressureConfig::default(), Arc::new(provider.clone()))
                .unwrap();
        (controller, provider)
    }

    #[tokio::test]
    async fn test_green_band_passes() {
        let (controller, _) = controller_with(&[("jobs", 100)]);
        let decision = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap();
        assert_eq!(decision.delay, Some(Duration::ZERO));
        assert!(!decision.should_shed);
        assert_eq!(decision.reason, reason::BACKLOG_GREEN);
        assert_eq!(decision.backlog, 100);
    }

    #[tokio::test]
    async fn test_yellow_band_linear_ramp() {
        let (controller, _) = controller_with(&[("jobs", 1_000)]);
        let decision = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap();
        // 10ms + 490ms * (1000-500)/(2000-500) = 10 + 490/3
        let expected_ms = 10.0 + 490.0 / 3.0;
        let actual_ms = decision.delay.unwrap().as_secs_f64() * 1000.0;
        assert!((actual_ms - expected_ms).abs() < 0.5, "got {}", actual_ms);
        assert_eq!(decision.reason, reason::BACKLOG_YELLOW);
    }

    #[tokio::test]
    async fn test_red_band_medium_keeps_base() {
        let (controller, _) = controller_with(&[("jobs", 3_000)]);
        let decision = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap();
        // base = 500 + 4500 * (3000-2000)/(5000-2000) = 2000ms
        let actual_ms = decision.delay.unwrap().as_secs_f64() * 1000.0;
        assert!((actual_ms - 2_000.0).abs() < 0.5, "got {}", actual_ms);
        assert_eq!(decision.reason, reason::BACKLOG_RED_MEDIUM);
    }

    #[tokio::test]
    async fn test_low_priority_sheds_past_saturation() {
        // ratio at backlog 900 is exactly 0.8: no shed
        let (controller, provider) = controller_with(&[("bulk", 900)]);
        let decision = controller.suggest_throttle(Priority::Low, "bulk").await.unwrap();
        assert!(!decision.should_shed);
        assert_eq!(decision.reason, reason::BACKLOG_RED_LOW);

        // ratio at backlog 950 is 0.9: shed
        provider.set_counts("bulk", 950, 0);
        let fresh = BackpressureController::new(
            BackpressureConfig::default(),
            Arc::new(provider.clone()),
        )
        .unwrap();
        let decision = fresh.suggest_throttle(Priority::Low, "bulk").await.unwrap();
        assert!(decision.should_shed);
        assert_eq!(decision.delay, None);
        assert_eq!(decision.reason, reason::BACKLOG_RED_SHED_LOW);
    }

    #[tokio::test]
    async fn test_shed_iff_infinite_delay() {
        for backlog in [0_u64, 400, 900, 950, 5_000] {
            let (controller, _) = controller_with(&[("bulk", backlog)]);
            for priority in Priority::ALL {
                let decision = controller.suggest_throttle(priority, "bulk").await.unwrap();
                assert_eq!(decision.should_shed, decision.delay.is_none());
                assert_eq!(decision.backlog, backlog);
            }
        }
    }

    #[tokio::test]
    async fn test_manual_override_bypasses_everything() {
        let (controller, _) = controller_with(&[("jobs", 900_000)]);
        controller.set_manual_override(true);
        let decision = controller.suggest_throttle(Priority::Low, "jobs").await.unwrap();
        assert_eq!(decision.delay, Some(Duration::ZERO));
        assert!(!decision.should_shed);
        assert_eq!(decision.reason, reason::MANUAL_OVERRIDE);
    }

    #[tokio::test]
    async fn test_decision_cache_hit() {
        let (controller, provider) = controller_with(&[("jobs", 100)]);
        let first = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap();

        // A changed backlog is not observed until the cache entry expires
        provider.set_counts("jobs", 4_000, 0);
        let second = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap();
        assert_eq!(second.reason, first.reason);
        assert_eq!(second.backlog, 100);
    }

    #[tokio::test]
    async fn test_fallback_conservative_delays() {
        let provider = StaticStatsProvider::new();
        provider.set_failing(true);
        let controller =
            BackpressureController::new(BackpressureConfig::default(), Arc::new(provider)).unwrap();

        let decision = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap();
        assert_eq!(decision.delay, Some(Duration::from_millis(500)));
        assert_eq!(decision.reason, reason::FALLBACK_CONSERVATIVE);

        let low = controller.suggest_throttle(Priority::Low, "jobs").await.unwrap();
        assert_eq!(low.delay, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_fallback_pass_through() {
        let provider = StaticStatsProvider::new();
        provider.set_failing(true);
        let mut config = BackpressureConfig::default();
        config.fallback_mode = FallbackMode::PassThrough;
        let controller = BackpressureController::new(config, Arc::new(provider)).unwrap();

        let decision = controller.suggest_throttle(Priority::Low, "jobs").await.unwrap();
        assert_eq!(decision.delay, Some(Duration::ZERO));
        assert_eq!(decision.reason, reason::FALLBACK_PASS_THROUGH);
    }

    #[tokio::test]
    async fn test_open_breaker_sheds() {
        let (controller, _) = controller_with(&[("jobs", 100)]);
        controller.breakers().breaker("jobs").force_open();

        let decision = controller.suggest_throttle(Priority::High, "jobs").await.unwrap();
        assert!(decision.should_shed);
        assert_eq!(decision.reason, reason::CIRCUIT_OPEN);
    }

    #[tokio::test]
    async fn test_run_feeds_breaker() {
        let (controller, _) = controller_with(&[("jobs", 100)]);

        let err = controller
            .run(Priority::Medium, "jobs", || async { Err(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, BackpressureError::Job(_)));
        assert_eq!(controller.breakers().breaker("jobs").failure_count(), 1);

        controller
            .run(Priority::Medium, "jobs", || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(controller.breakers().breaker("jobs").failure_count(), 0);
    }

    #[tokio::test]
    async fn test_run_returns_job_shed() {
        let (controller, _) = controller_with(&[("bulk", 990)]);
        let err = controller
            .run(Priority::Low, "bulk", || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, BackpressureError::JobShed { .. }));
    }

    #[tokio::test]
    async fn test_batch_continues_past_sheds() {
        let (controller, _) = controller_with(&[("bulk", 990), ("jobs", 100)]);

        let jobs = vec![
            BatchJob {
                queue: "bulk".to_string(),
                priority: Priority::Low,
                payload: serde_json::json!({"n": 1}),
            },
            BatchJob {
                queue: "jobs".to_string(),
                priority: Priority::Medium,
                payload: serde_json::json!({"n": 2}),
            },
        ];

        let outcomes = controller
            .process_batch(jobs, |_job| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].result, BatchResult::Shed(_)));
        assert_eq!(outcomes[1].result, BatchResult::Completed);
    }

    #[tokio::test]
    async fn test_stopped_controller_refuses() {
        let (controller, _) = controller_with(&[("jobs", 100)]);
        controller.start();
        controller.stop().await;
        controller.stop().await; // idempotent

        let err = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap_err();
        assert!(matches!(err, BackpressureError::Stopped));
    }
}

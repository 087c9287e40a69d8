//! Scenario orchestration with guardrails
//!
//! A scenario runs its stages sequentially. Each stage registers its own
//! injectors, optionally drives the synthetic load generator, and is
//! monitored once per tick: a metrics point is collected and guardrails are
//! evaluated. Stage injectors are removed at stage end, and a cooldown
//! window after the final stage measures how quickly the error rate returns
//! to baseline.

use crate::engine::ChaosEngine;
use crate::fault::{FaultScope, FaultSpec, FaultType};
use crate::load::{LoadConfig, LoadGenerator};
use crate::{ChaosError, Result};
use chrono::{DateTime, Utc};
use queueforge_core::StatsProvider;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Runtime invariants that abort a scenario on violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guardrails {
    /// Abort when the per-tick error rate exceeds this
    pub max_error_rate: f64,
    /// Abort when observed latency exceeds this (milliseconds)
    pub max_latency_p99: f64,
    /// Abort when the monitored backlog exceeds this
    pub max_backlog_size: u64,
    /// Require an explicit confirmation flag to run
    pub require_confirm: bool,
    /// Scenario is allowed to target production
    pub allow_production: bool,
    /// Abort as soon as an injected panic fires
    pub auto_abort_on_panic: bool,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_error_rate: 0.5,
            max_latency_p99: 10_000.0,
            max_backlog_size: 100_000,
            require_confirm: false,
            allow_production: false,
            auto_abort_on_panic: true,
        }
    }
}

/// Scenario lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Registered, not yet run
    Pending,
    /// Stages executing
    Running,
    /// Ran to completion and recovered
    Completed,
    /// Ran to completion but did not recover
    Failed,
    /// Stopped early (operator, guardrail, or shutdown)
    Aborted,
}

/// One stage of a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name for reports
    pub name: String,
    /// How long the stage runs
    pub duration: Duration,
    /// Injectors registered for the stage and removed at its end
    pub faults: Vec<FaultSpec>,
    /// Optional synthetic load driven during the stage
    pub load: Option<LoadConfig>,
}

impl Stage {
    /// Create a stage with no faults or load
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
            faults: Vec::new(),
            load: None,
        }
    }

    /// Add an injector to the stage
    pub fn with_fault(mut self, fault: FaultSpec) -> Self {
        self.faults.push(fault);
        self
    }

    /// Drive synthetic load during the stage
    pub fn with_load(mut self, load: LoadConfig) -> Self {
        self.load = Some(load);
        self
    }
}

/// One 1 Hz sample of the scenario's observable state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Named metric values at this instant
    pub metrics: HashMap<String, f64>,
    /// Injector ids active at this instant
    pub active_faults: Vec<String>,
}

/// Accumulated scenario measurements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Collected samples
    pub points: Vec<TimeSeriesPoint>,
    /// Error rate the run is expected to return to
    pub baseline_error_rate: f64,
    /// Error rate at the last sample
    pub final_error_rate: f64,
    /// Time from last active fault to recovery, when measurable
    pub recovery_time: Option<Duration>,
}

/// A multi-stage chaos scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional description for reports
    pub description: Option<String>,
    /// Stages executed in order
    pub stages: Vec<Stage>,
    /// Abort conditions monitored during the run
    pub guardrails: Guardrails,
    /// Post-stage window in which recovery is measured
    pub cooldown: Duration,
    /// Lifecycle state
    pub status: ScenarioStatus,
    /// Collected measurements
    pub metrics: ScenarioMetrics,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the run ended
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure or abort explanation
    pub error: Option<String>,
}

impl Scenario {
    /// Create an empty pending scenario
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            stages: Vec::new(),
            guardrails: Guardrails::default(),
            cooldown: Duration::from_secs(3),
            status: ScenarioStatus::Pending,
            metrics: ScenarioMetrics::default(),
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replace the guardrails
    pub fn with_guardrails(mut self, guardrails: Guardrails) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Set the recovery-measurement window
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Total stage time (cooldown excluded)
    pub fn duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }
}

/// Executes scenarios against a [`ChaosEngine`]
pub struct ScenarioRunner {
    engine: Arc<ChaosEngine>,
    scenarios: tokio::sync::RwLock<HashMap<String, Scenario>>,
    aborts: parking_lot::Mutex<HashMap<String, watch::Sender<bool>>>,
    stats_provider: Option<Arc<dyn StatsProvider>>,
    monitored_queue: Option<String>,
    tick_interval: Duration,
}

impl ScenarioRunner {
    /// Create a runner over an engine
    pub fn new(engine: Arc<ChaosEngine>) -> Self {
        Self {
            engine,
            scenarios: tokio::sync::RwLock::new(HashMap::new()),
            aborts: parking_lot::Mutex::new(HashMap::new()),
            stats_provider: None,
            monitored_queue: None,
            tick_interval: Duration::from_secs(1),
        }
    }

    /// Monitor a queue's backlog through a stats provider during runs
    pub fn with_stats_provider(
        mut self,
        provider: Arc<dyn StatsProvider>,
        queue: impl Into<String>,
    ) -> Self {
        self.stats_provider = Some(provider);
        self.monitored_queue = Some(queue.into());
        self
    }

    /// Override the 1 Hz monitor cadence (used by tests)
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Validate and register a scenario
    pub async fn register(&self, scenario: Scenario) -> Result<String> {
        if scenario.stages.is_empty() {
            return Err(ChaosError::Validation("scenario has no stages".to_string()));
        }
        if scenario.guardrails.allow_production && !self.engine.config().allow_production {
            return Err(ChaosError::Validation(
                "production scenarios are not allowed by this harness".to_string(),
            ));
        }
        let id = scenario.id.clone();
        self.scenarios.write().await.insert(id.clone(), scenario);
        Ok(id)
    }

    /// Look up a scenario (live status and metrics included)
    pub async fn get(&self, id: &str) -> Result<Scenario> {
        self.scenarios
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ChaosError::NotFound(format!("scenario {}", id)))
    }

    /// All registered scenarios
    pub async fn list(&self) -> Vec<Scenario> {
        self.scenarios.read().await.values().cloned().collect()
    }

    /// Remove a scenario that is not running
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut scenarios = self.scenarios.write().await;
        match scenarios.get(id) {
            None => return Err(ChaosError::NotFound(format!("scenario {}", id))),
            Some(s) if s.status == ScenarioStatus::Running => {
                return Err(ChaosError::Scenario("cannot remove a running scenario".to_string()));
            }
            Some(_) => {
                scenarios.remove(id);
            }
        }
        Ok(())
    }

    /// Run a scenario to completion; see [`Self::run_confirmed`]
    pub async fn run(&self, id: &str) -> Result<ScenarioStatus> {
        self.run_confirmed(id, false).await
    }

    /// Run a scenario, asserting operator confirmation when required
    pub async fn run_confirmed(&self, id: &str, confirmed: bool) -> Result<ScenarioStatus> {
        let (guardrails, stages, cooldown) = {
            let mut scenarios = self.scenarios.write().await;
            let scenario = scenarios
                .get_mut(id)
                .ok_or_else(|| ChaosError::NotFound(format!("scenario {}", id)))?;
            if scenario.status != ScenarioStatus::Pending {
                return Err(ChaosError::Scenario(format!(
                    "scenario {} already ran (status {:?})",
                    id, scenario.status
                )));
            }
            if scenario.guardrails.require_confirm && !confirmed {
                return Err(ChaosError::Validation(
                    "scenario requires explicit confirmation".to_string(),
                ));
            }
            scenario.status = ScenarioStatus::Running;
            scenario.started_at = Some(Utc::now());
            (scenario.guardrails.clone(), scenario.stages.clone(), scenario.cooldown)
        };

        let (abort_tx, abort_rx) = watch::channel(false);
        self.aborts.lock().insert(id.to_string(), abort_tx);
        info!(scenario = id, "scenario started");

        let outcome = self.execute(id, &guardrails, &stages, cooldown, abort_rx).await;

        self.aborts.lock().remove(id);
        let status = {
            let mut scenarios = self.scenarios.write().await;
            let scenario = scenarios
                .get_mut(id)
                .ok_or_else(|| ChaosError::NotFound(format!("scenario {}", id)))?;
            scenario.ended_at = Some(Utc::now());
            match &outcome {
                RunOutcome::Finished => {
                    let recovered = scenario.metrics.recovery_time.is_some();
                    let healthy = scenario.metrics.final_error_rate <= 0.10;
                    scenario.status = if recovered && healthy {
                        ScenarioStatus::Completed
                    } else {
                        ScenarioStatus::Failed
                    };
                    if scenario.status == ScenarioStatus::Failed {
                        scenario.error = Some(format!(
                            "no recovery within cooldown (final error rate {:.3})",
                            scenario.metrics.final_error_rate
                        ));
                    }
                }
                RunOutcome::Aborted(why) => {
                    scenario.status = ScenarioStatus::Aborted;
                    scenario.error = Some(why.clone());
                }
            }
            info!(scenario = id, status = ?scenario.status, "scenario ended");
            scenario.status
        };
        if let Some(metrics) = self.engine.metrics() {
            let label = match status {
                ScenarioStatus::Completed => "completed",
                ScenarioStatus::Failed => "failed",
                ScenarioStatus::Aborted => "aborted",
                ScenarioStatus::Pending | ScenarioStatus::Running => "running",
            };
            metrics.record_scenario(label);
        }
        Ok(status)
    }

    /// Abort a running scenario
    pub async fn abort(&self, id: &str) -> Result<()> {
        let sent = {
            let aborts = self.aborts.lock();
            aborts.get(id).map(|tx| tx.send(true).is_ok())
        };
        match sent {
            Some(true) => Ok(()),
            _ => {
                // Not currently running; mark a pending scenario aborted
                let mut scenarios = self.scenarios.write().await;
                let scenario = scenarios
                    .get_mut(id)
                    .ok_or_else(|| ChaosError::NotFound(format!("scenario {}", id)))?;
                if scenario.status == ScenarioStatus::Pending {
                    scenario.status = ScenarioStatus::Aborted;
                    scenario.error = Some("aborted before run".to_string());
                }
                Ok(())
            }
        }
    }

    /// Abort every running scenario
    pub async fn abort_all(&self) {
        let ids: Vec<String> = self.aborts.lock().keys().cloned().collect();
        for id in ids {
            let _ = self.abort(&id).await;
        }
        // Mark anything still pending as aborted
        let mut scenarios = self.scenarios.write().await;
        for scenario in scenarios.values_mut() {
            if scenario.status == ScenarioStatus::Pending {
                scenario.status = ScenarioStatus::Aborted;
                scenario.error = Some("harness stopped".to_string());
            }
        }
    }

    async fn execute(
        &self,
        id: &str,
        guardrails: &Guardrails,
        stages: &[Stage],
        cooldown: Duration,
        mut abort_rx: watch::Receiver<bool>,
    ) -> RunOutcome {
        let baseline = stages
            .first()
            .and_then(|s| s.load.as_ref())
            .map_or(0.0, |l| 1.0 - l.success_probability);
        {
            let mut scenarios = self.scenarios.write().await;
            if let Some(s) = scenarios.get_mut(id) {
                s.metrics.baseline_error_rate = baseline;
            }
        }

        let mut last_fault_cleared: Option<DateTime<Utc>> = None;

        for stage in stages {
            let mut stage_fault_ids = Vec::with_capacity(stage.faults.len());
            for fault in &stage.faults {
                match self.engine.add_fault(fault.clone()) {
                    Ok(stored) => stage_fault_ids.push(stored.id),
                    Err(e) => {
                        self.clear_stage(&stage_fault_ids);
                        return RunOutcome::Aborted(format!("stage fault rejected: {}", e));
                    }
                }
            }

            let generator = stage.load.as_ref().map(|l| LoadGenerator::new(l.clone()));
            let ticks = self.tick_count(stage.duration);
            let started = std::time::Instant::now();

            for _ in 0..ticks {
                tokio::select! {
                    _ = tokio::time::sleep(self.tick_interval) => {}
                    _ = abort_rx.changed() => {
                        self.clear_stage(&stage_fault_ids);
                        return RunOutcome::Aborted("aborted by operator".to_string());
                    }
                }

                let sample = self.sample(generator.as_ref(), started.elapsed()).await;
                self.push_point(id, &sample).await;

                if let Some(violation) = self.check_guardrails(guardrails, &sample) {
                    warn!(scenario = id, violation = %violation, "guardrail violated");
                    self.clear_stage(&stage_fault_ids);
                    return RunOutcome::Aborted(violation);
                }
            }

            self.clear_stage(&stage_fault_ids);
            if !stage_fault_ids.is_empty() {
                last_fault_cleared = Some(Utc::now());
            }
        }

        // Recovery window: keep sampling with the last stage's load shape
        // until the error rate returns to within 10% of baseline.
        let generator = stages
            .last()
            .and_then(|s| s.load.as_ref())
            .map(|l| LoadGenerator::new(l.clone()));
        let tolerance = 0.1 * baseline.max(0.0) + 0.05;
        let ticks = self.tick_count(cooldown);
        let started = std::time::Instant::now();
        let mut recovered_at = None;
        let mut final_rate = baseline;

        for _ in 0..ticks {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = abort_rx.changed() => {
                    return RunOutcome::Aborted("aborted by operator".to_string());
                }
            }
            let sample = self.sample(generator.as_ref(), started.elapsed()).await;
            final_rate = sample.error_rate;
            self.push_point(id, &sample).await;
            if (sample.error_rate - baseline).abs() <= tolerance {
                recovered_at = Some(sample.at);
                break;
            }
        }

        {
            let mut scenarios = self.scenarios.write().await;
            if let Some(s) = scenarios.get_mut(id) {
                s.metrics.final_error_rate = final_rate;
                s.metrics.recovery_time = match (recovered_at, last_fault_cleared) {
                    (Some(recovered), Some(cleared)) => {
                        (recovered - cleared).to_std().ok().or(Some(Duration::ZERO))
                    }
                    (Some(_), None) => Some(Duration::ZERO),
                    _ => None,
                };
            }
        }

        RunOutcome::Finished
    }

    fn tick_count(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() / self.tick_interval.as_secs_f64()).ceil().max(1.0) as u64
    }

    fn clear_stage(&self, fault_ids: &[String]) {
        for fault_id in fault_ids {
            let _ = self.engine.remove_fault(fault_id);
        }
    }

    async fn sample(&self, generator: Option<&LoadGenerator>, elapsed: Duration) -> Sample {
        let (attempted, mut failed, mut panic_fired) = match generator {
            Some(generator) => {
                let rate = generator.rate_at(elapsed).max(0.0).round() as u64;
                let mut failed = 0;
                let mut panic_fired = false;
                let mut rng = rand::rng();
                for _ in 0..rate {
                    let injected_error = self
                        .engine
                        .should_inject(FaultScope::Global, "", FaultType::Error)
                        .is_some();
                    let injected_panic = self
                        .engine
                        .should_inject(FaultScope::Global, "", FaultType::Panic)
                        .is_some();
                    panic_fired |= injected_panic;
                    let base_failed =
                        rng.random::<f64>() >= generator.config().success_probability;
                    if injected_error || injected_panic || base_failed {
                        failed += 1;
                    }
                }
                record_tick(generator, rate, failed);
                (rate, failed, panic_fired)
            }
            None => (0, 0, false),
        };

        // Without load there is still a chance a panic injector is active;
        // probe once so auto-abort-on-panic works for load-less stages.
        if generator.is_none() {
            if self
                .engine
                .should_inject(FaultScope::Global, "", FaultType::Panic)
                .is_some()
            {
                panic_fired = true;
                failed += 1;
            }
        }

        let error_rate = if attempted == 0 {
            if failed > 0 {
                1.0
            } else {
                0.0
            }
        } else {
            failed as f64 / attempted as f64
        };

        let backlog = match (&self.stats_provider, &self.monitored_queue) {
            (Some(provider), Some(queue)) => {
                provider.queue_stats(queue).await.ok().map(|s| s.backlog_count)
            }
            _ => None,
        };

        let latency_p99 = self
            .engine
            .list_faults()
            .iter()
            .filter(|f| f.enabled && matches!(f.fault_type, FaultType::Latency))
            .filter_map(|f| f.params.latency_ms)
            .max()
            .unwrap_or(0) as f64;

        let active_faults: Vec<String> =
            self.engine.list_faults().iter().map(|f| f.id.clone()).collect();

        Sample {
            at: Utc::now(),
            attempted,
            error_rate,
            panic_fired,
            backlog,
            latency_p99,
            active_faults,
        }
    }

    async fn push_point(&self, id: &str, sample: &Sample) {
        let mut metrics = HashMap::new();
        metrics.insert("error_rate".to_string(), sample.error_rate);
        metrics.insert("requests".to_string(), sample.attempted as f64);
        metrics.insert("latency_p99_ms".to_string(), sample.latency_p99);
        if let Some(backlog) = sample.backlog {
            metrics.insert("backlog".to_string(), backlog as f64);
        }
        let point = TimeSeriesPoint {
            timestamp: sample.at,
            metrics,
            active_faults: sample.active_faults.clone(),
        };

        let mut scenarios = self.scenarios.write().await;
        if let Some(scenario) = scenarios.get_mut(id) {
            scenario.metrics.points.push(point);
        }
    }

    fn check_guardrails(&self, guardrails: &Guardrails, sample: &Sample) -> Option<String> {
        if sample.panic_fired && guardrails.auto_abort_on_panic {
            return Some("injected panic with auto_abort_on_panic".to_string());
        }
        if sample.attempted > 0 && sample.error_rate > guardrails.max_error_rate {
            return Some(format!(
                "error rate {:.3} exceeded max {:.3}",
                sample.error_rate, guardrails.max_error_rate
            ));
        }
        if sample.latency_p99 > guardrails.max_latency_p99 {
            return Some(format!(
                "latency p99 {}ms exceeded max {}ms",
                sample.latency_p99, guardrails.max_latency_p99
            ));
        }
        if let Some(backlog) = sample.backlog {
            if backlog > guardrails.max_backlog_size {
                return Some(format!(
                    "backlog {} exceeded max {}",
                    backlog, guardrails.max_backlog_size
                ));
            }
        }
        None
    }
}

fn record_tick(generator: &LoadGenerator, attempted: u64, failed: u64) {
    use std::sync::atomic::Ordering;
    let stats = generator.stats();
    stats.total_requests.fetch_add(attempted, Ordering::Relaxed);
    stats.successful_requests.fetch_add(attempted - failed, Ordering::Relaxed);
    stats.failed_requests.fetch_add(failed, Ordering::Relaxed);
}

enum RunOutcome {
    Finished,
    Aborted(String),
}

struct Sample {
    at: DateTime<Utc>,
    attempted: u64,
    error_rate: f64,
    panic_fired: bool,
    backlog: Option<u64>,
    latency_p99: f64,
    active_faults: Vec<String>,
}

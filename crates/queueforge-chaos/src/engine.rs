//! Injector registry and inline injection primitives

use crate::config::ChaosConfig;
use crate::fault::{FaultScope, FaultSpec, FaultType};
use crate::metrics::ChaosMetrics;
use crate::scenario::ScenarioRunner;
use crate::{ChaosError, Result};
use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Injector registry consulted inline by the job runtime
///
/// All mutations and reads go through a single read-write lock, so the
/// expiry sweep and user mutations cannot interleave.
pub struct ChaosEngine {
    config: ChaosConfig,
    injectors: RwLock<HashMap<String, FaultSpec>>,
    metrics: RwLock<Option<Arc<ChaosMetrics>>>,
    stopped: AtomicBool,
}

impl ChaosEngine {
    /// Create an engine; configuration errors are fatal here
    pub fn new(config: ChaosConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            injectors: RwLock::new(HashMap::new()),
            metrics: RwLock::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Register metrics on the given registry
    pub fn set_metrics(&self, metrics: Arc<ChaosMetrics>) {
        *self.metrics.write() = Some(metrics);
    }

    /// Engine configuration
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Validate and register an injector; returns the stored spec
    pub fn add_fault(&self, mut spec: FaultSpec) -> Result<FaultSpec> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ChaosError::Stopped);
        }
        spec.validate(self.config.default_ttl, self.config.max_ttl)?;
        let stored = spec.clone();
        self.injectors.write().insert(spec.id.clone(), spec);
        self.update_active_gauge();
        info!(
            id = %stored.id,
            fault_type = stored.fault_type.as_str(),
            scope = ?stored.scope,
            "fault injector registered"
        );
        Ok(stored)
    }

    /// Look up an injector
    pub fn get_fault(&self, id: &str) -> Result<FaultSpec> {
        self.injectors
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ChaosError::NotFound(format!("injector {}", id)))
    }

    /// Remove an injector
    pub fn remove_fault(&self, id: &str) -> Result<()> {
        let removed = self.injectors.write().remove(id);
        self.update_active_gauge();
        match removed {
            Some(_) => {
                debug!(id, "fault injector removed");
                Ok(())
            }
            None => Err(ChaosError::NotFound(format!("injector {}", id))),
        }
    }

    /// Flip an injector's enabled flag; returns the new state
    pub fn toggle_fault(&self, id: &str) -> Result<bool> {
        let mut injectors = self.injectors.write();
        let spec = injectors
            .get_mut(id)
            .ok_or_else(|| ChaosError::NotFound(format!("injector {}", id)))?;
        spec.enabled = !spec.enabled;
        Ok(spec.enabled)
    }

    /// All registered injectors
    pub fn list_faults(&self) -> Vec<FaultSpec> {
        self.injectors.read().values().cloned().collect()
    }

    /// Remove every injector; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut injectors = self.injectors.write();
        let count = injectors.len();
        injectors.clear();
        drop(injectors);
        self.update_active_gauge();
        if count > 0 {
            info!(count, "cleared all fault injectors");
        }
        count
    }

    /// Drop expired injectors; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut injectors = self.injectors.write();
        let before = injectors.len();
        injectors.retain(|id, spec| {
            let keep = !spec.is_expired(now);
            if !keep {
                debug!(id = %id, "expired fault injector swept");
            }
            keep
        });
        let removed = before - injectors.len();
        drop(injectors);
        if removed > 0 {
            self.update_active_gauge();
        }
        removed
    }

    /// Decide whether a fault fires for this operation
    ///
    /// Active injectors are matched on (scope, value) and type, expiry is
    /// checked, and each match rolls against its probability. The first
    /// successful roll wins.
    pub fn should_inject(
        &self,
        scope: FaultScope,
        scope_value: &str,
        fault_type: FaultType,
    ) -> Option<FaultSpec> {
        if !self.config.enabled || self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        let now = Utc::now();
        let injectors = self.injectors.read();
        let mut rng = rand::rng();
        for spec in injectors.values() {
            if !spec.enabled
                || spec.fault_type != fault_type
                || spec.is_expired(now)
                || !spec.matches(scope, scope_value)
            {
                continue;
            }
            if rng.random::<f64>() < spec.probability {
                debug!(id = %spec.id, fault_type = fault_type.as_str(), "fault fired");
                return Some(spec.clone());
            }
        }
        None
    }

    /// Inline hook for the job runtime: latency, then error, then panic
    pub async fn intercept(&self, scope: FaultScope, scope_value: &str) -> Result<()> {
        if let Some(spec) = self.should_inject(scope, scope_value, FaultType::Latency) {
            self.inject_latency(&spec).await;
        }
        if let Some(spec) = self.should_inject(scope, scope_value, FaultType::Error) {
            return Err(self.inject_error(&spec));
        }
        if let Some(spec) = self.should_inject(scope, scope_value, FaultType::Panic) {
            return Err(self.inject_panic(&spec));
        }
        Ok(())
    }

    /// Sleep for the injector's latency, jittered and clamped non-negative
    pub async fn inject_latency(&self, spec: &FaultSpec) {
        let base = spec.params.latency_ms.unwrap_or(crate::fault::DEFAULT_LATENCY_MS);
        let jitter = spec.params.jitter_ms.unwrap_or(0);
        let delay_ms = if jitter == 0 {
            base
        } else {
            let offset = rand::rng().random_range(0..=jitter);
            if rand::rng().random_bool(0.5) {
                base + offset
            } else {
                base.saturating_sub(offset)
            }
        };
        debug!(id = %spec.id, delay_ms, "injecting latency");
        self.record_fault(spec, delay_ms as f64);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    /// Build the typed error an error injector surfaces
    pub fn inject_error(&self, spec: &FaultSpec) -> ChaosError {
        self.record_fault(spec, 0.0);
        ChaosError::InjectedError {
            injector_id: spec.id.clone(),
            message: spec
                .params
                .error_message
                .clone()
                .unwrap_or_else(|| "injected failure".to_string()),
        }
    }

    /// Build the typed abort a panic injector surfaces
    ///
    /// Deliberately a tagged error, not an unwind; callers surface it like
    /// any other failure and scenario guardrails can react to it.
    pub fn inject_panic(&self, spec: &FaultSpec) -> ChaosError {
        self.record_fault(spec, 0.0);
        warn!(id = %spec.id, "injected panic");
        ChaosError::InjectedPanic {
            injector_id: spec.id.clone(),
            message: spec
                .params
                .error_message
                .clone()
                .unwrap_or_else(|| "injected panic".to_string()),
        }
    }

    /// Fail each item independently at the injector's fail rate
    pub fn partial_fail<T>(
        &self,
        spec: &FaultSpec,
        items: Vec<T>,
    ) -> Vec<std::result::Result<T, ChaosError>> {
        let rate = spec.params.fail_rate.unwrap_or(crate::fault::DEFAULT_FAIL_RATE);
        let mut rng = rand::rng();
        items
            .into_iter()
            .map(|item| {
                if rng.random::<f64>() < rate {
                    self.record_fault(spec, 0.0);
                    Err(ChaosError::InjectedError {
                        injector_id: spec.id.clone(),
                        message: "partial failure".to_string(),
                    })
                } else {
                    Ok(item)
                }
            })
            .collect()
    }

    pub(crate) fn metrics(&self) -> Option<Arc<ChaosMetrics>> {
        self.metrics.read().clone()
    }

    fn record_fault(&self, spec: &FaultSpec, latency_ms: f64) {
        if let Some(metrics) = self.metrics.read().as_ref() {
            metrics.record_fault(spec.fault_type.as_str(), latency_ms);
        }
    }

    fn update_active_gauge(&self) {
        if let Some(metrics) = self.metrics.read().as_ref() {
            metrics.set_active_injectors(self.injectors.read().len() as f64);
        }
    }

    fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Top-level chaos harness: engine, scenario runner, and the expiry sweeper
pub struct ChaosHarness {
    engine: Arc<ChaosEngine>,
    runner: Arc<ScenarioRunner>,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ChaosHarness {
    /// Create a harness; configuration errors are fatal here
    pub fn new(config: ChaosConfig) -> Result<Self> {
        let engine = Arc::new(ChaosEngine::new(config)?);
        let runner = Arc::new(ScenarioRunner::new(engine.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            engine,
            runner,
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Register metrics on the given registry
    pub fn with_metrics(self, registry: &prometheus::Registry) -> Result<Self> {
        self.engine.set_metrics(Arc::new(ChaosMetrics::new(registry)?));
        Ok(self)
    }

    /// Injector registry
    pub fn engine(&self) -> Arc<ChaosEngine> {
        self.engine.clone()
    }

    /// Scenario runner
    pub fn runner(&self) -> Arc<ScenarioRunner> {
        self.runner.clone()
    }

    /// Spawn the expiry sweeper
    pub fn start(&self) {
        let engine = self.engine.clone();
        let interval = engine.config().sweep_interval;
        let mut shutdown = self.shutdown_tx.subscribe();
        self.tasks.lock().push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let removed = engine.sweep_expired();
                        if removed > 0 {
                            info!(removed, "expired injectors swept");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
        info!("chaos harness started");
    }

    /// Abort all scenarios, clear all injectors, stop background tasks
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.runner.abort_all().await;
        self.engine.clear();
        self.engine.mark_stopped();
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
                warn!("chaos task failed to drain within 10s");
            }
        }
        info!("chaos harness stopped");
    }
}

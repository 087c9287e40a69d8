//! Prometheus metrics for the backpressure controller
//!
//! Metrics are registered against an injected registry so tests can use a
//! private one and embedders can merge into their own exposition endpoint.

use crate::circuit::CircuitState;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Backpressure metrics
pub struct BackpressureMetrics {
    /// Decisions issued, by priority and reason
    pub throttle_decisions: CounterVec,
    /// Applied delay in milliseconds, by priority
    pub throttle_delay_ms: HistogramVec,
    /// Jobs shed, by queue
    pub jobs_shed: CounterVec,
    /// Last observed backlog, by queue
    pub queue_backlog: GaugeVec,
    /// Circuit breaker state (0=closed, 1=open, 2=half-open), by queue
    pub circuit_state: GaugeVec,
}

impl BackpressureMetrics {
    /// Create and register all metrics
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let throttle_decisions = CounterVec::new(
            Opts::new("backpressure_decisions_total", "Throttle decisions issued"),
            &["priority", "reason"],
        )?;
        registry.register(Box::new(throttle_decisions.clone()))?;

        let throttle_delay_ms = HistogramVec::new(
            HistogramOpts::new("backpressure_delay_ms", "Applied throttle delay in milliseconds")
                .buckets(vec![
                    0.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
                ]),
            &["priority"],
        )?;
        registry.register(Box::new(throttle_delay_ms.clone()))?;

        let jobs_shed = CounterVec::new(
            Opts::new("backpressure_jobs_shed_total", "Jobs shed by backpressure"),
            &["queue"],
        )?;
        registry.register(Box::new(jobs_shed.clone()))?;

        let queue_backlog = GaugeVec::new(
            Opts::new("backpressure_queue_backlog", "Last observed queue backlog"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_backlog.clone()))?;

        let circuit_state = GaugeVec::new(
            Opts::new(
                "backpressure_circuit_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self {
            throttle_decisions,
            throttle_delay_ms,
            jobs_shed,
            queue_backlog,
            circuit_state,
        })
    }

    /// Record a decision and its observable side facts
    pub fn record_decision(
        &self,
        priority: &str,
        reason: &str,
        queue: &str,
        delay_ms: f64,
        shed: bool,
        backlog: u64,
    ) {
        self.throttle_decisions.with_label_values(&[priority, reason]).inc();
        self.throttle_delay_ms.with_label_values(&[priority]).observe(delay_ms);
        if shed {
            self.jobs_shed.with_label_values(&[queue]).inc();
        }
        self.queue_backlog.with_label_values(&[queue]).set(backlog as f64);
    }

    /// Update the breaker state gauge for a queue
    pub fn update_circuit_state(&self, queue: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        };
        self.circuit_state.with_label_values(&[queue]).set(value);
    }
}

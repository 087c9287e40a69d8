//! Prometheus metrics for the chaos harness

use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// Chaos harness metrics, registered on an injected registry
pub struct ChaosMetrics {
    /// Faults fired, by fault type
    pub faults_injected: CounterVec,
    /// Latency injected in milliseconds
    pub injected_latency_ms: Histogram,
    /// Scenario terminal states
    pub scenarios_total: CounterVec,
    /// Injectors currently registered
    pub active_injectors: Gauge,
}

impl ChaosMetrics {
    /// Create and register all metrics
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let faults_injected = CounterVec::new(
            Opts::new("chaos_faults_injected_total", "Faults fired by the chaos harness"),
            &["fault_type"],
        )?;
        registry.register(Box::new(faults_injected.clone()))?;

        let injected_latency_ms = Histogram::with_opts(
            HistogramOpts::new("chaos_injected_latency_ms", "Injected latency in milliseconds")
                .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]),
        )?;
        registry.register(Box::new(injected_latency_ms.clone()))?;

        let scenarios_total = CounterVec::new(
            Opts::new("chaos_scenarios_total", "Scenario terminal states"),
            &["status"],
        )?;
        registry.register(Box::new(scenarios_total.clone()))?;

        let active_injectors =
            Gauge::with_opts(Opts::new("chaos_active_injectors", "Registered fault injectors"))?;
        registry.register(Box::new(active_injectors.clone()))?;

        Ok(Self {
            faults_injected,
            injected_latency_ms,
            scenarios_total,
            active_injectors,
        })
    }

    /// Record a fired fault (latency 0 for non-latency faults)
    pub fn record_fault(&self, fault_type: &str, latency_ms: f64) {
        self.faults_injected.with_label_values(&[fault_type]).inc();
        if latency_ms > 0.0 {
            self.injected_latency_ms.observe(latency_ms);
        }
    }

    /// Record a scenario reaching a terminal state
    pub fn record_scenario(&self, status: &str) {
        self.scenarios_total.with_label_values(&[status]).inc();
    }

    /// Set the registered-injector gauge
    pub fn set_active_injectors(&self, count: f64) {
        self.active_injectors.set(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_metrics_register_on_private_registry() {
        let registry = Registry::new();
        let metrics = ChaosMetrics::new(&registry).unwrap();
        metrics.record_fault("latency", 25.0);
        metrics.record_scenario("completed");
        metrics.set_active_injectors(2.0);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("chaos_faults_injected_total"));
        assert!(output.contains("chaos_active_injectors"));
    }
}

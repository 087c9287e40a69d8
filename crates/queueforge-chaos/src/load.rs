//! Synthetic load generation for chaos scenarios

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shape of the generated request rate over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPattern {
    /// Fixed rate
    Constant,
    /// Ramp from zero to the configured rate over 60 seconds
    Linear,
    /// 60-second sine with 50% amplitude around the base rate
    Sine,
    /// Uniform +/-50% around the base rate
    Random,
    /// Baseline with periodic bursts
    Spike,
}

/// Load generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Rate shape
    pub pattern: LoadPattern,
    /// Base requests per second
    pub requests_per_second: f64,
    /// Burst size for the spike pattern; defaults to 5x the base rate
    pub burst_size: Option<u64>,
    /// Per-request success probability for the simulated requests
    pub success_probability: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            pattern: LoadPattern::Constant,
            requests_per_second: 10.0,
            burst_size: None,
            success_probability: 0.9,
        }
    }
}

/// Request counters updated once per tick
#[derive(Debug, Default)]
pub struct LoadStats {
    /// Requests attempted
    pub total_requests: AtomicU64,
    /// Requests that simulated success
    pub successful_requests: AtomicU64,
    /// Requests that simulated failure
    pub failed_requests: AtomicU64,
}

impl LoadStats {
    /// Failed fraction of all requests so far (0 when idle)
    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.failed_requests.load(Ordering::Relaxed) as f64 / total as f64
    }
}

/// Ticks once per second, simulating the configured request pattern
pub struct LoadGenerator {
    config: LoadConfig,
    stats: Arc<LoadStats>,
}

const RAMP_SECONDS: f64 = 60.0;
const SINE_PERIOD_SECONDS: f64 = 60.0;
const SPIKE_PERIOD_SECONDS: u64 = 10;

impl LoadGenerator {
    /// Create a generator with zeroed counters
    pub fn new(config: LoadConfig) -> Self {
        Self {
            config,
            stats: Arc::new(LoadStats::default()),
        }
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<LoadStats> {
        self.stats.clone()
    }

    /// Generator configuration
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Target rate for the tick at `elapsed` since scenario start
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        let base = self.config.requests_per_second;
        let secs = elapsed.as_secs_f64();
        match self.config.pattern {
            LoadPattern::Constant => base,
            LoadPattern::Linear => base * (secs / RAMP_SECONDS).min(1.0),
            LoadPattern::Sine => {
                let phase = secs / SINE_PERIOD_SECONDS * std::f64::consts::TAU;
                base * (1.0 + 0.5 * phase.sin())
            }
            LoadPattern::Random => {
                let factor = rand::rng().random_range(0.5..=1.5);
                base * factor
            }
            LoadPattern::Spike => {
                if elapsed.as_secs() % SPIKE_PERIOD_SECONDS == 0 {
                    self.config.burst_size.map_or(base * 5.0, |b| b as f64)
                } else {
                    base
                }
            }
        }
    }

    /// Simulate one second of traffic; returns (attempted, failed)
    pub fn tick(&self, elapsed: Duration) -> (u64, u64) {
        let rate = self.rate_at(elapsed).max(0.0).round() as u64;
        let mut failed = 0;
        let mut rng = rand::rng();
        for _ in 0..rate {
            if rng.random::<f64>() >= self.config.success_probability {
                failed += 1;
            }
        }
        self.stats.total_requests.fetch_add(rate, Ordering::Relaxed);
        self.stats.successful_requests.fetch_add(rate - failed, Ordering::Relaxed);
        self.stats.failed_requests.fetch_add(failed, Ordering::Relaxed);
        debug!(rate, failed, "load tick");
        (rate, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_rate() {
        let generator = LoadGenerator::new(LoadConfig::default());
        assert_eq!(generator.rate_at(Duration::from_secs(0)), 10.0);
        assert_eq!(generator.rate_at(Duration::from_secs(300)), 10.0);
    }

    #[test]
    fn test_linear_ramp() {
        let config = LoadConfig {
            pattern: LoadPattern::Linear,
            requests_per_second: 100.0,
            ..Default::default()
        };
        let generator = LoadGenerator::new(config);
        assert_eq!(generator.rate_at(Duration::from_secs(0)), 0.0);
        assert!((generator.rate_at(Duration::from_secs(30)) - 50.0).abs() < 1e-9);
        assert_eq!(generator.rate_at(Duration::from_secs(120)), 100.0);
    }

    #[test]
    fn test_sine_bounds() {
        let config = LoadConfig {
            pattern: LoadPattern::Sine,
            requests_per_second: 10.0,
            ..Default::default()
        };
        let generator = LoadGenerator::new(config);
        for secs in 0..180 {
            let rate = generator.rate_at(Duration::from_secs(secs));
            assert!((5.0..=15.0).contains(&rate), "rate {} at {}s", rate, secs);
        }
    }

    #[test]
    fn test_random_bounds() {
        let config = LoadConfig {
            pattern: LoadPattern::Random,
            requests_per_second: 10.0,
            ..Default::default()
        };
        let generator = LoadGenerator::new(config);
        for _ in 0..100 {
            let rate = generator.rate_at(Duration::from_secs(1));
            assert!((5.0..=15.0).contains(&rate));
        }
    }

    #[test]
    fn test_spike_bursts() {
        let config = LoadConfig {
            pattern: LoadPattern::Spike,
            requests_per_second: 10.0,
            burst_size: Some(80),
            ..Default::default()
        };
        let generator = LoadGenerator::new(config);
        assert_eq!(generator.rate_at(Duration::from_secs(0)), 80.0);
        assert_eq!(generator.rate_at(Duration::from_secs(3)), 10.0);
        assert_eq!(generator.rate_at(Duration::from_secs(10)), 80.0);

        let default_burst = LoadGenerator::new(LoadConfig {
            pattern: LoadPattern::Spike,
            requests_per_second: 10.0,
            burst_size: None,
            ..Default::default()
        });
        assert_eq!(default_burst.rate_at(Duration::from_secs(0)), 50.0);
    }

    #[test]
    fn test_tick_updates_counters() {
        let config = LoadConfig {
            success_probability: 0.0, // every request fails
            ..Default::default()
        };
        let generator = LoadGenerator::new(config);
        let (attempted, failed) = generator.tick(Duration::from_secs(1));
        assert_eq!(attempted, 10);
        assert_eq!(failed, 10);
        assert_eq!(generator.stats().error_rate(), 1.0);
    }

    #[test]
    fn test_all_success_error_rate_zero() {
        let config = LoadConfig {
            success_probability: 1.0,
            ..Default::default()
        };
        let generator = LoadGenerator::new(config);
        generator.tick(Duration::from_secs(1));
        assert_eq!(generator.stats().error_rate(), 0.0);
    }
}

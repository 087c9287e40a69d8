//! Backpressure controller configuration

use crate::{BackpressureError, Result};
use queueforge_core::Priority;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest backlog value a window threshold may take
pub const MAX_THRESHOLD: u64 = 1_000_000;

/// Per-priority backlog window
///
/// Backlogs at or below `green` pass untouched, backlogs between `green` and
/// `yellow` ramp the delay linearly, and backlogs above `yellow` enter the
/// red band where priorities diverge and low-priority work may be shed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogWindow {
    /// Upper bound of the unthrottled band
    pub green: u64,
    /// Upper bound of the linear-ramp band
    pub yellow: u64,
    /// Saturation threshold
    pub red: u64,
}

impl BacklogWindow {
    /// Create a window; thresholds are validated by [`BackpressureConfig::validate`]
    pub fn new(green: u64, yellow: u64, red: u64) -> Self {
        Self { green, yellow, red }
    }

    fn validate(&self, field: &'static str) -> Result<()> {
        if !(self.green < self.yellow && self.yellow < self.red) {
            return Err(BackpressureError::Config {
                field,
                reason: format!(
                    "thresholds must be strictly increasing, got {} / {} / {}",
                    self.green, self.yellow, self.red
                ),
            });
        }
        if self.red > MAX_THRESHOLD {
            return Err(BackpressureError::Config {
                field,
                reason: format!("red threshold {} exceeds maximum {}", self.red, MAX_THRESHOLD),
            });
        }
        Ok(())
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within the trip window before opening
    pub failure_threshold: u32,
    /// Successes in half-open before closing
    pub recovery_threshold: u32,
    /// How long an open breaker rejects before probing
    pub recovery_timeout: Duration,
    /// Minimum spacing between half-open probes
    pub probe_interval: Duration,
    /// Sliding window over which failures accumulate
    pub trip_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_secs(1),
            trip_window: Duration::from_secs(60),
        }
    }
}

/// Behavior when the stats provider is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Apply fixed conservative per-priority delays
    ConservativeDelays,
    /// Let everything through with zero delay
    PassThrough,
}

/// Backpressure controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Backlog window for high-priority work
    pub high: BacklogWindow,
    /// Backlog window for medium-priority work
    pub medium: BacklogWindow,
    /// Backlog window for low-priority work
    pub low: BacklogWindow,
    /// Circuit breaker tuning applied to every queue
    pub circuit_breaker: CircuitBreakerConfig,
    /// How long a computed decision stays cached per (queue, priority)
    pub cache_ttl: Duration,
    /// Timeout on each stats provider call
    pub provider_timeout: Duration,
    /// Optional background polling of all queue stats
    pub poll_interval: Option<Duration>,
    /// Random jitter added to each poll sleep
    pub poll_jitter: Duration,
    /// What to do when the stats provider fails
    pub fallback_mode: FallbackMode,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high: BacklogWindow::new(1_000, 5_000, 10_000),
            medium: BacklogWindow::new(500, 2_000, 5_000),
            low: BacklogWindow::new(100, 500, 1_000),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache_ttl: Duration::from_secs(2),
            provider_timeout: Duration::from_millis(500),
            poll_interval: None,
            poll_jitter: Duration::from_millis(250),
            fallback_mode: FallbackMode::ConservativeDelays,
        }
    }
}

impl BackpressureConfig {
    /// Window for a given priority
    pub fn window(&self, priority: Priority) -> BacklogWindow {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    /// Conservative delay applied in fallback mode
    pub fn fallback_delay(priority: Priority) -> Duration {
        match priority {
            Priority::High => Duration::from_millis(100),
            Priority::Medium => Duration::from_millis(500),
            Priority::Low => Duration::from_secs(1),
        }
    }

    /// Validate all fields; called at controller construction
    pub fn validate(&self) -> Result<()> {
        self.high.validate("high")?;
        self.medium.validate("medium")?;
        self.low.validate("low")?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(BackpressureError::Config {
                field: "circuit_breaker.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.circuit_breaker.recovery_threshold == 0 {
            return Err(BackpressureError::Config {
                field: "circuit_breaker.recovery_threshold",
                reason: "must be at least 1".to_string(),
            });
        }

        for (field, duration) in [
            ("circuit_breaker.recovery_timeout", self.circuit_breaker.recovery_timeout),
            ("circuit_breaker.probe_interval", self.circuit_breaker.probe_interval),
            ("circuit_breaker.trip_window", self.circuit_breaker.trip_window),
            ("cache_ttl", self.cache_ttl),
            ("provider_timeout", self.provider_timeout),
        ] {
            if duration.is_zero() {
                return Err(BackpressureError::Config {
                    field,
                    reason: "duration must be positive".to_string(),
                });
            }
        }

        if let Some(poll) = self.poll_interval {
            if poll.is_zero() {
                return Err(BackpressureError::Config {
                    field: "poll_interval",
                    reason: "duration must be positive".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        BackpressureConfig::default().validate().unwrap();
    }

    #[test]
    fn test_window_ordering_enforced() {
        let mut config = BackpressureConfig::default();
        config.medium = BacklogWindow::new(2_000, 2_000, 5_000);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("medium"));
    }

    #[test]
    fn test_red_cap_enforced() {
        let mut config = BackpressureConfig::default();
        config.low = BacklogWindow::new(100, 500, MAX_THRESHOLD + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut config = BackpressureConfig::default();
        config.cache_ttl = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_lookup() {
        let config = BackpressureConfig::default();
        assert_eq!(config.window(Priority::Medium), config.medium);
        assert_eq!(config.window(Priority::Low), config.low);
    }
}

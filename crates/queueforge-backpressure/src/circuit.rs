//! Per-queue circuit breakers

use crate::config::CircuitBreakerConfig;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected until the recovery timeout elapses
    Open,
    /// Probing recovery; one probe per probe interval
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    last_probe_at: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            opened_at: None,
            last_probe_at: None,
        }
    }
}

/// Circuit breaker guarding a single queue
///
/// Closed counts failures within a sliding trip window; Open rejects until
/// the recovery timeout elapses; HalfOpen admits at most one probe per probe
/// interval and closes after enough consecutive probe successes.
pub struct CircuitBreaker {
    queue: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for a queue
    pub fn new(queue: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            queue: queue.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Current state, transitioning Open to HalfOpen if the timeout elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a request may proceed right now
    ///
    /// In half-open, allowing a request consumes the probe budget for the
    /// current probe interval.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let probe_due = match inner.last_probe_at {
                    None => true,
                    Some(last) => last.elapsed() >= self.config.probe_interval,
                };
                if probe_due {
                    inner.last_probe_at = Some(Instant::now());
                    debug!(queue = %self.queue, "circuit breaker admitting half-open probe");
                }
                probe_due
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.recovery_threshold {
                    info!(queue = %self.queue, "circuit breaker closed after recovery");
                    *inner = BreakerInner::new();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                // Failures outside the trip window start a fresh count
                let within_window = inner
                    .last_failure_at
                    .is_some_and(|last| last.elapsed() <= self.config.trip_window);
                inner.failure_count = if within_window { inner.failure_count + 1 } else { 1 };
                inner.last_failure_at = Some(now);

                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        queue = %self.queue,
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.success_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                warn!(queue = %self.queue, "circuit breaker re-opened from half-open");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.last_failure_at = Some(now);
                inner.success_count = 0;
                inner.last_probe_at = None;
            }
            CircuitState::Open => {
                inner.last_failure_at = Some(now);
            }
        }
    }

    /// Force the breaker open (operator action)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.success_count = 0;
        info!(queue = %self.queue, "circuit breaker forced open");
    }

    /// Force the breaker closed (operator action)
    pub fn force_closed(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerInner::new();
        info!(queue = %self.queue, "circuit breaker forced closed");
    }

    /// Clear all state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerInner::new();
    }

    /// Consecutive failure count within the current trip window
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened) = inner.opened_at {
                if opened.elapsed() >= self.config.recovery_timeout {
                    debug!(queue = %self.queue, "circuit breaker entering half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.last_probe_at = None;
                }
            }
        }
    }
}

/// Lazily-created per-queue breakers
///
/// Breakers are created on first use under a double-checked write-locked
/// insertion and never destroyed.
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    /// Create an empty manager
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for a queue, created on first access
    pub fn breaker(&self, queue: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(queue) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(queue, self.config.clone())))
            .clone()
    }

    /// Queues with a breaker instantiated
    pub fn queues(&self) -> Vec<String> {
        self.breakers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            probe_interval: Duration::from_millis(10),
            trip_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_trips_after_threshold() {
        let breaker = CircuitBreaker::new("jobs", fast_config());
        assert!(breaker.should_allow());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_allow());
    }

    #[tokio::test]
    async fn test_half_open_and_recovery() {
        let breaker = CircuitBreaker::new("jobs", fast_config());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.should_allow());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(breaker.should_allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("jobs", fast_config());
        breaker.record_failure();
        breaker.record_failure();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(breaker.should_allow());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_allow());
    }

    #[tokio::test]
    async fn test_half_open_probe_budget() {
        let mut config = fast_config();
        config.probe_interval = Duration::from_secs(60);
        let breaker = CircuitBreaker::new("jobs", config);
        breaker.record_failure();
        breaker.record_failure();

        tokio::time::sleep(Duration::from_millis(150)).await;
        // First probe admitted, second rejected within the same interval
        assert!(breaker.should_allow());
        assert!(!breaker.should_allow());
    }

    #[test]
    fn test_success_resets_closed_failures() {
        let breaker = CircuitBreaker::new("jobs", fast_config());
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        // Never reached two consecutive failures
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_force_and_reset() {
        let breaker = CircuitBreaker::new("jobs", fast_config());
        breaker.force_open();
        assert!(!breaker.should_allow());

        breaker.force_closed();
        assert!(breaker.should_allow());

        breaker.record_failure();
        breaker.reset();
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_manager_lazy_creation() {
        let manager = CircuitBreakerManager::new(fast_config());
        assert!(manager.queues().is_empty());

        let a = manager.breaker("alpha");
        let a_again = manager.breaker("alpha");
        assert!(Arc::ptr_eq(&a, &a_again));
        assert_eq!(manager.queues(), vec!["alpha"]);
    }
}

//! End-to-end checks of the documented throttle curve and breaker behavior

use queueforge_backpressure::{
    BackpressureConfig, BackpressureController, BacklogWindow, CircuitBreakerConfig, CircuitState,
};
use queueforge_core::{Priority, StaticStatsProvider};
use std::sync::Arc;
use std::time::Duration;

fn controller_for(backlog: u64) -> BackpressureController {
    let provider = StaticStatsProvider::new();
    provider.set_counts("jobs", backlog, 0);
    BackpressureController::new(BackpressureConfig::default(), Arc::new(provider)).unwrap()
}

fn delay_ms(delay: Option<Duration>) -> f64 {
    delay.unwrap().as_secs_f64() * 1000.0
}

#[tokio::test]
async fn medium_priority_color_transitions() {
    // Medium defaults: green=500, yellow=2000, red=5000
    let decision = controller_for(100)
        .suggest_throttle(Priority::Medium, "jobs")
        .await
        .unwrap();
    assert_eq!(decision.delay, Some(Duration::ZERO));
    assert!(!decision.should_shed);
    assert_eq!(decision.reason, "backlog_green");

    let decision = controller_for(1_000)
        .suggest_throttle(Priority::Medium, "jobs")
        .await
        .unwrap();
    // 10ms + 490ms * (1000-500)/(2000-500)
    let expected = 10.0 + 490.0 / 3.0;
    assert!((delay_ms(decision.delay) - expected).abs() < 1.0);
    assert_eq!(decision.reason, "backlog_yellow");

    let decision = controller_for(3_000)
        .suggest_throttle(Priority::Medium, "jobs")
        .await
        .unwrap();
    // base = 500 + 4500 * (3000-2000)/(5000-2000) = 2000ms; medium keeps base
    assert!((delay_ms(decision.delay) - 2_000.0).abs() < 1.0);
    assert_eq!(decision.reason, "backlog_red_medium_priority");
}

#[tokio::test]
async fn red_band_priority_multipliers() {
    let high = controller_for(3_000)
        .suggest_throttle(Priority::High, "jobs")
        .await
        .unwrap();
    assert_eq!(high.reason, "backlog_green"); // high window is wider

    // Put all priorities into their red band with a shared saturation point
    let window = BacklogWindow::new(100, 500, 1_000);
    let mut config = BackpressureConfig::default();
    config.high = window;
    config.medium = window;
    config.low = window;
    let provider = StaticStatsProvider::new();
    provider.set_counts("jobs", 700, 0);
    let controller = BackpressureController::new(config, Arc::new(provider)).unwrap();

    let high = controller.suggest_throttle(Priority::High, "jobs").await.unwrap();
    let medium = controller.suggest_throttle(Priority::Medium, "jobs").await.unwrap();
    let low = controller.suggest_throttle(Priority::Low, "jobs").await.unwrap();

    let base = delay_ms(medium.delay);
    assert!((delay_ms(high.delay) - base * 0.5).abs() < 1.0);
    assert!((delay_ms(low.delay) - base * 1.5).abs() < 1.0);
}

#[tokio::test]
async fn low_priority_shed_boundary() {
    // Low defaults: green=100, yellow=500, red=1000; shed only past ratio 0.8
    let decision = controller_for(900)
        .suggest_throttle(Priority::Low, "jobs")
        .await
        .unwrap();
    assert!(!decision.should_shed);
    assert_eq!(decision.reason, "backlog_red_low_priority");

    let decision = controller_for(950)
        .suggest_throttle(Priority::Low, "jobs")
        .await
        .unwrap();
    assert!(decision.should_shed);
    assert_eq!(decision.delay, None);
    assert_eq!(decision.reason, "backlog_red_shed_low_priority");
}

#[tokio::test]
async fn breaker_trip_and_recovery() {
    let provider = StaticStatsProvider::new();
    provider.set_counts("jobs", 10, 0);
    let mut config = BackpressureConfig::default();
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_threshold: 2,
        recovery_timeout: Duration::from_millis(100),
        probe_interval: Duration::from_millis(10),
        trip_window: Duration::from_secs(60),
    };
    let controller = BackpressureController::new(config, Arc::new(provider)).unwrap();

    let breaker = controller.breakers().breaker("jobs");
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.should_allow());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(breaker.should_allow());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_success();
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

//! Scenario lifecycle through the public harness API

use queueforge_chaos::{
    ChaosConfig, ChaosHarness, FaultParams, FaultScope, FaultSpec, FaultType, Guardrails,
    LoadConfig, LoadPattern, Scenario, ScenarioStatus, Stage,
};
use std::time::Duration;

fn clean_load() -> LoadConfig {
    LoadConfig {
        pattern: LoadPattern::Constant,
        requests_per_second: 20.0,
        burst_size: None,
        success_probability: 1.0,
    }
}

#[tokio::test]
async fn latency_injection_scoped_to_stage() {
    let harness = ChaosHarness::new(ChaosConfig::default()).unwrap();
    let engine = harness.engine();

    let fault = FaultSpec::new(FaultType::Latency, FaultScope::Global).with_params(FaultParams {
        latency_ms: Some(10),
        ..Default::default()
    });
    let scenario = Scenario::new("latency-stage")
        .with_stage(
            Stage::new("inject", Duration::from_millis(200))
                .with_fault(fault)
                .with_load(clean_load()),
        )
        .with_cooldown(Duration::from_millis(200));

    let runner = harness.runner();
    let id = runner.register(scenario).await.unwrap();

    // While the stage runs, ops on any queue see the injected latency
    let probe = {
        let engine = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let started = std::time::Instant::now();
            let _ = engine.intercept(FaultScope::Queue, "jobs").await;
            started.elapsed()
        })
    };

    let status = runner.run(&id).await.unwrap();
    assert_eq!(status, ScenarioStatus::Completed);
    assert!(probe.await.unwrap() >= Duration::from_millis(10));

    // After the run, injectors are gone and ops are clean again
    assert!(engine.list_faults().is_empty());
    let started = std::time::Instant::now();
    engine.intercept(FaultScope::Queue, "jobs").await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(10));

    let report = runner.get(&id).await.unwrap();
    assert!(report.metrics.recovery_time.is_some());
    assert!(report.metrics.final_error_rate <= 0.10);
}

#[tokio::test]
async fn guardrail_violation_aborts() {
    let harness = ChaosHarness::new(ChaosConfig::default()).unwrap();

    let fault = FaultSpec::new(FaultType::Error, FaultScope::Global).with_probability(1.0);
    let mut guardrails = Guardrails::default();
    guardrails.max_error_rate = 0.01;
    let scenario = Scenario::new("error-storm")
        .with_stage(
            Stage::new("inject", Duration::from_secs(10))
                .with_fault(fault)
                .with_load(clean_load()),
        )
        .with_guardrails(guardrails);

    let runner = harness.runner();
    let id = runner.register(scenario).await.unwrap();
    let status = runner.run(&id).await.unwrap();

    assert_eq!(status, ScenarioStatus::Aborted);
    let report = runner.get(&id).await.unwrap();
    assert!(report.error.unwrap().contains("error rate"));
    assert!(harness.engine().list_faults().is_empty());
}

#[tokio::test]
async fn harness_stop_aborts_everything() {
    let harness = ChaosHarness::new(ChaosConfig::default()).unwrap();
    harness.start();

    harness
        .engine()
        .add_fault(FaultSpec::new(FaultType::Error, FaultScope::Global))
        .unwrap();
    let id = harness
        .runner()
        .register(Scenario::new("pending").with_stage(Stage::new("s", Duration::from_secs(1))))
        .await
        .unwrap();

    harness.stop().await;

    assert!(harness.engine().list_faults().is_empty());
    assert_eq!(
        harness.runner().get(&id).await.unwrap().status,
        ScenarioStatus::Aborted
    );
}

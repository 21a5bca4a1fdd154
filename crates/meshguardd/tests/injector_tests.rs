//! Failure injection against mock mesh services: wire calls and cascade
//! timing.

mod support;

use meshguardd::injector::scenarios::{custom_scenario, ScenarioCatalog};
use meshguardd::injector::FailureInjector;
use meshguardd::logs::FailureLog;
use meshguard_common::{CascadeStep, FailureType, Scenario, ScenarioKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn injector_for(
    mocks: &[&support::MockService],
    dir: &tempfile::TempDir,
) -> Arc<FailureInjector> {
    let configs: Vec<_> = mocks
        .iter()
        .map(|m| support::service_config(m, &[]))
        .collect();
    let services = Arc::new(configs);
    let mut rng = StdRng::seed_from_u64(3);
    let catalog = ScenarioCatalog::generate(&services, &mut rng);
    Arc::new(FailureInjector::new(
        services,
        catalog,
        Arc::new(FailureLog::new(dir.path().join("failures.csv"))),
        Duration::from_secs(30),
        Duration::from_secs(5),
        0.3,
    ))
}

#[tokio::test]
async fn simple_injection_hits_every_target() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let svc_b = support::spawn_service("service_b", "healthy").await;
    let dir = tempfile::tempdir().unwrap();
    let injector = injector_for(&[&svc_a, &svc_b], &dir).await;

    injector
        .inject_custom(
            &["service_a".to_string(), "service_b".to_string()],
            FailureType::Degraded,
            600,
        )
        .await
        .unwrap();

    assert_eq!(svc_a.state.inject_calls.lock().unwrap().len(), 1);
    assert_eq!(svc_b.state.inject_calls.lock().unwrap().len(), 1);
    assert_eq!(*svc_a.state.status.lock().unwrap(), "degraded");
    assert_eq!(injector.active_count().await, 1);
}

#[tokio::test]
async fn clear_all_recovers_every_target() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let dir = tempfile::tempdir().unwrap();
    let injector = injector_for(&[&svc_a], &dir).await;

    injector
        .inject_custom(&["service_a".to_string()], FailureType::Down, 600)
        .await
        .unwrap();
    assert_eq!(*svc_a.state.status.lock().unwrap(), "down");

    let cleared = injector.clear_all().await;
    assert_eq!(cleared, 1);
    assert_eq!(svc_a.state.recover_calls.lock().unwrap().len(), 1);
    assert_eq!(*svc_a.state.status.lock().unwrap(), "healthy");
    assert!(injector.active_failures().await.is_empty());
}

#[tokio::test]
async fn cascade_steps_respect_cumulative_delays() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let svc_b = support::spawn_service("service_b", "healthy").await;
    let dir = tempfile::tempdir().unwrap();
    let injector = injector_for(&[&svc_a, &svc_b], &dir).await;

    let scenario = Scenario {
        id: "cascade_test".into(),
        name: "Test cascade".into(),
        kind: ScenarioKind::Cascade,
        target_services: vec!["service_a".into(), "service_b".into()],
        failure_type: FailureType::Down,
        description: String::new(),
        probability: 1.0,
        duration_secs: 600,
        sequence: vec![
            CascadeStep {
                service: "service_a".into(),
                failure_type: FailureType::Down,
                delay_secs: 1,
            },
            CascadeStep {
                service: "service_b".into(),
                failure_type: FailureType::Degraded,
                delay_secs: 1,
            },
        ],
    };

    let launched = Instant::now();
    let record = injector.inject_scenario(scenario).await.unwrap();
    // The record exists before any step has fired.
    assert_eq!(injector.active_count().await, 1);
    assert_eq!(record.sequence.len(), 2);

    // Wait out both delays plus slack.
    tokio::time::sleep(Duration::from_millis(3000)).await;

    let a_calls = svc_a.state.inject_calls.lock().unwrap().clone();
    let b_calls = svc_b.state.inject_calls.lock().unwrap().clone();
    assert_eq!(a_calls.len(), 1);
    assert_eq!(b_calls.len(), 1);

    // Step one no earlier than its own delay, step two no earlier than the
    // cumulative sum.
    assert!(a_calls[0].0.duration_since(launched) >= Duration::from_secs(1));
    assert!(b_calls[0].0.duration_since(launched) >= Duration::from_secs(2));
    assert_eq!(b_calls[0].1, "degraded");
}

#[tokio::test]
async fn expired_failure_recovers_on_the_next_scan() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let dir = tempfile::tempdir().unwrap();
    let injector = injector_for(&[&svc_a], &dir).await;

    let scenario = custom_scenario(&["service_a".to_string()], FailureType::Down, 1);
    injector.inject_scenario(scenario).await.unwrap();
    assert_eq!(*svc_a.state.status.lock().unwrap(), "down");

    tokio::time::sleep(Duration::from_millis(1200)).await;
    injector.recovery_tick().await;

    assert!(injector.active_failures().await.is_empty());
    assert_eq!(svc_a.state.recover_calls.lock().unwrap().len(), 1);
    assert_eq!(*svc_a.state.status.lock().unwrap(), "healthy");
}

//! End-to-end tests for the incident pipeline against mock mesh services.

mod support;

use meshguardd::commander::{IncidentCommander, TriggerError};
use meshguardd::config::{LlmConfig, ServiceConfig};
use meshguardd::executor::PlanExecutor;
use meshguardd::graph::DependencyGraph;
use meshguardd::hooks::{CustomLogic, HeuristicLogic};
use meshguardd::llm::LlmClient;
use meshguardd::logs::EventLog;
use meshguardd::monitor::HealthMonitor;
use meshguardd::planner::Planner;
use meshguard_common::{
    ActionKind, Plan, PlanStep, Severity, StatusSnapshot, StepAction, StepStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct Harness {
    commander: Arc<IncidentCommander>,
    _dir: tempfile::TempDir,
}

async fn harness(configs: Vec<ServiceConfig>, llm: Option<LlmClient>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let services = Arc::new(configs);
    let graph = Arc::new(RwLock::new(
        DependencyGraph::from_services(&services).unwrap(),
    ));
    let event_log = Arc::new(EventLog::new(dir.path().join("events.jsonl")));
    let hooks: Arc<dyn CustomLogic> = Arc::new(HeuristicLogic);

    let monitor = HealthMonitor::new(
        Arc::clone(&services),
        Arc::clone(&graph),
        Arc::clone(&event_log),
    );
    let planner = Arc::new(Planner::new(llm, Arc::clone(&hooks)));
    let executor = Arc::new(PlanExecutor::new(
        Arc::clone(&services),
        Arc::clone(&hooks),
    ));
    let service_names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();

    let commander = Arc::new(IncidentCommander::new(
        graph,
        monitor,
        planner,
        Arc::clone(&executor),
        hooks,
        event_log,
        Duration::from_secs(1),
        Duration::from_secs(1),
        service_names,
    ));
    Harness {
        commander,
        _dir: dir,
    }
}

#[tokio::test]
async fn down_service_runs_all_five_stages_and_clears_the_slot() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let svc_b = support::spawn_service("service_b", "down").await;
    let configs = vec![
        support::service_config(&svc_a, &[]),
        support::service_config(&svc_b, &["service_a"]),
    ];
    let h = harness(configs, None).await;

    // Sweep once so the graph reflects the mock statuses, then detect.
    h.commander.detection_tick().await; // graph still all-unknown, no incident
    sweep(&h).await;
    h.commander.detection_tick().await;

    let history = h.commander.history().await;
    assert_eq!(history.len(), 1);
    assert!(h.commander.current_incident().await.is_none());

    let incident = &history[0];
    assert!(incident.diagnosis.is_some());
    assert!(incident.response_plan.is_some());
    assert!(incident.execution_result.is_some());
    assert!(incident.evaluation.is_some());
    assert!(incident.learning_result.is_some());
    assert!(incident.resolved_at.is_some());
    assert!(!incident.response_plan.as_ref().unwrap().is_failed());

    // The restart step in the fallback plan recovered service_b.
    assert!(!svc_b.state.recover_calls.lock().unwrap().is_empty());
}

async fn sweep(h: &Harness) {
    h.commander.sweep_once().await;
}

#[tokio::test]
async fn unreachable_llm_falls_back_to_the_fixed_plan() {
    let llm = LlmClient::new(&LlmConfig {
        base_url: "http://127.0.0.1:1/v1".into(),
        api_key: "none".into(),
        model: "test".into(),
        timeout_secs: 1,
    })
    .unwrap();
    let hooks: Arc<dyn CustomLogic> = Arc::new(HeuristicLogic);
    let planner = Planner::new(Some(llm), hooks);

    let mut snapshot = StatusSnapshot::new();
    snapshot.insert(
        "service_b".to_string(),
        meshguard_common::HealthReport::down("injected"),
    );

    let plan = planner
        .create_plan("inc-1", "service_b is down", &snapshot)
        .await
        .unwrap();
    assert_eq!(plan.estimated_resolution_time, "20 minutes");
    assert_eq!(plan.steps.len(), 3);
}

#[tokio::test]
async fn llm_plan_wrapped_in_prose_is_used() {
    let plan_json = serde_json::json!({
        "incident_id": "ignored",
        "severity": "high",
        "summary": "service_b outage",
        "steps": [
            {"step_id": 1, "action": "Restart failed services",
             "target_service": "service_b", "expected_outcome": "recovery",
             "priority": "high"}
        ],
        "estimated_resolution_time": "5 minutes"
    });
    let content = format!("Here is the plan you asked for:\n{plan_json}\nGood luck!");
    let base_url = support::spawn_llm(&content).await;

    let llm = LlmClient::new(&LlmConfig {
        base_url,
        api_key: "test".into(),
        model: "test".into(),
        timeout_secs: 5,
    })
    .unwrap();
    let hooks: Arc<dyn CustomLogic> = Arc::new(HeuristicLogic);
    let planner = Planner::new(Some(llm), hooks);

    let plan = planner
        .create_plan("inc-9", "service_b outage", &StatusSnapshot::new())
        .await
        .unwrap();
    assert_eq!(plan.incident_id, "inc-9");
    assert_eq!(plan.estimated_resolution_time, "5 minutes");
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].action.kind, ActionKind::Restart);
}

fn plan_with(steps: Vec<PlanStep>) -> Plan {
    Plan {
        incident_id: "inc-1".into(),
        severity: Severity::Medium,
        summary: "test".into(),
        steps,
        estimated_resolution_time: "5 minutes".into(),
    }
}

fn step(id: u32, action: &str, target: &str) -> PlanStep {
    PlanStep {
        step_id: id,
        action: StepAction::new(action),
        target_service: target.into(),
        expected_outcome: String::new(),
        priority: Severity::Medium,
    }
}

#[tokio::test]
async fn execution_stops_at_the_first_failed_step() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let configs = vec![support::service_config(&svc_a, &[])];
    let hooks: Arc<dyn CustomLogic> = Arc::new(HeuristicLogic);
    let executor = PlanExecutor::new(Arc::new(configs), hooks);

    let plan = plan_with(vec![
        step(1, "Investigate failed services", "all"),
        step(2, "escalate to vendor", "all"),
        step(3, "Verify system health", "all"),
    ]);

    let result = executor
        .execute_plan(&plan, &StatusSnapshot::new())
        .await
        .unwrap();
    assert_eq!(result.steps_executed, 2);
    assert_eq!(result.steps_successful, 1);
    assert_eq!(result.steps_failed, 1);
    assert_eq!(result.step_results[1].status, StepStatus::Failed);
}

#[tokio::test]
async fn verify_all_succeeds_with_one_healthy_service() {
    let healthy = support::spawn_service("service_a", "healthy").await;
    let down = support::spawn_service("service_b", "down").await;
    let configs = vec![
        support::service_config(&healthy, &[]),
        support::service_config(&down, &[]),
    ];
    let hooks: Arc<dyn CustomLogic> = Arc::new(HeuristicLogic);
    let executor = PlanExecutor::new(Arc::new(configs), hooks);

    let result = executor
        .execute_plan(
            &plan_with(vec![step(1, "Verify system health", "all")]),
            &StatusSnapshot::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.step_results[0].status, StepStatus::Success);

    // An explicit list is stricter: every named service must be healthy.
    let result = executor
        .execute_plan(
            &plan_with(vec![step(1, "Verify system health", "service_a,service_b")]),
            &StatusSnapshot::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.step_results[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn manual_trigger_runs_the_pipeline_in_the_background() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let configs = vec![support::service_config(&svc_a, &[])];
    let h = harness(configs, None).await;
    sweep(&h).await;

    let incident = Arc::clone(&h.commander)
        .trigger_manual(None, Some("drill".to_string()))
        .await
        .unwrap();
    assert!(incident.manual_trigger);
    assert_eq!(incident.affected_services, vec!["service_a"]);

    // Wait for the background pipeline to finish (3 steps, 1s pauses).
    let mut done = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        if h.commander.incident(&incident.id).await.is_some() {
            done = true;
            break;
        }
    }
    assert!(done, "pipeline did not complete in time");
    assert!(h.commander.current_incident().await.is_none());
}

#[tokio::test]
async fn detection_ticks_append_nothing_while_an_incident_is_active() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let svc_b = support::spawn_service("service_b", "down").await;
    let configs = vec![
        support::service_config(&svc_a, &[]),
        support::service_config(&svc_b, &[]),
    ];
    let h = harness(configs, None).await;
    sweep(&h).await;

    // The slot is claimed before trigger_manual returns.
    let incident = Arc::clone(&h.commander)
        .trigger_manual(Some(vec!["service_a".to_string()]), None)
        .await
        .unwrap();
    assert!(h.commander.current_incident().await.is_some());

    // Repeated ticks on the unchanged down condition are suppressed while
    // the slot is held, and a second trigger is refused.
    for _ in 0..5 {
        h.commander.detection_tick().await;
    }
    assert!(h.commander.history().await.is_empty());
    let err = Arc::clone(&h.commander)
        .trigger_manual(Some(vec!["service_b".to_string()]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TriggerError::Busy));

    let mut done = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        if h.commander.current_incident().await.is_none() {
            done = true;
            break;
        }
    }
    assert!(done, "pipeline did not complete in time");

    // Exactly one incident made it to history: the manual one.
    let history = h.commander.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, incident.id);
}

#[tokio::test]
async fn manual_trigger_rejects_unknown_services() {
    let svc_a = support::spawn_service("service_a", "healthy").await;
    let configs = vec![support::service_config(&svc_a, &[])];
    let h = harness(configs, None).await;

    let err = Arc::clone(&h.commander)
        .trigger_manual(Some(vec!["ghost".to_string()]), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ghost"));
}

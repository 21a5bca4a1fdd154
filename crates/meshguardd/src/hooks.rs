//! Pluggable custom logic around the incident pipeline.
//!
//! Each stage of the pipeline calls into this trait; the default
//! implementation produces deterministic heuristic payloads. Hook failures
//! are recorded by the caller and never abort the pipeline.

use crate::graph::DependencyGraph;
use anyhow::Result;
use meshguard_common::{
    ActionKind, ExecutionResult, Incident, Plan, PlanStep, ServiceStatus, Severity, StatusSnapshot,
    StepStatus, StepTarget,
};
use serde_json::{json, Value};

pub trait CustomLogic: Send + Sync {
    /// Diagnose the current situation before planning.
    fn diagnose(&self, snapshot: &StatusSnapshot, graph: &DependencyGraph) -> Result<Value>;

    /// Rewrite or augment a freshly created plan. Returning the plan
    /// unchanged is fine.
    fn refine_plan(&self, summary: &str, snapshot: &StatusSnapshot, plan: Plan) -> Result<Plan>;

    /// Observe a step about to execute. The result is recorded alongside the
    /// step but never gates execution.
    fn observe_step(&self, step: &PlanStep, snapshot: &StatusSnapshot) -> Result<Value>;

    /// Evaluate the response after execution.
    fn evaluate(
        &self,
        incident: &Incident,
        before: &StatusSnapshot,
        after: &StatusSnapshot,
    ) -> Result<Value>;

    /// Learn from accumulated execution history.
    fn learn(&self, executions: &[ExecutionResult], incidents: &[Incident]) -> Result<Value>;
}

/// Default deterministic heuristics.
pub struct HeuristicLogic;

fn healthy_count(snapshot: &StatusSnapshot) -> usize {
    snapshot
        .values()
        .filter(|r| r.status == ServiceStatus::Healthy)
        .count()
}

impl CustomLogic for HeuristicLogic {
    fn diagnose(&self, snapshot: &StatusSnapshot, graph: &DependencyGraph) -> Result<Value> {
        let unhealthy: Vec<&str> = snapshot
            .iter()
            .filter(|(_, r)| r.status.is_unhealthy())
            .map(|(name, _)| name.as_str())
            .collect();

        // For each unhealthy service, upstream dependencies that are down
        // are the likeliest root causes.
        let mut root_causes = serde_json::Map::new();
        for name in &unhealthy {
            let culprits: Vec<String> = graph
                .ancestors(name)
                .into_iter()
                .filter(|dep| {
                    graph
                        .node(dep)
                        .map(|n| n.status == ServiceStatus::Down)
                        .unwrap_or(false)
                })
                .collect();
            if !culprits.is_empty() {
                root_causes.insert((*name).to_string(), json!(culprits));
            }
        }

        Ok(json!({
            "unhealthy_services": unhealthy,
            "suspected_root_causes": root_causes,
            "healthy_services": healthy_count(snapshot),
            "total_services": snapshot.len(),
        }))
    }

    fn refine_plan(&self, _summary: &str, snapshot: &StatusSnapshot, plan: Plan) -> Result<Plan> {
        // Promote restart steps to high priority when any of their targets
        // is currently down.
        let mut refined = plan;
        for step in &mut refined.steps {
            if step.action.kind != ActionKind::Restart || step.priority == Severity::High {
                continue;
            }
            let targets_down = match step.target() {
                StepTarget::All => snapshot.values().any(|r| r.status == ServiceStatus::Down),
                StepTarget::Named(names) => names.iter().any(|n| {
                    snapshot
                        .get(n)
                        .map(|r| r.status == ServiceStatus::Down)
                        .unwrap_or(false)
                }),
            };
            if targets_down {
                step.priority = Severity::High;
            }
        }
        Ok(refined)
    }

    fn observe_step(&self, step: &PlanStep, snapshot: &StatusSnapshot) -> Result<Value> {
        let unhealthy_targets: Vec<&str> = match step.target() {
            StepTarget::All => snapshot
                .iter()
                .filter(|(_, r)| r.status.is_unhealthy())
                .map(|(name, _)| name.as_str())
                .collect(),
            StepTarget::Named(names) => names
                .iter()
                .filter(|n| {
                    snapshot
                        .get(n.as_str())
                        .map(|r| r.status.is_unhealthy())
                        .unwrap_or(false)
                })
                .filter_map(|n| snapshot.get_key_value(n.as_str()).map(|(k, _)| k.as_str()))
                .collect(),
        };
        Ok(json!({
            "step_id": step.step_id,
            "action_kind": step.action.kind,
            "unhealthy_targets": unhealthy_targets,
        }))
    }

    fn evaluate(
        &self,
        incident: &Incident,
        before: &StatusSnapshot,
        after: &StatusSnapshot,
    ) -> Result<Value> {
        let healthy_before = healthy_count(before);
        let healthy_after = healthy_count(after);
        let affected_recovered = incident
            .affected_services
            .iter()
            .filter(|name| {
                after
                    .get(name.as_str())
                    .map(|r| r.status == ServiceStatus::Healthy)
                    .unwrap_or(false)
            })
            .count();
        Ok(json!({
            "resolved": affected_recovered == incident.affected_services.len(),
            "affected_recovered": affected_recovered,
            "affected_total": incident.affected_services.len(),
            "healthy_before": healthy_before,
            "healthy_after": healthy_after,
            "improvement": healthy_after as i64 - healthy_before as i64,
        }))
    }

    fn learn(&self, executions: &[ExecutionResult], incidents: &[Incident]) -> Result<Value> {
        let total_steps: usize = executions.iter().map(|e| e.steps_executed).sum();
        let successful_steps: usize = executions.iter().map(|e| e.steps_successful).sum();
        let success_rate = if total_steps > 0 {
            successful_steps as f64 / total_steps as f64
        } else {
            0.0
        };

        let mut failed_actions: Vec<&str> = executions
            .iter()
            .flat_map(|e| &e.step_results)
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.action.as_str())
            .collect();
        failed_actions.dedup();

        Ok(json!({
            "executions_analyzed": executions.len(),
            "incidents_reviewed": incidents.len(),
            "step_success_rate": success_rate,
            "failing_actions": failed_actions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshguard_common::{HealthReport, IncidentKind, StepAction};

    fn snapshot(entries: &[(&str, ServiceStatus)]) -> StatusSnapshot {
        entries
            .iter()
            .map(|(name, status)| (name.to_string(), HealthReport::status(*status)))
            .collect()
    }

    #[test]
    fn diagnose_names_down_dependencies_as_root_causes() {
        let mut graph = DependencyGraph::new();
        graph.add_service("db", &[]);
        graph.add_service("api", &["db".into()]);
        graph
            .update_status("db", &HealthReport::status(ServiceStatus::Down))
            .unwrap();
        graph
            .update_status("api", &HealthReport::status(ServiceStatus::Degraded))
            .unwrap();

        let snap = snapshot(&[("db", ServiceStatus::Down), ("api", ServiceStatus::Degraded)]);
        let diagnosis = HeuristicLogic.diagnose(&snap, &graph).unwrap();
        assert_eq!(
            diagnosis["suspected_root_causes"]["api"],
            serde_json::json!(["db"])
        );
    }

    #[test]
    fn refine_promotes_restarts_targeting_down_services() {
        let plan = Plan {
            incident_id: "i".into(),
            severity: Severity::Medium,
            summary: "s".into(),
            steps: vec![PlanStep {
                step_id: 1,
                action: StepAction::new("Restart failed services"),
                target_service: "db".into(),
                expected_outcome: String::new(),
                priority: Severity::Medium,
            }],
            estimated_resolution_time: "20 minutes".into(),
        };
        let snap = snapshot(&[("db", ServiceStatus::Down)]);
        let refined = HeuristicLogic.refine_plan("s", &snap, plan).unwrap();
        assert_eq!(refined.steps[0].priority, Severity::High);
    }

    #[test]
    fn evaluate_reports_recovery() {
        let incident = Incident::new(
            IncidentKind::ServiceDown,
            Severity::High,
            vec!["db".into()],
            "db down",
        );
        let before = snapshot(&[("db", ServiceStatus::Down), ("api", ServiceStatus::Healthy)]);
        let after = snapshot(&[("db", ServiceStatus::Healthy), ("api", ServiceStatus::Healthy)]);
        let eval = HeuristicLogic.evaluate(&incident, &before, &after).unwrap();
        assert_eq!(eval["resolved"], serde_json::json!(true));
        assert_eq!(eval["improvement"], serde_json::json!(1));
    }
}

//! Sequential plan execution against the live mesh.
//!
//! Steps run in order with a short pause between them; the first failed step
//! stops the plan. A step naming a service that does not exist in the
//! registry is a configuration error and aborts execution entirely, which is
//! distinct from a step that ran and failed.

use crate::config::ServiceConfig;
use crate::hooks::CustomLogic;
use crate::monitor;
use anyhow::{anyhow, Result};
use chrono::Utc;
use meshguard_common::{
    ActionKind, ExecutionResult, Plan, PlanStep, ServiceStatus, StatusSnapshot, StepResult,
    StepStatus, StepTarget,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Timeout for recovery calls; more generous than health checks since the
/// service may be mid-restart.
const RECOVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between consecutive steps.
const STEP_PAUSE: Duration = Duration::from_secs(1);

pub struct PlanExecutor {
    client: Client,
    services: Arc<Vec<ServiceConfig>>,
    hooks: Arc<dyn CustomLogic>,
    history: RwLock<Vec<ExecutionResult>>,
}

impl PlanExecutor {
    pub fn new(services: Arc<Vec<ServiceConfig>>, hooks: Arc<dyn CustomLogic>) -> Self {
        Self {
            client: Client::new(),
            services,
            hooks,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Run every step of the plan in order, stopping at the first failure.
    /// Returns `Err` only for configuration errors (a step targeting a
    /// service not in the registry).
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        snapshot: &StatusSnapshot,
    ) -> Result<ExecutionResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let mut step_results = Vec::new();
        let mut current = snapshot.clone();

        for (index, step) in plan.steps.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(STEP_PAUSE).await;
            }

            let targets = self.resolve_targets(step)?;

            let observation = match self.hooks.observe_step(step, &current) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Step observation hook failed for step {}: {e}", step.step_id);
                    None
                }
            };

            let step_started = Instant::now();
            let outcome = self.run_step(step, &targets, &current).await;
            let elapsed = step_started.elapsed().as_secs_f64();

            let (status, error) = match outcome {
                Ok(()) => (StepStatus::Success, None),
                Err(e) => (StepStatus::Failed, Some(e)),
            };
            info!(
                "Step {} ({}) on {}: {:?}",
                step.step_id, step.action.text, step.target_service, status
            );

            step_results.push(StepResult {
                step_id: step.step_id,
                action: step.action.text.clone(),
                target_service: step.target_service.clone(),
                status,
                execution_time_secs: elapsed,
                error,
                observation,
            });

            if status == StepStatus::Failed {
                break;
            }

            // Refresh the view the remaining steps and their observations
            // act on.
            if index + 1 < plan.steps.len() {
                current = monitor::poll_services(&self.client, &self.services).await;
            }
        }

        let final_service_status = monitor::poll_services(&self.client, &self.services).await;
        let finished_at = Utc::now();
        let steps_successful = step_results
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count();

        let result = ExecutionResult {
            plan_id: plan.incident_id.clone(),
            started_at,
            finished_at,
            execution_time_secs: started.elapsed().as_secs_f64(),
            steps_executed: step_results.len(),
            steps_successful,
            steps_failed: step_results.len() - steps_successful,
            final_service_status,
            step_results,
        };

        self.history.write().await.push(result.clone());
        Ok(result)
    }

    /// Expand a step's target field into concrete registry entries.
    fn resolve_targets(&self, step: &PlanStep) -> Result<Vec<ServiceConfig>> {
        match step.target() {
            StepTarget::All => Ok(self.services.as_ref().clone()),
            StepTarget::Named(names) => names
                .iter()
                .map(|name| {
                    self.services
                        .iter()
                        .find(|s| &s.name == name)
                        .cloned()
                        .ok_or_else(|| {
                            anyhow!("Plan step {} targets unknown service {name}", step.step_id)
                        })
                })
                .collect(),
        }
    }

    /// Run one step; `Err` here means the step failed, not that execution
    /// must abort.
    async fn run_step(
        &self,
        step: &PlanStep,
        targets: &[ServiceConfig],
        snapshot: &StatusSnapshot,
    ) -> std::result::Result<(), String> {
        match step.action.kind {
            ActionKind::Restart => self.restart(targets).await,
            ActionKind::Investigate => self.investigate(targets).await,
            ActionKind::Verify => self.verify(step, targets, snapshot).await,
            ActionKind::Other => Err(format!("Unknown action: {}", step.action.text)),
        }
    }

    /// Trigger recovery on each target. Succeeds when at least one target
    /// acknowledged; a half-recovered mesh is progress, and verification
    /// comes later in the plan.
    async fn restart(&self, targets: &[ServiceConfig]) -> std::result::Result<(), String> {
        let mut successes = 0;
        let mut last_error = String::from("no targets");
        for svc in targets {
            let url = format!("{}/recover", svc.base_url);
            match self
                .client
                .post(&url)
                .timeout(RECOVER_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => successes += 1,
                Ok(resp) => {
                    last_error = format!("{}: HTTP {}", svc.name, resp.status().as_u16());
                    warn!("Recovery call to {} failed: HTTP {}", svc.name, resp.status());
                }
                Err(e) => {
                    last_error = format!("{}: {e}", svc.name);
                    warn!("Recovery call to {} failed: {e}", svc.name);
                }
            }
        }
        if successes > 0 {
            Ok(())
        } else {
            Err(format!("No service recovered ({last_error})"))
        }
    }

    /// Gather health, metrics, and dependency views from each target.
    /// Purely informational; the step only fails if there was nothing to
    /// investigate, and even an unreachable service yields a (down) finding.
    async fn investigate(&self, targets: &[ServiceConfig]) -> std::result::Result<(), String> {
        if targets.is_empty() {
            return Err("nothing to investigate".into());
        }
        for svc in targets {
            let report = monitor::poll_one(&self.client, svc).await;
            let metrics = self.fetch_json(&svc.base_url, "metrics").await;
            let dependencies = self.fetch_json(&svc.base_url, "dependencies").await;
            info!(
                "Investigation: {} is {} (metrics: {}, dependencies: {})",
                svc.name,
                report.status,
                metrics.map(|m| m.to_string()).unwrap_or_else(|| "unavailable".into()),
                dependencies
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "unavailable".into()),
            );
        }
        Ok(())
    }

    async fn fetch_json(&self, base_url: &str, path: &str) -> Option<serde_json::Value> {
        let response = self
            .client
            .get(format!("{base_url}/{path}"))
            .timeout(monitor::HEALTH_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    /// Check target health. The `"all"` wildcard asks whether the mesh has a
    /// pulse (any healthy service); an explicit list requires every named
    /// service healthy.
    async fn verify(
        &self,
        step: &PlanStep,
        targets: &[ServiceConfig],
        _snapshot: &StatusSnapshot,
    ) -> std::result::Result<(), String> {
        let mut unhealthy = Vec::new();
        let mut healthy = 0usize;
        for svc in targets {
            let report = monitor::poll_one(&self.client, svc).await;
            if report.status == ServiceStatus::Healthy {
                healthy += 1;
            } else {
                unhealthy.push(format!("{} ({})", svc.name, report.status));
            }
        }

        match step.target() {
            StepTarget::All => {
                if healthy > 0 {
                    Ok(())
                } else {
                    Err("no healthy services found".into())
                }
            }
            StepTarget::Named(_) => {
                if unhealthy.is_empty() {
                    Ok(())
                } else {
                    Err(format!("unhealthy: {}", unhealthy.join(", ")))
                }
            }
        }
    }

    pub async fn history(&self) -> Vec<ExecutionResult> {
        self.history.read().await.clone()
    }
}

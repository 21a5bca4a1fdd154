//! Incident commander: the sequential response pipeline and the loops that
//! feed it.
//!
//! One incident at a time: detected, diagnosed, planned, executed,
//! evaluated, learned from, then appended to history. Stage failures are
//! recorded inline and never abort the pipeline, except plan creation,
//! without which there is nothing to execute.

use crate::detector;
use crate::executor::PlanExecutor;
use crate::graph::DependencyGraph;
use crate::hooks::CustomLogic;
use crate::logs::EventLog;
use crate::monitor::HealthMonitor;
use crate::planner::Planner;
use chrono::Utc;
use meshguard_common::{
    CommanderStatus, Incident, IncidentKind, Severity, StageOutcome, StatusSnapshot,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Why a manual trigger was refused.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("an incident is already being handled")]
    Busy,
    #[error("unknown service '{0}'")]
    UnknownService(String),
}

pub struct IncidentCommander {
    graph: Arc<RwLock<DependencyGraph>>,
    monitor: HealthMonitor,
    planner: Arc<Planner>,
    executor: Arc<PlanExecutor>,
    hooks: Arc<dyn CustomLogic>,
    event_log: Arc<EventLog>,
    history: RwLock<Vec<Incident>>,
    current_incident: RwLock<Option<Incident>>,
    running: AtomicBool,
    health_interval: Duration,
    detection_interval: Duration,
    service_names: Vec<String>,
}

impl IncidentCommander {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<RwLock<DependencyGraph>>,
        monitor: HealthMonitor,
        planner: Arc<Planner>,
        executor: Arc<PlanExecutor>,
        hooks: Arc<dyn CustomLogic>,
        event_log: Arc<EventLog>,
        health_interval: Duration,
        detection_interval: Duration,
        service_names: Vec<String>,
    ) -> Self {
        Self {
            graph,
            monitor,
            planner,
            executor,
            hooks,
            event_log,
            history: RwLock::new(Vec::new()),
            current_incident: RwLock::new(None),
            running: AtomicBool::new(false),
            health_interval,
            detection_interval,
            service_names,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the health-polling and incident-detection loops.
    pub fn spawn_loops(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let commander = Arc::clone(&self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(commander.health_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if !commander.is_running() {
                    break;
                }
                commander.monitor.sweep().await;
            }
            info!("Health polling loop stopped");
        });

        let commander = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(commander.detection_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if !commander.is_running() {
                    break;
                }
                commander.detection_tick().await;
            }
            info!("Incident detection loop stopped");
        });
    }

    /// Run one health sweep immediately, outside the periodic loop.
    pub async fn sweep_once(&self) -> StatusSnapshot {
        self.monitor.sweep().await
    }

    /// One detection pass. While an incident is being handled, candidates
    /// are only used to confirm the condition persists; a fresh incident is
    /// handled only once the slot is free.
    pub async fn detection_tick(&self) {
        let current = self.current_incident.read().await.clone();
        let candidates = {
            let graph = self.graph.read().await;
            detector::detect_incidents(&graph)
        };

        let mut fresh = candidates
            .into_iter()
            .filter(|c| !detector::is_duplicate(c, current.as_ref()));

        if current.is_some() {
            return;
        }
        if let Some(incident) = fresh.next() {
            self.handle_incident(incident).await;
        }
    }

    /// Claim the active-incident slot under a single write lock. At most
    /// one pipeline runs at a time; a claim that loses the race fails.
    async fn try_claim(&self, incident: &Incident) -> bool {
        let mut slot = self.current_incident.write().await;
        if slot.is_some() {
            return false;
        }
        *slot = Some(incident.clone());
        true
    }

    /// Run the full pipeline for one incident. Does nothing if another
    /// incident claimed the slot first.
    pub async fn handle_incident(&self, incident: Incident) {
        if !self.try_claim(&incident).await {
            info!(
                "Incident {} dropped, another incident is already being handled",
                incident.id
            );
            return;
        }
        self.run_pipeline(incident).await;
    }

    /// The pipeline body. Caller must hold the active-incident slot.
    async fn run_pipeline(&self, mut incident: Incident) {
        info!(
            "Handling incident {} ({}): {}",
            incident.id, incident.kind, incident.summary
        );

        let before: StatusSnapshot = {
            let graph = self.graph.read().await;
            graph.status_snapshot()
        };

        // Diagnosing.
        incident.diagnosis = Some({
            let graph = self.graph.read().await;
            StageOutcome::from_result(self.hooks.diagnose(&before, &graph))
        });

        // Planning. This is the one stage whose failure aborts the pipeline:
        // everything downstream needs a plan.
        let plan = match self
            .planner
            .create_plan(&incident.id, &incident.summary, &before)
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                error!("Plan creation failed for incident {}: {e}", incident.id);
                incident.response_plan = Some(StageOutcome::Failed {
                    error: e.to_string(),
                });
                self.finalize(incident).await;
                return;
            }
        };
        incident.response_plan = Some(StageOutcome::Completed(plan.clone()));

        // Executing.
        let execution = self.executor.execute_plan(&plan, &before).await;
        let after = match &execution {
            Ok(result) => result.final_service_status.clone(),
            Err(_) => before.clone(),
        };
        incident.execution_result = Some(StageOutcome::from_result(execution));

        // Evaluating.
        incident.evaluation = Some(StageOutcome::from_result(self.hooks.evaluate(
            &incident,
            &before,
            &after,
        )));

        // Learning.
        let executions = self.executor.history().await;
        incident.learning_result = Some(StageOutcome::from_result(
            self.hooks
                .learn(&executions, std::slice::from_ref(&incident)),
        ));

        self.finalize(incident).await;
    }

    /// Close out an incident: stamp resolution, append to history and the
    /// event log, free the active slot.
    async fn finalize(&self, mut incident: Incident) {
        incident.resolved_at = Some(Utc::now());
        info!("Incident {} closed", incident.id);

        if let Err(e) = self.event_log.append_incident(&incident).await {
            warn!("Failed to log incident {}: {e}", incident.id);
        }
        self.history.write().await.push(incident);
        *self.current_incident.write().await = None;
    }

    /// Operator-triggered incident. Refused while another incident is being
    /// handled; the pipeline runs in the background and the incident shell
    /// is returned immediately. The slot is claimed before the spawn, so a
    /// trigger racing a detection tick can never start a second pipeline.
    pub async fn trigger_manual(
        self: Arc<Self>,
        affected_services: Option<Vec<String>>,
        summary: Option<String>,
    ) -> Result<Incident, TriggerError> {
        let affected = affected_services.unwrap_or_else(|| self.service_names.clone());
        for name in &affected {
            if !self.service_names.contains(name) {
                return Err(TriggerError::UnknownService(name.clone()));
            }
        }
        let summary =
            summary.unwrap_or_else(|| format!("Manual incident on {}", affected.join(", ")));

        let mut incident = Incident::new(IncidentKind::Custom, Severity::Medium, affected, summary);
        incident.manual_trigger = true;

        if !self.try_claim(&incident).await {
            return Err(TriggerError::Busy);
        }
        let handle = incident.clone();
        tokio::spawn(async move {
            self.run_pipeline(handle).await;
        });
        Ok(incident)
    }

    pub async fn status(&self) -> CommanderStatus {
        let (service_status, overall) = {
            let graph = self.graph.read().await;
            (graph.status_snapshot(), graph.health_summary())
        };
        CommanderStatus {
            running: self.is_running(),
            incidents_handled: self.history.read().await.len(),
            current_incident: self.current_incident.read().await.clone(),
            service_status,
            overall,
            timestamp: Utc::now(),
        }
    }

    pub async fn history(&self) -> Vec<Incident> {
        self.history.read().await.clone()
    }

    pub async fn incident(&self, id: &str) -> Option<Incident> {
        self.history
            .read()
            .await
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    pub async fn current_incident(&self) -> Option<Incident> {
        self.current_incident.read().await.clone()
    }
}

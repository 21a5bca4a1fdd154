//! Remediation planning: LLM-backed with a deterministic fallback.
//!
//! The LLM is an optional collaborator. Any failure along that path
//! (transport, no JSON in the reply, schema mismatch) falls back to a fixed
//! three-step plan, so planning itself only errs on internal bugs.

use crate::hooks::CustomLogic;
use crate::llm::LlmClient;
use anyhow::Result;
use chrono::{DateTime, Utc};
use meshguard_common::{jsonx, Plan, PlanStep, Severity, StatusSnapshot, StepAction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are an incident response planner for a service mesh. \
Given an incident summary and current service health, produce a remediation plan. \
Respond with a single JSON object and nothing else, shaped exactly like: \
{\"incident_id\": \"...\", \"severity\": \"low|medium|high\", \"summary\": \"...\", \
\"steps\": [{\"step_id\": 1, \"action\": \"...\", \"target_service\": \"<name, comma-list, or 'all'>\", \
\"expected_outcome\": \"...\", \"priority\": \"low|medium|high\"}], \
\"estimated_resolution_time\": \"...\"}. \
Actions should use the verbs restart, investigate, or verify.";

/// One planning decision, kept for the commander's status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    pub timestamp: DateTime<Utc>,
    pub incident_summary: String,
    pub plan: Plan,
    pub service_status: StatusSnapshot,
    pub custom_logic_applied: bool,
}

pub struct Planner {
    llm: Option<LlmClient>,
    hooks: Arc<dyn CustomLogic>,
    history: RwLock<Vec<PlanRecord>>,
}

impl Planner {
    pub fn new(llm: Option<LlmClient>, hooks: Arc<dyn CustomLogic>) -> Self {
        Self {
            llm,
            hooks,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Create a plan for an incident. The LLM path is attempted first; the
    /// deterministic fallback covers every way it can disappoint.
    pub async fn create_plan(
        &self,
        incident_id: &str,
        summary: &str,
        snapshot: &StatusSnapshot,
    ) -> Result<Plan> {
        let mut plan = match self.llm_plan(summary, snapshot).await {
            Some(plan) => plan,
            None => {
                info!("Using fallback plan for incident {incident_id}");
                fallback_plan(summary, snapshot)
            }
        };
        // The plan belongs to this incident no matter what the model said.
        plan.incident_id = incident_id.to_string();

        let (plan, custom_logic_applied) =
            match self.hooks.refine_plan(summary, snapshot, plan.clone()) {
                Ok(refined) => (refined, true),
                Err(e) => {
                    warn!("Plan refinement hook failed, keeping base plan: {e}");
                    (plan, false)
                }
            };

        self.history.write().await.push(PlanRecord {
            timestamp: Utc::now(),
            incident_summary: summary.to_string(),
            plan: plan.clone(),
            service_status: snapshot.clone(),
            custom_logic_applied,
        });

        Ok(plan)
    }

    async fn llm_plan(&self, summary: &str, snapshot: &StatusSnapshot) -> Option<Plan> {
        let llm = self.llm.as_ref()?;

        let snapshot_json = serde_json::to_string_pretty(snapshot).ok()?;
        let user = format!(
            "Incident: {summary}\n\nCurrent service health:\n{snapshot_json}\n\nProduce the remediation plan."
        );

        let completion = match llm.chat(SYSTEM_PROMPT, &user).await {
            Ok(text) => text,
            Err(e) => {
                warn!("LLM planning request failed: {e}");
                return None;
            }
        };

        let json = match jsonx::extract_json(&completion) {
            Some(json) => json,
            None => {
                warn!("LLM reply contained no JSON object");
                return None;
            }
        };

        match serde_json::from_str::<Plan>(json) {
            Ok(plan) if !plan.steps.is_empty() => Some(plan),
            Ok(_) => {
                warn!("LLM plan had no steps");
                None
            }
            Err(e) => {
                warn!("LLM plan did not match the expected schema: {e}");
                None
            }
        }
    }

    pub async fn history(&self) -> Vec<PlanRecord> {
        self.history.read().await.clone()
    }
}

/// The deterministic plan used whenever the LLM path yields nothing usable.
pub fn fallback_plan(summary: &str, snapshot: &StatusSnapshot) -> Plan {
    let unhealthy: Vec<&str> = snapshot
        .iter()
        .filter(|(_, r)| r.status.is_unhealthy())
        .map(|(name, _)| name.as_str())
        .collect();
    let restart_target = if unhealthy.is_empty() {
        "all".to_string()
    } else {
        unhealthy.join(",")
    };

    Plan {
        incident_id: String::new(),
        severity: Severity::Medium,
        summary: summary.to_string(),
        steps: vec![
            PlanStep {
                step_id: 1,
                action: StepAction::new("Investigate failed services"),
                target_service: "all".into(),
                expected_outcome: "Identify root cause".into(),
                priority: Severity::High,
            },
            PlanStep {
                step_id: 2,
                action: StepAction::new("Restart failed services"),
                target_service: restart_target,
                expected_outcome: "Service recovery".into(),
                priority: Severity::High,
            },
            PlanStep {
                step_id: 3,
                action: StepAction::new("Verify system health"),
                target_service: "all".into(),
                expected_outcome: "All services healthy".into(),
                priority: Severity::Medium,
            },
        ],
        estimated_resolution_time: "20 minutes".into(),
    }
}

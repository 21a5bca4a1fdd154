//! Core data model: statuses, incidents, plans, failures, execution results.
//!
//! Entities are explicit structs with tagged variants; untyped JSON only
//! exists at the boundaries where it enters the system (LLM output, hook
//! payloads) and is validated on the way in.

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Health state reported by (or inferred for) a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
    Unknown,
}

impl ServiceStatus {
    /// Parse a wire status string. Anything unrecognized normalizes to
    /// `Unknown` rather than failing the whole payload.
    pub fn parse(s: &str) -> Self {
        match s {
            "healthy" => Self::Healthy,
            "degraded" => Self::Degraded,
            "down" => Self::Down,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Degraded | Self::Down)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ServiceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ServiceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// One observed health report for a single service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: ServiceStatus,
    pub observed_at: DateTime<Utc>,
    /// Reason string when the status was inferred from a transport failure
    /// or a non-200 response rather than reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
}

impl HealthReport {
    pub fn status(status: ServiceStatus) -> Self {
        Self {
            status,
            observed_at: Utc::now(),
            error: None,
            cpu: None,
            memory: None,
            error_rate: None,
        }
    }

    pub fn down(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::status(ServiceStatus::Down)
        }
    }
}

/// Snapshot of every configured service's last-known health, keyed by name.
pub type StatusSnapshot = BTreeMap<String, HealthReport>;

/// Aggregate health rolled up from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
    pub overall: OverallHealth,
}

/// Classification of a dependency edge, derived from the dependency's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeHealth {
    Healthy,
    Degraded,
    Broken,
}

/// A dependency edge with its current classification, for topology export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeState {
    /// The dependency.
    pub from: String,
    /// The dependent.
    pub to: String,
    pub state: EdgeHealth,
}

// ============================================================================
// Incidents
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    ServiceDown,
    ServiceDegraded,
    DependencyFailure,
    Custom,
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServiceDown => "service_down",
            Self::ServiceDegraded => "service_degraded",
            Self::DependencyFailure => "dependency_failure",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Outcome of one pipeline stage, recorded inline on the incident.
///
/// A failed stage never aborts the pipeline (plan creation excepted); its
/// error is captured here instead of propagating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageOutcome<T> {
    Failed { error: String },
    Completed(T),
}

impl<T> StageOutcome<T> {
    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Completed(v),
            Err(e) => Self::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(v) => Some(v),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// An incident as it moves through the response pipeline.
///
/// Stage fields are filled in progressively by the commander; once the
/// incident is appended to history it is never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub kind: IncidentKind,
    pub severity: Severity,
    pub affected_services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause_services: Option<Vec<String>>,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<StageOutcome<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_plan: Option<StageOutcome<Plan>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<StageOutcome<ExecutionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<StageOutcome<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_result: Option<StageOutcome<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual_trigger: bool,
}

impl Incident {
    pub fn new(
        kind: IncidentKind,
        severity: Severity,
        affected_services: Vec<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            affected_services,
            root_cause_services: None,
            summary: summary.into(),
            timestamp: Utc::now(),
            diagnosis: None,
            response_plan: None,
            execution_result: None,
            evaluation: None,
            learning_result: None,
            resolved_at: None,
            manual_trigger: false,
        }
    }

    /// Identity used for duplicate suppression: same kind, same affected
    /// services regardless of order.
    pub fn dedup_key(&self) -> (IncidentKind, BTreeSet<&str>) {
        (
            self.kind,
            self.affected_services.iter().map(String::as_str).collect(),
        )
    }

    pub fn is_duplicate_of(&self, other: &Incident) -> bool {
        self.dedup_key() == other.dedup_key()
    }
}

// ============================================================================
// Plans
// ============================================================================

/// What a plan step actually does, decided once when the step text enters
/// the system. Keyword matching lives here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Restart,
    Investigate,
    Verify,
    Other,
}

impl ActionKind {
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("restart") || lower.contains("recover") {
            Self::Restart
        } else if lower.contains("investigate") {
            Self::Investigate
        } else if lower.contains("verify") {
            Self::Verify
        } else {
            Self::Other
        }
    }
}

/// A step action: the original free text plus its classification.
///
/// Serializes as the bare text so plans round-trip bit-identically; the
/// classification is re-derived on deserialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepAction {
    pub text: String,
    pub kind: ActionKind,
}

impl StepAction {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = ActionKind::classify(&text);
        Self { text, kind }
    }
}

impl Serialize for StepAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for StepAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::new(text))
    }
}

/// Resolution of a step's `target_service` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    /// The `"all"` wildcard: every configured service.
    All,
    /// One or more explicitly named services.
    Named(Vec<String>),
}

impl StepTarget {
    /// Parse a target string: `"all"` is the wildcard, anything else is a
    /// comma-separated service list.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("all") {
            return Self::All;
        }
        Self::Named(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }
}

fn default_priority() -> Severity {
    Severity::Medium
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: u32,
    pub action: StepAction,
    pub target_service: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default = "default_priority")]
    pub priority: Severity,
}

impl PlanStep {
    pub fn target(&self) -> StepTarget {
        StepTarget::parse(&self.target_service)
    }
}

/// An ordered remediation plan. Read-only once handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub incident_id: String,
    pub severity: Severity,
    pub summary: String,
    pub steps: Vec<PlanStep>,
    pub estimated_resolution_time: String,
}

// ============================================================================
// Execution results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: u32,
    pub action: String,
    pub target_service: String,
    pub status: StepStatus,
    pub execution_time_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Side-channel output of the custom-logic hook; recorded, never gating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub execution_time_secs: f64,
    pub steps_executed: usize,
    pub steps_successful: usize,
    pub steps_failed: usize,
    pub final_service_status: StatusSnapshot,
    pub step_results: Vec<StepResult>,
}

// ============================================================================
// Failure injection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    Down,
    Degraded,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Down => f.write_str("down"),
            Self::Degraded => f.write_str("degraded"),
        }
    }
}

impl FailureType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "down" => Some(Self::Down),
            "degraded" => Some(Self::Degraded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    SingleService,
    Cascade,
    Load,
    Resource,
    Config,
    Network,
    Custom,
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SingleService => "single_service",
            Self::Cascade => "cascade",
            Self::Load => "load",
            Self::Resource => "resource",
            Self::Config => "config",
            Self::Network => "network",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl ScenarioKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single_service" => Some(Self::SingleService),
            "cascade" => Some(Self::Cascade),
            "load" => Some(Self::Load),
            "resource" => Some(Self::Resource),
            "config" => Some(Self::Config),
            "network" => Some(Self::Network),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// One step of a cascade sequence. `delay_secs` is slept before the inject
/// call, measured from completion of the previous step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeStep {
    pub service: String,
    pub failure_type: FailureType,
    pub delay_secs: u64,
}

/// A failure scenario from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub kind: ScenarioKind,
    pub target_services: Vec<String>,
    pub failure_type: FailureType,
    pub description: String,
    pub probability: f64,
    pub duration_secs: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sequence: Vec<CascadeStep>,
}

/// An injected failure while it is active. Removed from the active map
/// exactly once, when its duration elapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failure_id: String,
    pub scenario_id: String,
    pub scenario_name: String,
    pub kind: ScenarioKind,
    pub target_services: Vec<String>,
    pub failure_type: FailureType,
    pub start_time: DateTime<Utc>,
    pub duration_secs: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sequence: Vec<CascadeStep>,
}

impl FailureRecord {
    pub fn from_scenario(failure_id: impl Into<String>, scenario: &Scenario) -> Self {
        Self {
            failure_id: failure_id.into(),
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            kind: scenario.kind,
            target_services: scenario.target_services.clone(),
            failure_type: scenario.failure_type,
            start_time: Utc::now(),
            duration_secs: scenario.duration_secs,
            sequence: scenario.sequence.clone(),
        }
    }

    /// A failure's own duration is its sole recovery trigger.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.start_time).num_seconds() >= self.duration_secs as i64
    }
}

/// Lifecycle marker for a failure log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureEvent {
    Injected,
    Recovered,
}

impl fmt::Display for FailureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Injected => f.write_str("injected"),
            Self::Recovered => f.write_str("recovered"),
        }
    }
}

impl FailureEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "injected" => Some(Self::Injected),
            "recovered" => Some(Self::Recovered),
            _ => None,
        }
    }
}

/// One line of the append-only CSV failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureLogEntry {
    pub timestamp: DateTime<Utc>,
    pub failure_id: String,
    pub scenario_name: String,
    pub kind: ScenarioKind,
    pub target_services: Vec<String>,
    pub failure_type: FailureType,
    pub duration_secs: u64,
    pub status: FailureEvent,
}

impl FailureLogEntry {
    pub const CSV_HEADER: &'static str =
        "timestamp,failure_id,scenario_name,type,target_services,failure_type,duration,status";

    pub fn for_record(record: &FailureRecord, status: FailureEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            failure_id: record.failure_id.clone(),
            scenario_name: record.scenario_name.clone(),
            kind: record.kind,
            target_services: record.target_services.clone(),
            failure_type: record.failure_type,
            duration_secs: record.duration_secs,
            status,
        }
    }

    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.timestamp.to_rfc3339(),
            self.failure_id,
            self.scenario_name,
            self.kind,
            self.target_services.join(";"),
            self.failure_type,
            self.duration_secs,
            self.status,
        )
    }

    pub fn parse_csv_line(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(8, ',');
        let timestamp = DateTime::parse_from_rfc3339(parts.next()?)
            .ok()?
            .with_timezone(&Utc);
        let failure_id = parts.next()?.to_string();
        let scenario_name = parts.next()?.to_string();
        let kind = ScenarioKind::parse(parts.next()?)?;
        let target_services = parts
            .next()?
            .split(';')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let failure_type = FailureType::parse(parts.next()?)?;
        let duration_secs = parts.next()?.parse().ok()?;
        let status = FailureEvent::parse(parts.next()?)?;
        Some(Self {
            timestamp,
            failure_id,
            scenario_name,
            kind,
            target_services,
            failure_type,
            duration_secs,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalizes_unknown_strings() {
        assert_eq!(ServiceStatus::parse("healthy"), ServiceStatus::Healthy);
        assert_eq!(ServiceStatus::parse("down"), ServiceStatus::Down);
        assert_eq!(ServiceStatus::parse("exploded"), ServiceStatus::Unknown);
        assert_eq!(ServiceStatus::parse(""), ServiceStatus::Unknown);

        let report: HealthReport = serde_json::from_value(serde_json::json!({
            "status": "on-fire",
            "observed_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(report.status, ServiceStatus::Unknown);
    }

    #[test]
    fn action_classification() {
        assert_eq!(
            ActionKind::classify("Restart failed services"),
            ActionKind::Restart
        );
        assert_eq!(ActionKind::classify("recover the db"), ActionKind::Restart);
        assert_eq!(
            ActionKind::classify("Investigate failed services"),
            ActionKind::Investigate
        );
        assert_eq!(
            ActionKind::classify("Verify dependencies"),
            ActionKind::Verify
        );
        assert_eq!(ActionKind::classify("reticulate splines"), ActionKind::Other);
    }

    #[test]
    fn step_target_parsing() {
        assert_eq!(StepTarget::parse("all"), StepTarget::All);
        assert_eq!(StepTarget::parse(" ALL "), StepTarget::All);
        assert_eq!(
            StepTarget::parse("service_a"),
            StepTarget::Named(vec!["service_a".into()])
        );
        assert_eq!(
            StepTarget::parse("service_a, service_b"),
            StepTarget::Named(vec!["service_a".into(), "service_b".into()])
        );
    }

    #[test]
    fn plan_round_trip_preserves_steps() {
        let plan = Plan {
            incident_id: "inc-1".into(),
            severity: Severity::High,
            summary: "service_b is down".into(),
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
                    target_service: "service_b".into(),
                    expected_outcome: "Service recovery".into(),
                    priority: Severity::Medium,
                },
            ],
            estimated_resolution_time: "20 minutes".into(),
        };

        let wire = serde_json::to_string(&plan).unwrap();
        let parsed: Plan = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, plan);
        assert_eq!(parsed.steps[0].action.kind, ActionKind::Investigate);
        assert_eq!(parsed.steps[1].action.kind, ActionKind::Restart);
    }

    #[test]
    fn stage_outcome_serde() {
        let ok: StageOutcome<Plan> = StageOutcome::Failed {
            error: "llm unreachable".into(),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"error": "llm unreachable"}));

        let back: StageOutcome<Value> = serde_json::from_value(json).unwrap();
        assert!(back.is_failed());
    }

    #[test]
    fn incident_dedup_ignores_order() {
        let a = Incident::new(
            IncidentKind::ServiceDown,
            Severity::High,
            vec!["svc_a".into(), "svc_b".into()],
            "a and b down",
        );
        let mut b = Incident::new(
            IncidentKind::ServiceDown,
            Severity::High,
            vec!["svc_b".into(), "svc_a".into()],
            "b and a down",
        );
        assert!(a.is_duplicate_of(&b));

        b.kind = IncidentKind::ServiceDegraded;
        assert!(!a.is_duplicate_of(&b));
    }

    #[test]
    fn failure_log_csv_round_trip() {
        let entry = FailureLogEntry {
            timestamp: Utc::now(),
            failure_id: "manual_1700000000".into(),
            scenario_name: "Manual down failure".into(),
            kind: ScenarioKind::Custom,
            target_services: vec!["service_a".into(), "service_b".into()],
            failure_type: FailureType::Down,
            duration_secs: 120,
            status: FailureEvent::Injected,
        };

        let line = entry.to_csv_line();
        assert!(line.contains("service_a;service_b"));
        let parsed = FailureLogEntry::parse_csv_line(&line).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn failure_record_expiry() {
        let scenario = Scenario {
            id: "single_x_down".into(),
            name: "X Down".into(),
            kind: ScenarioKind::SingleService,
            target_services: vec!["x".into()],
            failure_type: FailureType::Down,
            description: String::new(),
            probability: 0.3,
            duration_secs: 60,
            sequence: Vec::new(),
        };
        let record = FailureRecord::from_scenario("f1", &scenario);
        assert!(!record.expired(record.start_time + chrono::Duration::seconds(59)));
        assert!(record.expired(record.start_time + chrono::Duration::seconds(60)));
    }
}

//! Request/response payloads for the commander and injector HTTP APIs.

use crate::types::{FailureType, StatusSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured error body returned at the API edge instead of raising past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommanderStatus {
    pub running: bool,
    pub incidents_handled: usize,
    pub current_incident: Option<crate::Incident>,
    pub service_status: StatusSnapshot,
    pub overall: crate::HealthSummary,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommanderHealth {
    pub status: String,
    pub commander_running: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerIncidentRequest {
    #[serde(default)]
    pub affected_services: Option<Vec<String>>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorHealth {
    pub status: String,
    pub injector_running: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorStatus {
    pub running: bool,
    pub active_failures_count: usize,
    pub scenarios_available: usize,
    pub last_injection: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectCustomFailureRequest {
    #[serde(default)]
    pub service_names: Vec<String>,
    pub failure_type: FailureType,
    // The wire field is `duration`.
    #[serde(rename = "duration", default = "default_custom_duration")]
    pub duration_secs: u64,
}

fn default_custom_duration() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectCustomFailureResponse {
    pub success: bool,
    pub failure_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearFailuresResponse {
    pub success: bool,
    pub message: String,
}

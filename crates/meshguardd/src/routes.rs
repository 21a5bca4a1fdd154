//! API routes for the commander and injector surfaces.

use crate::commander::TriggerError;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use meshguard_common::{
    ClearFailuresResponse, CommanderHealth, ErrorBody, FailureLogEntry, FailureRecord, Incident,
    InjectCustomFailureRequest, InjectCustomFailureResponse, InjectorHealth, InjectorStatus,
    TriggerIncidentRequest,
};
use std::sync::Arc;
use tracing::info;

type AppStateArc = Arc<AppState>;

const FAILURE_HISTORY_LIMIT: usize = 50;

// ============================================================================
// Commander Routes
// ============================================================================

pub fn commander_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(commander_health))
        .route("/status", get(commander_status))
        .route("/incident_history", get(incident_history))
        .route("/incident/:id", get(incident_by_id))
        .route("/trigger_incident", post(trigger_incident))
}

async fn commander_health(State(state): State<AppStateArc>) -> Json<CommanderHealth> {
    Json(CommanderHealth {
        status: "healthy".to_string(),
        commander_running: state.commander.is_running(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn commander_status(
    State(state): State<AppStateArc>,
) -> Json<meshguard_common::CommanderStatus> {
    Json(state.commander.status().await)
}

async fn incident_history(State(state): State<AppStateArc>) -> Json<Vec<Incident>> {
    Json(state.commander.history().await)
}

async fn incident_by_id(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Json<Incident>, (StatusCode, Json<ErrorBody>)> {
    match state.commander.incident(&id).await {
        Some(incident) => Ok(Json(incident)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new(format!("no incident with id '{id}'"))),
        )),
    }
}

async fn trigger_incident(
    State(state): State<AppStateArc>,
    body: Option<Json<TriggerIncidentRequest>>,
) -> Result<Json<Incident>, (StatusCode, Json<ErrorBody>)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    info!("Manual incident trigger requested");
    Arc::clone(&state.commander)
        .trigger_manual(req.affected_services, req.summary)
        .await
        .map(Json)
        .map_err(|e| {
            let code = match e {
                TriggerError::Busy => StatusCode::CONFLICT,
                TriggerError::UnknownService(_) => StatusCode::BAD_REQUEST,
            };
            (code, Json(ErrorBody::new(e.to_string())))
        })
}

// ============================================================================
// Injector Routes
// ============================================================================

pub fn injector_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(injector_health))
        .route("/status", get(injector_status))
        .route("/active_failures", get(active_failures))
        .route("/failure_history", get(failure_history))
        .route("/inject_custom_failure", post(inject_custom_failure))
        .route("/clear_all_failures", post(clear_all_failures))
}

async fn injector_health(State(state): State<AppStateArc>) -> Json<InjectorHealth> {
    Json(InjectorHealth {
        status: "healthy".to_string(),
        injector_running: state.injector.is_running(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn injector_status(State(state): State<AppStateArc>) -> Json<InjectorStatus> {
    Json(InjectorStatus {
        running: state.injector.is_running(),
        active_failures_count: state.injector.active_count().await,
        scenarios_available: state.injector.scenarios_available(),
        last_injection: state.injector.last_injection().await,
    })
}

async fn active_failures(State(state): State<AppStateArc>) -> Json<Vec<FailureRecord>> {
    Json(state.injector.active_failures().await)
}

async fn failure_history(
    State(state): State<AppStateArc>,
) -> Result<Json<Vec<FailureLogEntry>>, (StatusCode, Json<ErrorBody>)> {
    state
        .injector
        .failure_history(FAILURE_HISTORY_LIMIT)
        .await
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(e.to_string())),
            )
        })
}

async fn inject_custom_failure(
    State(state): State<AppStateArc>,
    Json(req): Json<InjectCustomFailureRequest>,
) -> Result<Json<InjectCustomFailureResponse>, (StatusCode, Json<ErrorBody>)> {
    if req.service_names.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("service_names is required")),
        ));
    }

    match state
        .injector
        .inject_custom(&req.service_names, req.failure_type, req.duration_secs)
        .await
    {
        Ok(record) => Ok(Json(InjectCustomFailureResponse {
            success: true,
            failure_id: record.failure_id.clone(),
            message: format!(
                "Injected {} failure into {} for {}s",
                record.failure_type,
                record.target_services.join(", "),
                record.duration_secs
            ),
        })),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new(e.to_string())),
        )),
    }
}

async fn clear_all_failures(State(state): State<AppStateArc>) -> Json<ClearFailuresResponse> {
    let cleared = state.injector.clear_all().await;
    Json(ClearFailuresResponse {
        success: true,
        message: format!("Cleared {cleared} active failures"),
    })
}

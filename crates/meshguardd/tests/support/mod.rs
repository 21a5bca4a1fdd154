//! Shared fixtures: an in-process mock mesh service and a mock LLM endpoint.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use meshguardd::config::ServiceConfig;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Observable state of one mock mesh service.
pub struct MockServiceState {
    pub status: Mutex<String>,
    pub recover_calls: Mutex<Vec<Instant>>,
    pub inject_calls: Mutex<Vec<(Instant, String)>>,
}

pub struct MockService {
    pub name: String,
    pub base_url: String,
    pub state: Arc<MockServiceState>,
}

#[derive(Deserialize)]
struct InjectQuery {
    failure_type: String,
}

/// Spin up a mock service on an ephemeral port. It speaks the collaborator
/// contract: /health reports its current status, /inject_failure flips it,
/// /recover restores it to healthy.
pub async fn spawn_service(name: &str, initial_status: &str) -> MockService {
    let state = Arc::new(MockServiceState {
        status: Mutex::new(initial_status.to_string()),
        recover_calls: Mutex::new(Vec::new()),
        inject_calls: Mutex::new(Vec::new()),
    });

    let service_name = name.to_string();
    let app_state = Arc::clone(&state);
    let app = Router::new()
        .route(
            "/health",
            get({
                let name = service_name.clone();
                move |State(state): State<Arc<MockServiceState>>| async move {
                    let status = state.status.lock().unwrap().clone();
                    Json(serde_json::json!({
                        "service": name,
                        "status": status,
                        "timestamp": chrono::Utc::now(),
                        "cpu": 12.5,
                        "memory": 40.0,
                        "error_rate": 0.01,
                    }))
                }
            }),
        )
        .route(
            "/metrics",
            get(|State(state): State<Arc<MockServiceState>>| async move {
                let status = state.status.lock().unwrap().clone();
                Json(serde_json::json!({
                    "cpu": 12.5,
                    "memory": 40.0,
                    "error_rate": if status == "healthy" { 0.01 } else { 0.35 },
                }))
            }),
        )
        .route(
            "/dependencies",
            get(|| async { Json(serde_json::json!({"dependencies": {}})) }),
        )
        .route(
            "/recover",
            post(|State(state): State<Arc<MockServiceState>>| async move {
                state.recover_calls.lock().unwrap().push(Instant::now());
                *state.status.lock().unwrap() = "healthy".to_string();
                Json(serde_json::json!({"success": true}))
            }),
        )
        .route(
            "/inject_failure",
            post(
                |State(state): State<Arc<MockServiceState>>, Query(q): Query<InjectQuery>| async move {
                    state
                        .inject_calls
                        .lock()
                        .unwrap()
                        .push((Instant::now(), q.failure_type.clone()));
                    *state.status.lock().unwrap() = q.failure_type;
                    Json(serde_json::json!({"success": true}))
                },
            ),
        )
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockService {
        name: name.to_string(),
        base_url: format!("http://{addr}"),
        state,
    }
}

/// A chat-completions endpoint that always returns the given content.
pub async fn spawn_llm(content: &str) -> String {
    let content = content.to_string();
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let content = content.clone();
            async move {
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": content}}]
                }))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

pub fn service_config(mock: &MockService, dependencies: &[&str]) -> ServiceConfig {
    ServiceConfig {
        name: mock.name.clone(),
        base_url: mock.base_url.clone(),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        health_retries: 0,
        retry_backoff_ms: 0,
    }
}

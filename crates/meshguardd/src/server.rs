//! HTTP servers for meshguardd: commander and injector listen separately.

use crate::commander::IncidentCommander;
use crate::injector::FailureInjector;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers.
pub struct AppState {
    pub commander: Arc<IncidentCommander>,
    pub injector: Arc<FailureInjector>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(commander: Arc<IncidentCommander>, injector: Arc<FailureInjector>) -> Self {
        Self {
            commander,
            injector,
            start_time: Instant::now(),
        }
    }
}

/// Router for the commander API surface.
pub fn commander_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::commander_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Router for the injector API surface.
pub fn injector_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::injector_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run both API surfaces until one of them fails.
pub async fn run(state: AppState, commander_port: u16, injector_port: u16) -> Result<()> {
    let state = Arc::new(state);
    let commander_app = commander_app(Arc::clone(&state));
    let injector_app = injector_app(state);

    // Bind to localhost only for security
    let commander_addr = format!("127.0.0.1:{commander_port}");
    let injector_addr = format!("127.0.0.1:{injector_port}");

    let commander_listener = tokio::net::TcpListener::bind(&commander_addr)
        .await
        .with_context(|| format!("Failed to bind commander API on {commander_addr}"))?;
    let injector_listener = tokio::net::TcpListener::bind(&injector_addr)
        .await
        .with_context(|| format!("Failed to bind injector API on {injector_addr}"))?;

    info!("  Commander API listening on http://{}", commander_addr);
    info!("  Injector API listening on http://{}", injector_addr);

    tokio::try_join!(
        async {
            axum::serve(commander_listener, commander_app)
                .await
                .context("Commander API server failed")
        },
        async {
            axum::serve(injector_listener, injector_app)
                .await
                .context("Injector API server failed")
        },
    )?;
    Ok(())
}

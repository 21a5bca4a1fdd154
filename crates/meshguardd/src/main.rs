//! meshguardd - service mesh incident commander daemon
//!
//! Polls a simulated service mesh, detects incidents over the dependency
//! graph, plans and executes remediation, and injects failures to keep the
//! pipeline honest.

use anyhow::{Context, Result};
use meshguardd::commander::IncidentCommander;
use meshguardd::config::DaemonConfig;
use meshguardd::executor::PlanExecutor;
use meshguardd::graph::DependencyGraph;
use meshguardd::hooks::{CustomLogic, HeuristicLogic};
use meshguardd::injector::scenarios::ScenarioCatalog;
use meshguardd::injector::FailureInjector;
use meshguardd::llm::LlmClient;
use meshguardd::logs::{EventLog, FailureLog};
use meshguardd::monitor::HealthMonitor;
use meshguardd::planner::Planner;
use meshguardd::server::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("meshguardd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = DaemonConfig::load().context("Failed to load configuration")?;

    // A cyclic dependency declaration is fatal at startup.
    let graph = DependencyGraph::from_services(&config.services)
        .context("Invalid service dependency graph")?;
    let graph = Arc::new(RwLock::new(graph));
    info!(
        "Dependency graph built: {} services",
        config.services.len()
    );

    let services = Arc::new(config.services.clone());
    let event_log = Arc::new(EventLog::new(config.data_dir.join("logs/events.jsonl")));
    let failure_log = Arc::new(FailureLog::new(config.data_dir.join("logs/failures.csv")));
    let hooks: Arc<dyn CustomLogic> = Arc::new(HeuristicLogic);

    let llm = match LlmClient::new(&config.llm) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("LLM client unavailable, planning falls back to the fixed plan: {e}");
            None
        }
    };

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

    let commander = Arc::new(IncidentCommander::new(
        Arc::clone(&graph),
        monitor,
        planner,
        executor,
        Arc::clone(&hooks),
        event_log,
        Duration::from_secs(config.health_check_interval_secs),
        Duration::from_secs(config.detection_interval_secs),
        config.service_names(),
    ));

    let catalog = {
        let mut rng = rand::thread_rng();
        ScenarioCatalog::generate(&services, &mut rng)
    };
    info!("Scenario catalog generated: {} scenarios", catalog.len());

    let injector = Arc::new(FailureInjector::new(
        Arc::clone(&services),
        catalog,
        failure_log,
        Duration::from_secs(config.failure_injection_interval_secs),
        Duration::from_secs(config.recovery_scan_interval_secs),
        config.failure_probability,
    ));

    Arc::clone(&commander).spawn_loops();
    Arc::clone(&injector).spawn_loops();

    let state = AppState::new(Arc::clone(&commander), Arc::clone(&injector));
    let server = tokio::spawn(server::run(
        state,
        config.commander_port,
        config.injector_port,
    ));

    info!("meshguardd ready");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down gracefully");
    commander.stop();
    injector.stop();
    server.abort();

    Ok(())
}

//! Health polling against the service collaborators.
//!
//! A timeout, connection error, or non-200 response all map the service to
//! down (with a distinct reason string); a 200 with a JSON body promotes the
//! declared status verbatim. One service failing to answer never blocks or
//! invalidates polling of the others.

use crate::config::ServiceConfig;
use crate::graph::DependencyGraph;
use crate::logs::EventLog;
use meshguard_common::{HealthReport, ServiceStatus, StatusSnapshot};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Per-request timeout for health checks.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll every configured service once. Failures are isolated per request.
pub async fn poll_services(client: &Client, services: &[ServiceConfig]) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::new();
    for svc in services {
        let report = poll_one(client, svc).await;
        snapshot.insert(svc.name.clone(), report);
    }
    snapshot
}

/// Poll a single service, retrying per its configuration before reporting
/// it down. Retries use a fixed backoff; most services get none.
pub async fn poll_one(client: &Client, svc: &ServiceConfig) -> HealthReport {
    let attempts = svc.health_retries + 1;
    let mut last = HealthReport::down("no attempt made");
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(svc.retry_backoff_ms)).await;
        }
        last = check_health(client, svc).await;
        if last.status != ServiceStatus::Down {
            return last;
        }
        debug!(
            "Health check attempt {}/{} for {} failed: {:?}",
            attempt + 1,
            attempts,
            svc.name,
            last.error
        );
    }
    last
}

async fn check_health(client: &Client, svc: &ServiceConfig) -> HealthReport {
    let url = format!("{}/health", svc.base_url);
    let response = match client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
        Ok(resp) => resp,
        Err(e) => {
            return HealthReport::down(format!("connection failed: {e}"));
        }
    };

    if !response.status().is_success() {
        return HealthReport::down(format!("HTTP {}", response.status().as_u16()));
    }

    match response.json::<Value>().await {
        Ok(body) => {
            let status = body
                .get("status")
                .and_then(Value::as_str)
                .map(ServiceStatus::parse)
                .unwrap_or(ServiceStatus::Unknown);
            let mut report = HealthReport::status(status);
            report.cpu = body.get("cpu").and_then(Value::as_f64);
            report.memory = body.get("memory").and_then(Value::as_f64);
            report.error_rate = body.get("error_rate").and_then(Value::as_f64);
            report
        }
        Err(e) => {
            let mut report = HealthReport::status(ServiceStatus::Unknown);
            report.error = Some(format!("malformed health body: {e}"));
            report
        }
    }
}

/// Periodic health sweeps writing into the shared dependency graph and the
/// append-only event log.
pub struct HealthMonitor {
    client: Client,
    services: Arc<Vec<ServiceConfig>>,
    graph: Arc<RwLock<DependencyGraph>>,
    event_log: Arc<EventLog>,
}

impl HealthMonitor {
    pub fn new(
        services: Arc<Vec<ServiceConfig>>,
        graph: Arc<RwLock<DependencyGraph>>,
        event_log: Arc<EventLog>,
    ) -> Self {
        Self {
            client: Client::new(),
            services,
            graph,
            event_log,
        }
    }

    /// One full sweep: poll everything, then apply the results to the graph.
    /// The graph lock is only taken after all polling completes.
    pub async fn sweep(&self) -> StatusSnapshot {
        let snapshot = poll_services(&self.client, &self.services).await;
        {
            let mut graph = self.graph.write().await;
            graph.apply_snapshot(&snapshot);
        }
        if let Err(e) = self.event_log.append_health(&snapshot).await {
            warn!("Failed to append health log entry: {e}");
        }
        snapshot
    }
}

//! Probabilistic failure injection and duration-based recovery.
//!
//! Two independent loops: injection (gated by `failure_probability` each
//! tick) and recovery (scanning active failures for expired durations).
//! Cascades run off-loop so a long sequence never delays the next tick.

pub mod scenarios;

use crate::config::ServiceConfig;
use crate::logs::FailureLog;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use meshguard_common::{
    FailureEvent, FailureLogEntry, FailureRecord, FailureType, Scenario, ScenarioKind,
};
use reqwest::Client;
use scenarios::ScenarioCatalog;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Timeout for inject/recover calls to service collaborators.
const INJECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FailureInjector {
    services: Arc<Vec<ServiceConfig>>,
    catalog: ScenarioCatalog,
    active: RwLock<HashMap<String, FailureRecord>>,
    failure_log: Arc<FailureLog>,
    client: Client,
    running: AtomicBool,
    injection_interval: Duration,
    recovery_interval: Duration,
    failure_probability: f64,
    last_injection: RwLock<Option<DateTime<Utc>>>,
}

impl FailureInjector {
    pub fn new(
        services: Arc<Vec<ServiceConfig>>,
        catalog: ScenarioCatalog,
        failure_log: Arc<FailureLog>,
        injection_interval: Duration,
        recovery_interval: Duration,
        failure_probability: f64,
    ) -> Self {
        Self {
            services,
            catalog,
            active: RwLock::new(HashMap::new()),
            failure_log,
            client: Client::new(),
            running: AtomicBool::new(false),
            injection_interval,
            recovery_interval,
            failure_probability,
            last_injection: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the injection and recovery loops. Both check the running flag
    /// at the top of every iteration and exit cooperatively.
    pub fn spawn_loops(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let injector = Arc::clone(&self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(injector.injection_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if !injector.is_running() {
                    break;
                }
                injector.injection_tick().await;
            }
            info!("Injection loop stopped");
        });

        let injector = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(injector.recovery_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if !injector.is_running() {
                    break;
                }
                injector.recovery_tick().await;
            }
            info!("Recovery loop stopped");
        });
    }

    /// One injection tick: probabilistic gate, then scenario selection. All
    /// random draws happen before the first await.
    async fn injection_tick(&self) {
        let scenario = {
            let mut rng = rand::thread_rng();
            use rand::Rng;
            if rng.gen::<f64>() >= self.failure_probability {
                None
            } else {
                self.catalog.pick(&mut rng).cloned()
            }
        };
        let Some(scenario) = scenario else {
            return;
        };

        if let Err(e) = self.inject_scenario(scenario).await {
            error!("Failure injection failed: {e}");
        }
    }

    /// Inject a scenario: simple scenarios hit every target immediately;
    /// cascades record up front and run their sequence in a spawned task.
    pub async fn inject_scenario(&self, scenario: Scenario) -> Result<FailureRecord> {
        let failure_id = format!("{}_{}", scenario.id, Utc::now().timestamp());
        let record = FailureRecord::from_scenario(&failure_id, &scenario);
        info!(
            "Injecting scenario '{}' ({}) on {}",
            scenario.name,
            scenario.kind,
            scenario.target_services.join(", ")
        );

        if record.kind == ScenarioKind::Cascade && !record.sequence.is_empty() {
            // Record covers the whole sequence duration from launch.
            self.register(record.clone()).await?;
            let client = self.client.clone();
            let services = Arc::clone(&self.services);
            let sequence = record.sequence.clone();
            tokio::spawn(async move {
                for step in sequence {
                    if step.delay_secs > 0 {
                        tokio::time::sleep(Duration::from_secs(step.delay_secs)).await;
                    }
                    inject_call(&client, &services, &step.service, step.failure_type).await;
                }
            });
        } else {
            for target in &record.target_services {
                self.inject_one(target, record.failure_type).await;
            }
            self.register(record.clone()).await?;
        }

        *self.last_injection.write().await = Some(record.start_time);
        Ok(record)
    }

    async fn register(&self, record: FailureRecord) -> Result<()> {
        let entry = FailureLogEntry::for_record(&record, FailureEvent::Injected);
        self.active
            .write()
            .await
            .insert(record.failure_id.clone(), record);
        self.failure_log.append(&entry).await
    }

    async fn inject_one(&self, service: &str, failure_type: FailureType) {
        inject_call(&self.client, &self.services, service, failure_type).await;
    }

    async fn recover_one(&self, service: &str) {
        let Some(svc) = self.services.iter().find(|s| s.name == service) else {
            warn!("Recovery target {service} is not in the registry");
            return;
        };
        let url = format!("{}/recover", svc.base_url);
        match self.client.post(&url).timeout(INJECT_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("Recovered {service}");
            }
            Ok(resp) => warn!(
                "Recovery call to {service} returned HTTP {}",
                resp.status().as_u16()
            ),
            Err(e) => warn!("Recovery call to {service} failed: {e}"),
        }
    }

    /// Remove expired failures and recover their targets. Expired records
    /// are drained under the write lock first so each recovers exactly once
    /// even if ticks overlap.
    pub async fn recovery_tick(&self) {
        let now = Utc::now();
        let expired: Vec<FailureRecord> = {
            let mut active = self.active.write().await;
            let ids: Vec<String> = active
                .values()
                .filter(|r| r.expired(now))
                .map(|r| r.failure_id.clone())
                .collect();
            ids.iter().filter_map(|id| active.remove(id)).collect()
        };

        for record in expired {
            info!(
                "Failure {} expired after {}s, recovering {}",
                record.failure_id,
                record.duration_secs,
                record.target_services.join(", ")
            );
            self.finish(record).await;
        }
    }

    /// Recover and remove every active failure immediately, regardless of
    /// remaining duration. Returns how many were cleared.
    pub async fn clear_all(&self) -> usize {
        let drained: Vec<FailureRecord> = {
            let mut active = self.active.write().await;
            active.drain().map(|(_, record)| record).collect()
        };
        let count = drained.len();
        for record in drained {
            self.finish(record).await;
        }
        count
    }

    async fn finish(&self, record: FailureRecord) {
        for target in &record.target_services {
            self.recover_one(target).await;
        }
        let entry = FailureLogEntry::for_record(&record, FailureEvent::Recovered);
        if let Err(e) = self.failure_log.append(&entry).await {
            warn!("Failed to log recovery of {}: {e}", record.failure_id);
        }
    }

    /// Manual injection: a one-off custom scenario through the simple path,
    /// bypassing the probabilistic gate.
    pub async fn inject_custom(
        &self,
        service_names: &[String],
        failure_type: FailureType,
        duration_secs: u64,
    ) -> Result<FailureRecord> {
        for name in service_names {
            if !self.services.iter().any(|s| &s.name == name) {
                return Err(anyhow!("unknown service '{name}'"));
            }
        }
        let mut scenario = scenarios::custom_scenario(service_names, failure_type, duration_secs);
        scenario.id = "manual".to_string();
        self.inject_scenario(scenario).await
    }

    pub async fn active_failures(&self) -> Vec<FailureRecord> {
        self.active.read().await.values().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn last_injection(&self) -> Option<DateTime<Utc>> {
        *self.last_injection.read().await
    }

    pub async fn failure_history(&self, limit: usize) -> Result<Vec<FailureLogEntry>> {
        self.failure_log.tail(limit).await
    }

    pub fn scenarios_available(&self) -> usize {
        self.catalog.len()
    }
}

/// Fire one inject call. Failures degrade nothing here; an unreachable
/// service is already indistinguishable from an injected one.
async fn inject_call(
    client: &Client,
    services: &[ServiceConfig],
    service: &str,
    failure_type: FailureType,
) {
    let Some(svc) = services.iter().find(|s| s.name == service) else {
        warn!("Inject target {service} is not in the registry");
        return;
    };
    let url = format!(
        "{}/inject_failure?failure_type={}",
        svc.base_url, failure_type
    );
    match client.post(&url).timeout(INJECT_TIMEOUT).send().await {
        Ok(resp) if resp.status().is_success() => {
            info!("Injected {failure_type} into {service}");
        }
        Ok(resp) => warn!(
            "Inject call to {service} returned HTTP {}",
            resp.status().as_u16()
        ),
        Err(e) => warn!("Inject call to {service} failed: {e}"),
    }
}

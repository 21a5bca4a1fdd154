//! Failure scenario catalog, generated from the configured registry.
//!
//! Catalog generation is the only place durations are randomized; selection
//! at injection time uses each scenario's declared probability.

use crate::config::ServiceConfig;
use meshguard_common::{CascadeStep, FailureType, Scenario, ScenarioKind};
use rand::Rng;

pub struct ScenarioCatalog {
    scenarios: Vec<Scenario>,
}

impl ScenarioCatalog {
    /// Build the catalog for a service registry. Durations are drawn once,
    /// here; every injection of a scenario reuses them.
    pub fn generate(services: &[ServiceConfig], rng: &mut impl Rng) -> Self {
        let mut scenarios = Vec::new();
        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();

        for svc in services {
            scenarios.push(Scenario {
                id: format!("single_{}_down", svc.name),
                name: format!("{} outage", svc.name),
                kind: ScenarioKind::SingleService,
                target_services: vec![svc.name.clone()],
                failure_type: FailureType::Down,
                description: format!("{} stops responding entirely", svc.name),
                probability: 0.3,
                duration_secs: rng.gen_range(30..=120),
                sequence: Vec::new(),
            });
            scenarios.push(Scenario {
                id: format!("single_{}_degraded", svc.name),
                name: format!("{} degradation", svc.name),
                kind: ScenarioKind::SingleService,
                target_services: vec![svc.name.clone()],
                failure_type: FailureType::Degraded,
                description: format!("{} responds slowly with elevated errors", svc.name),
                probability: 0.4,
                duration_secs: rng.gen_range(60..=300),
                sequence: Vec::new(),
            });
        }

        // One cascade per service with dependents: the dependency goes down,
        // then each dependent degrades in turn.
        for svc in services {
            let dependents: Vec<&ServiceConfig> = services
                .iter()
                .filter(|other| other.dependencies.iter().any(|d| d == &svc.name))
                .collect();
            if dependents.is_empty() {
                continue;
            }

            let mut sequence = vec![CascadeStep {
                service: svc.name.clone(),
                failure_type: FailureType::Down,
                delay_secs: 0,
            }];
            let mut targets = vec![svc.name.clone()];
            for dependent in &dependents {
                sequence.push(CascadeStep {
                    service: dependent.name.clone(),
                    failure_type: FailureType::Degraded,
                    delay_secs: rng.gen_range(3..=10),
                });
                targets.push(dependent.name.clone());
            }

            scenarios.push(Scenario {
                id: format!("cascade_{}", svc.name),
                name: format!("Cascade from {}", svc.name),
                kind: ScenarioKind::Cascade,
                target_services: targets,
                failure_type: FailureType::Down,
                description: format!(
                    "{} goes down and its dependents degrade in sequence",
                    svc.name
                ),
                probability: if dependents.len() > 1 { 0.15 } else { 0.2 },
                duration_secs: rng.gen_range(60..=180),
                sequence,
            });
        }

        let all: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        scenarios.push(Scenario {
            id: "load_spike".into(),
            name: "Mesh-wide load spike".into(),
            kind: ScenarioKind::Load,
            target_services: all.clone(),
            failure_type: FailureType::Degraded,
            description: "Traffic surge degrades every service".into(),
            probability: 0.1,
            duration_secs: 300,
            sequence: Vec::new(),
        });

        if let (Some(first), Some(last)) = (names.first(), names.last()) {
            let mut targets = vec![first.to_string()];
            if last != first {
                targets.push(last.to_string());
            }
            scenarios.push(Scenario {
                id: "memory_pressure".into(),
                name: "Memory pressure".into(),
                kind: ScenarioKind::Resource,
                target_services: targets,
                failure_type: FailureType::Degraded,
                description: "Memory exhaustion degrades edge services".into(),
                probability: 0.25,
                duration_secs: 180,
                sequence: Vec::new(),
            });
        }

        if let Some(first) = names.first() {
            scenarios.push(Scenario {
                id: "config_drift".into(),
                name: "Configuration drift".into(),
                kind: ScenarioKind::Config,
                target_services: vec![first.to_string()],
                failure_type: FailureType::Degraded,
                description: "A bad config push degrades the entry service".into(),
                probability: 0.2,
                duration_secs: 240,
                sequence: Vec::new(),
            });
        }

        if names.len() >= 2 {
            scenarios.push(Scenario {
                id: "network_partition".into(),
                name: "Network partition".into(),
                kind: ScenarioKind::Network,
                target_services: names[..2].iter().map(|n| n.to_string()).collect(),
                failure_type: FailureType::Down,
                description: "A partition cuts off part of the mesh".into(),
                probability: 0.1,
                duration_secs: 120,
                sequence: Vec::new(),
            });
        }

        Self { scenarios }
    }

    /// Probabilistic pick: scenarios whose declared probability beats an
    /// independent draw are candidates; if none qualify, fall back to a
    /// uniform pick so a triggered injection always yields a scenario.
    pub fn pick(&self, rng: &mut impl Rng) -> Option<&Scenario> {
        if self.scenarios.is_empty() {
            return None;
        }
        let eligible: Vec<&Scenario> = self
            .scenarios
            .iter()
            .filter(|s| rng.gen::<f64>() < s.probability)
            .collect();
        if eligible.is_empty() {
            let index = rng.gen_range(0..self.scenarios.len());
            self.scenarios.get(index)
        } else {
            let index = rng.gen_range(0..eligible.len());
            eligible.into_iter().nth(index)
        }
    }

    pub fn by_id(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn by_kind(&self, kind: meshguard_common::ScenarioKind) -> Vec<&Scenario> {
        self.scenarios.iter().filter(|s| s.kind == kind).collect()
    }

    pub fn all(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

/// One-off scenario for a manual injection. Probability 1.0 so it is always
/// eligible regardless of the catalog gate.
pub fn custom_scenario(
    service_names: &[String],
    failure_type: FailureType,
    duration_secs: u64,
) -> Scenario {
    Scenario {
        id: format!("custom_{}", service_names.join("_")),
        name: format!("Manual {failure_type} failure"),
        kind: ScenarioKind::Custom,
        target_services: service_names.to_vec(),
        failure_type,
        description: format!(
            "Manually injected {failure_type} on {}",
            service_names.join(", ")
        ),
        probability: 1.0,
        duration_secs,
        sequence: Vec::new(),
    }
}

//! Incident detection over current graph health.
//!
//! Pure derivation: given the graph's node statuses, emit candidate
//! incidents in registry order. Deduplication against the currently active
//! incident makes detection idempotent while a condition persists.

use crate::graph::DependencyGraph;
use meshguard_common::{Incident, IncidentKind, ServiceStatus, Severity};

/// Derive the candidate incident list from current graph health.
pub fn detect_incidents(graph: &DependencyGraph) -> Vec<Incident> {
    let mut incidents = Vec::new();

    let down: Vec<String> = graph
        .nodes()
        .filter(|n| n.status == ServiceStatus::Down)
        .map(|n| n.name.clone())
        .collect();

    if !down.is_empty() {
        incidents.push(Incident::new(
            IncidentKind::ServiceDown,
            Severity::High,
            down.clone(),
            format!("Services {} are down", down.join(", ")),
        ));
    }

    let degraded: Vec<String> = graph
        .nodes()
        .filter(|n| n.status == ServiceStatus::Degraded)
        .map(|n| n.name.clone())
        .collect();

    if !degraded.is_empty() {
        incidents.push(Incident::new(
            IncidentKind::ServiceDegraded,
            Severity::Medium,
            degraded.clone(),
            format!("Services {} are degraded", degraded.join(", ")),
        ));
    }

    // Dependency-caused degradation: one incident per service whose declared
    // dependencies include something down.
    for node in graph.nodes() {
        if node.dependencies.is_empty() {
            continue;
        }
        let down_deps: Vec<String> = node
            .dependencies
            .iter()
            .filter(|dep| down.contains(dep))
            .cloned()
            .collect();
        if down_deps.is_empty() {
            continue;
        }
        let mut incident = Incident::new(
            IncidentKind::DependencyFailure,
            Severity::Medium,
            vec![node.name.clone()],
            format!(
                "Service {} affected by down dependencies: {}",
                node.name,
                down_deps.join(", ")
            ),
        );
        incident.root_cause_services = Some(down_deps);
        incidents.push(incident);
    }

    incidents
}

/// An emitted incident is discarded when it matches the active incident's
/// kind and affected-service set.
pub fn is_duplicate(candidate: &Incident, active: Option<&Incident>) -> bool {
    match active {
        Some(current) => candidate.is_duplicate_of(current),
        None => false,
    }
}

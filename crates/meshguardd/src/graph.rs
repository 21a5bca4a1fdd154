//! Service dependency graph with last-known status per node.
//!
//! Edges run dependency → dependent and are immutable after construction.
//! Status writes come from the health monitor; everything derived (summary,
//! edge classification, blast radius) is recomputed on demand from current
//! node state, never cached.

use crate::config::ServiceConfig;
use chrono::{DateTime, Utc};
use meshguard_common::{
    EdgeHealth, EdgeState, HealthReport, HealthSummary, OverallHealth, ServiceStatus,
    StatusSnapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("dependency graph contains a cycle involving '{0}'")]
    Cycle(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNode {
    pub name: String,
    pub dependencies: Vec<String>,
    pub status: ServiceStatus,
    pub cpu: f64,
    pub memory: f64,
    pub error_rate: f64,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Registry insertion order; drives every deterministic iteration.
    order: Vec<String>,
    nodes: HashMap<String, ServiceNode>,
    /// dependency name → dependent names, in insertion order.
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from the configured registry. Fails on dependencies
    /// naming unconfigured services or on a cyclic topology; both are fatal
    /// configuration errors.
    pub fn from_services(services: &[ServiceConfig]) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for svc in services {
            graph.add_service(&svc.name, &svc.dependencies);
        }
        for svc in services {
            for dep in &svc.dependencies {
                if !graph.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownService(dep.clone()));
                }
            }
        }
        // Surface cycles at construction time instead of first use.
        graph.topological_order()?;
        Ok(graph)
    }

    pub fn add_service(&mut self, name: &str, dependencies: &[String]) {
        if self.nodes.contains_key(name) {
            return;
        }
        self.order.push(name.to_string());
        self.nodes.insert(
            name.to_string(),
            ServiceNode {
                name: name.to_string(),
                dependencies: dependencies.to_vec(),
                status: ServiceStatus::Unknown,
                cpu: 0.0,
                memory: 0.0,
                error_rate: 0.0,
                last_update: None,
                last_error: None,
            },
        );
        for dep in dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .push(name.to_string());
        }
    }

    pub fn update_status(&mut self, name: &str, report: &HealthReport) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| GraphError::UnknownService(name.to_string()))?;
        node.status = report.status;
        if let Some(cpu) = report.cpu {
            node.cpu = cpu;
        }
        if let Some(memory) = report.memory {
            node.memory = memory;
        }
        if let Some(error_rate) = report.error_rate {
            node.error_rate = error_rate;
        }
        node.last_update = Some(report.observed_at);
        node.last_error = report.error.clone();
        Ok(())
    }

    pub fn apply_snapshot(&mut self, snapshot: &StatusSnapshot) {
        for (name, report) in snapshot {
            // Snapshots only ever cover configured services.
            let _ = self.update_status(name, report);
        }
    }

    pub fn node(&self, name: &str) -> Option<&ServiceNode> {
        self.nodes.get(name)
    }

    /// Nodes in registry insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &ServiceNode> {
        self.order.iter().filter_map(|n| self.nodes.get(n))
    }

    pub fn service_names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        self.nodes()
            .map(|node| {
                let mut report = HealthReport::status(node.status);
                report.observed_at = node.last_update.unwrap_or_else(Utc::now);
                report.error = node.last_error.clone();
                report.cpu = Some(node.cpu);
                report.memory = Some(node.memory);
                report.error_rate = Some(node.error_rate);
                (node.name.clone(), report)
            })
            .collect()
    }

    /// Aggregate health: critical if anything is down, degraded if anything
    /// is degraded, healthy otherwise. Pure function of current node status.
    pub fn health_summary(&self) -> HealthSummary {
        let mut healthy = 0;
        let mut degraded = 0;
        let mut down = 0;
        for node in self.nodes() {
            match node.status {
                ServiceStatus::Healthy => healthy += 1,
                ServiceStatus::Degraded => degraded += 1,
                ServiceStatus::Down => down += 1,
                ServiceStatus::Unknown => {}
            }
        }
        let overall = if down > 0 {
            OverallHealth::Critical
        } else if degraded > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };
        HealthSummary {
            total: self.order.len(),
            healthy,
            degraded,
            down,
            overall,
        }
    }

    /// Transitive dependencies of `name`: the services it relies on, i.e.
    /// candidate root causes when it misbehaves. BFS discovery order.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        self.walk(name, |node| node.dependencies.clone())
    }

    /// Transitive dependents of `name`: the downstream blast radius of its
    /// failure. BFS discovery order.
    pub fn descendants(&self, name: &str) -> Vec<String> {
        self.walk(name, |node| {
            self.dependents.get(&node.name).cloned().unwrap_or_default()
        })
    }

    fn walk(&self, start: &str, neighbors: impl Fn(&ServiceNode) -> Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.to_string());
        seen.insert(start.to_string());
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for next in neighbors(node) {
                if seen.insert(next.clone()) {
                    out.push(next.clone());
                    queue.push_back(next);
                }
            }
        }
        out
    }

    /// Kahn topological sort over dependency → dependent edges: every
    /// service appears after all of its dependencies. A cycle in the
    /// configured edges is a fatal configuration error for the caller.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), self.nodes[name].dependencies.len()))
            .collect();

        let mut ready: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|name| in_degree[name] == 0)
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(name) = ready.pop_front() {
            sorted.push(name.to_string());
            if let Some(dependents) = self.dependents.get(name) {
                for dependent in dependents {
                    let degree = in_degree.get_mut(dependent.as_str()).unwrap_or_else(|| {
                        unreachable!("dependent edges only reference known nodes")
                    });
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent.as_str());
                    }
                }
            }
        }

        if sorted.len() != self.order.len() {
            let stuck = self
                .order
                .iter()
                .find(|name| !sorted.contains(name))
                .cloned()
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(sorted)
    }

    /// Every dependency edge with its current classification: broken when
    /// the dependency is down, degraded when degraded, healthy otherwise.
    pub fn edge_states(&self) -> Vec<EdgeState> {
        let mut edges = Vec::new();
        for node in self.nodes() {
            for dep in &node.dependencies {
                let dep_status = self
                    .nodes
                    .get(dep)
                    .map(|n| n.status)
                    .unwrap_or(ServiceStatus::Unknown);
                let state = match dep_status {
                    ServiceStatus::Down => EdgeHealth::Broken,
                    ServiceStatus::Degraded => EdgeHealth::Degraded,
                    _ => EdgeHealth::Healthy,
                };
                edges.push(EdgeState {
                    from: dep.clone(),
                    to: node.name.clone(),
                    state,
                });
            }
        }
        edges
    }
}

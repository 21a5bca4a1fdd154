//! Meshguard daemon - incident orchestration over a simulated service mesh.
//!
//! Polls service health into a dependency graph, detects incidents, plans
//! remediation (LLM-backed with a deterministic fallback), executes plans,
//! and drives cascading failures through the mesh via the injector.

pub mod commander;
pub mod config;
pub mod detector;
pub mod executor;
pub mod graph;
pub mod hooks;
pub mod injector;
pub mod llm;
pub mod logs;
pub mod monitor;
pub mod planner;
pub mod routes;
pub mod server;

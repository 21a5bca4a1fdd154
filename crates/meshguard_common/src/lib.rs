//! Meshguard Common - shared types and schemas for the mesh incident engine.
//!
//! Everything that crosses a boundary lives here: service statuses, incidents,
//! remediation plans, failure records, and the JSON extraction stage that
//! turns free-form LLM text into something parseable.

pub mod api;
pub mod jsonx;
pub mod types;

pub use api::*;
pub use types::*;

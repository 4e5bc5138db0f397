//! Core data model and process-wide settings for the aggregation runtime.
//!
//! This crate sits at the bottom of the dependency graph: types here are
//! shared by every other crate (storage, pipeline, jobs, saas, api) with no
//! dependencies running the other way, mirroring how the grounding
//! database's `aerolithdb-core` crate holds only types, node identity, and
//! configuration with no upward dependencies.

mod config;
mod types;

pub use config::*;
pub use types::*;

//! The execution engine: code materialization, the isolation boundary, and
//! the per-request orchestrator.

pub mod bundler;
pub mod executor;
pub mod sandbox;

//! Feature modules (feature-first organization)
//!
//! Each feature owns its domain types, ports, and infrastructure adapters.

pub mod entity_store;
pub mod lifecycle;
pub mod lineage_graph;
pub mod query_engine;

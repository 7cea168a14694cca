//! # ML Lineage Core
//!
//! Append-only lineage tracking for machine-learning workflows: datasets,
//! training runs, and models are immutable records; the lineage graph
//! (Dataset -> Run -> Model) is derived at read time from their reference
//! fields; model lifecycle is a forward-only stage machine persisted as an
//! append-only transition log.
//!
//! ## Architecture
//!
//! - `features::entity_store` - record store port plus SQLite and in-memory
//!   adapters
//! - `features::lineage_graph` - derived graph and breadth-first traversal
//! - `features::query_engine` - read-only lineage and provenance queries
//! - `features::lifecycle` - stage machine over the transition log
//! - `identity` - actor resolution (env var, OS user, `"unknown"`)
//! - `config` - backend selection and write-policy flags
//!
//! ## Example
//!
//! ```no_run
//! use lineage_core::{LineageConfig, LineageGraph, NewDataset, Stage};
//!
//! # async fn demo() -> lineage_core::Result<()> {
//! let store = LineageConfig::default().build_store()?;
//! let actor = lineage_core::resolve_actor();
//!
//! let dataset = store
//!     .create_dataset(NewDataset {
//!         name: "reviews".into(),
//!         version: "v1".into(),
//!         source: "s3://bucket/reviews/v1".into(),
//!         description: None,
//!         actor,
//!     })
//!     .await?;
//!
//! let graph = LineageGraph::new(store.clone());
//! let downstream = graph.descendants(&dataset.id).await?;
//! # let _ = (downstream, Stage::Registered);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod features;
pub mod identity;

pub use config::{BackendKind, LineageConfig, WritePolicy};
pub use errors::{ErrorKind, LineageError, Result};
pub use features::entity_store::{
    Dataset, DatasetId, Entity, EntityKind, InMemoryLineageStore, LineageStore, Model, ModelId,
    NewDataset, NewModel, NewRun, ParamValue, Run, RunId, SqliteLineageStore, Stage,
    StageTransition,
};
pub use features::lifecycle::LifecycleTracker;
pub use features::lineage_graph::LineageGraph;
pub use features::query_engine::{
    DatasetLineage, ProvenanceAction, ProvenanceEvent, QueryEngine,
};
pub use identity::{actor_fingerprint, resolve_actor};

//! Entity Store Feature
//!
//! Append-only store of lineage records (datasets, runs, models) plus the
//! model stage-transition log. Entities are immutable after creation apart
//! from the run metric/end-run exceptions; deletion does not exist.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    Dataset, DatasetId, Entity, EntityKind, Model, ModelId, NewDataset, NewModel, NewRun,
    ParamValue, Run, RunId, Stage, StageTransition,
};
pub use domain::ports::LineageStore;
pub use infrastructure::{InMemoryLineageStore, SqliteLineageStore};

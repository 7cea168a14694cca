//! Persistence port
//!
//! Port/Adapter pattern for backend flexibility:
//! - Production: SQLite (any store with atomic insert-if-absent works)
//! - Testing: InMemory
//!
//! Adapters must make every write atomic with respect to its integrity
//! checks: existence checks and the subsequent insert are observed by
//! concurrent callers as a single unit. Uniqueness is enforced by the
//! backend's conflict detection, never by a separate check-then-insert.

use async_trait::async_trait;

use super::models::{
    Dataset, Entity, EntityKind, Model, NewDataset, NewModel, NewRun, Run, Stage, StageTransition,
};
use crate::errors::{LineageError, Result};

/// Lineage record store (primary interface)
///
/// All storage backends must implement this trait. Records are append-only;
/// the only permitted mutations are metric upserts on an open run, the
/// one-time `ended_at` freeze, and appended stage transitions.
#[async_trait]
pub trait LineageStore: Send + Sync {
    // ── Writes ──────────────────────────────────────────────────────────

    /// Create a dataset. Fails with `Duplicate` if `(name, version)` exists.
    async fn create_dataset(&self, new: NewDataset) -> Result<Dataset>;

    /// Create a run. Fails with `Reference` if any referenced dataset is
    /// missing; nothing is written in that case.
    async fn create_run(&self, new: NewRun) -> Result<Run>;

    /// Upsert one metric key on an open run (last-write-wins per key).
    /// Fails with `InvalidState` once the run has ended.
    async fn record_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()>;

    /// Set `ended_at` exactly once, freezing metrics for all future reads.
    /// Fails with `InvalidState` if already ended.
    async fn end_run(&self, run_id: &str) -> Result<Run>;

    /// Create a model. Fails with `Reference` if the run is missing, or
    /// `InvalidState` if the run is still open and policy requires it to be
    /// ended. Atomically writes the `registered` sentinel transition.
    async fn create_model(&self, new: NewModel) -> Result<Model>;

    /// Append a stage transition, validating the state machine against the
    /// latest committed transition inside the same atomic unit.
    async fn append_transition(
        &self,
        model_id: &str,
        to_stage: Stage,
        actor: &str,
    ) -> Result<StageTransition>;

    // ── Point lookups ───────────────────────────────────────────────────

    async fn get_dataset(&self, id: &str) -> Result<Dataset>;

    async fn get_run(&self, id: &str) -> Result<Run>;

    async fn get_model(&self, id: &str) -> Result<Model>;

    /// Lookup a dataset by its natural key. The idempotent-retry companion
    /// to `create_dataset`: on `Duplicate`, fetch the existing record here.
    async fn find_dataset(&self, name: &str, version: &str) -> Result<Option<Dataset>>;

    /// Resolve an ID of unknown type to its entity.
    async fn find_entity(&self, id: &str) -> Result<Entity>;

    /// Typed point lookup.
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Entity> {
        match kind {
            EntityKind::Dataset => Ok(Entity::Dataset(self.get_dataset(id).await?)),
            EntityKind::Run => Ok(Entity::Run(self.get_run(id).await?)),
            EntityKind::Model => Ok(Entity::Model(self.get_model(id).await?)),
        }
    }

    /// Artifact reference for a model, returned verbatim as persisted.
    async fn artifact_ref(&self, model_id: &str) -> Result<String> {
        Ok(self.get_model(model_id).await?.artifact_ref)
    }

    // ── Transition log ──────────────────────────────────────────────────

    /// All transitions for a model, ordered by `(at, seq)`. Non-empty for
    /// every existing model (the sentinel is written with the model).
    async fn transitions(&self, model_id: &str) -> Result<Vec<StageTransition>>;

    /// Current stage: `to_stage` of the latest transition.
    async fn current_stage(&self, model_id: &str) -> Result<Stage> {
        let transitions = self.transitions(model_id).await?;
        transitions
            .last()
            .map(|t| t.to_stage)
            .ok_or_else(|| LineageError::not_found("model", model_id))
    }

    // ── Derived edges (read-time join over entity references) ──────────

    /// Runs whose `dataset_refs` include the dataset, ordered by start
    /// timestamp then id.
    async fn runs_consuming(&self, dataset_id: &str) -> Result<Vec<Run>>;

    /// Models whose `run_id` is the run, ordered by creation timestamp
    /// then id.
    async fn models_produced_by(&self, run_id: &str) -> Result<Vec<Model>>;

    // ── Listings ────────────────────────────────────────────────────────

    async fn list_datasets(&self) -> Result<Vec<Dataset>>;

    async fn list_runs(&self) -> Result<Vec<Run>>;

    async fn list_models(&self) -> Result<Vec<Model>>;
}

//! Lifecycle Feature
//!
//! Forward-only stage machine for models: registered -> staging ->
//! production -> archived, skips allowed, archived terminal. Stage is never
//! a mutable column; it is always derived from the append-only transition
//! log, so the full promotion history with actors survives forever.

use std::sync::Arc;

use crate::errors::Result;
use crate::features::entity_store::domain::models::{Stage, StageTransition};
use crate::features::entity_store::domain::ports::LineageStore;
use crate::identity::resolve_actor;

/// Model lifecycle operations over the transition log.
#[derive(Clone)]
pub struct LifecycleTracker {
    store: Arc<dyn LineageStore>,
}

impl LifecycleTracker {
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        Self { store }
    }

    /// Move a model to a later stage. The store validates against the latest
    /// committed transition atomically, so backward or repeated moves fail
    /// with `InvalidTransition` even under concurrent promotions.
    pub async fn promote(
        &self,
        model_id: &str,
        to_stage: Stage,
        actor: &str,
    ) -> Result<StageTransition> {
        self.store.append_transition(model_id, to_stage, actor).await
    }

    /// `promote` with the actor resolved from the current environment.
    pub async fn promote_as_current_actor(
        &self,
        model_id: &str,
        to_stage: Stage,
    ) -> Result<StageTransition> {
        let actor = resolve_actor();
        self.promote(model_id, to_stage, &actor).await
    }

    /// Terminal move; no transition ever leaves `archived`.
    pub async fn archive(&self, model_id: &str, actor: &str) -> Result<StageTransition> {
        self.promote(model_id, Stage::Archived, actor).await
    }

    /// The model's current stage (latest transition's target).
    pub async fn current_stage(&self, model_id: &str) -> Result<Stage> {
        self.store.current_stage(model_id).await
    }

    /// Full transition log, oldest first, sentinel included.
    pub async fn history(&self, model_id: &str) -> Result<Vec<StageTransition>> {
        self.store.transitions(model_id).await
    }
}

//! Query Engine Feature
//!
//! Read-only questions over the store and the derived graph: which models
//! came from a dataset, what produced a model, and the full provenance
//! trail of a model with actors and timestamps. Queries never write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::features::entity_store::domain::models::{
    Dataset, Entity, Model, Run, Stage, StageTransition,
};
use crate::features::entity_store::domain::ports::LineageStore;
use crate::features::lineage_graph::LineageGraph;

/// What happened at one point of a provenance trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProvenanceAction {
    DatasetRegistered,
    RunStarted,
    RunEnded,
    ModelRegistered,
    StageChanged { from: Stage, to: Stage },
}

/// One event in a model's provenance trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEvent {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub entity_id: String,
    #[serde(flatten)]
    pub action: ProvenanceAction,
}

/// A dataset together with everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetLineage {
    pub dataset: Dataset,
    /// Transitive outputs, nearest first
    pub descendants: Vec<Entity>,
}

/// Read-only lineage queries.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn LineageStore>,
    graph: LineageGraph,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        let graph = LineageGraph::new(store.clone());
        Self { store, graph }
    }

    /// Models transitively derived from a dataset.
    pub async fn models_trained_on(&self, dataset_id: &str) -> Result<Vec<Model>> {
        let descendants = self.graph.descendants(dataset_id).await?;
        Ok(descendants
            .into_iter()
            .filter_map(|entity| match entity {
                Entity::Model(model) => Some(model),
                _ => None,
            })
            .collect())
    }

    /// The run that produced a model.
    pub async fn run_for_model(&self, model_id: &str) -> Result<Run> {
        self.graph.producing_run(model_id).await
    }

    /// A model's current lifecycle stage.
    pub async fn current_stage(&self, model_id: &str) -> Result<Stage> {
        self.store.current_stage(model_id).await
    }

    /// A model's full transition log, oldest first (sentinel included).
    pub async fn stage_history(&self, model_id: &str) -> Result<Vec<StageTransition>> {
        self.store.transitions(model_id).await
    }

    /// Lookup a dataset by natural key and return its transitive outputs.
    pub async fn dataset_lineage(&self, name: &str, version: &str) -> Result<DatasetLineage> {
        let dataset = self
            .store
            .find_dataset(name, version)
            .await?
            .ok_or_else(|| {
                crate::errors::LineageError::not_found("dataset", format!("{}:{}", name, version))
            })?;
        let descendants = self.graph.descendants(&dataset.id).await?;
        Ok(DatasetLineage {
            dataset,
            descendants,
        })
    }

    /// The provenance trail of a model: dataset registrations, the producing
    /// run's start and end, the model registration, and every stage change,
    /// each with its actor, in chronological order.
    pub async fn model_provenance(&self, model_id: &str) -> Result<Vec<ProvenanceEvent>> {
        let model = self.store.get_model(model_id).await?;
        let run = self.store.get_run(&model.run_id).await?;

        let mut events = Vec::new();
        for dataset_id in &run.dataset_refs {
            let dataset = self.store.get_dataset(dataset_id).await?;
            events.push(ProvenanceEvent {
                at: dataset.created_at,
                actor: dataset.actor,
                entity_id: dataset.id,
                action: ProvenanceAction::DatasetRegistered,
            });
        }

        events.push(ProvenanceEvent {
            at: run.started_at,
            actor: run.actor.clone(),
            entity_id: run.id.clone(),
            action: ProvenanceAction::RunStarted,
        });
        if let Some(ended_at) = run.ended_at {
            events.push(ProvenanceEvent {
                at: ended_at,
                actor: run.actor.clone(),
                entity_id: run.id.clone(),
                action: ProvenanceAction::RunEnded,
            });
        }

        events.push(ProvenanceEvent {
            at: model.created_at,
            actor: model.actor.clone(),
            entity_id: model.id.clone(),
            action: ProvenanceAction::ModelRegistered,
        });

        // The sentinel carries no stage change; registration is already an
        // event of its own.
        for transition in self.store.transitions(model_id).await? {
            if transition.from_stage == transition.to_stage {
                continue;
            }
            events.push(ProvenanceEvent {
                at: transition.at,
                actor: transition.actor,
                entity_id: transition.model_id,
                action: ProvenanceAction::StageChanged {
                    from: transition.from_stage,
                    to: transition.to_stage,
                },
            });
        }

        events.sort_by(|a, b| a.at.cmp(&b.at));
        Ok(events)
    }
}

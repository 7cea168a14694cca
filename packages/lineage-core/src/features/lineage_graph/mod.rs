//! Lineage Graph Feature
//!
//! Read-only directed acyclic view over the entity store. Nodes are the
//! stored entities; edges are derived at read time from reference fields
//! (`Run.dataset_refs` for Dataset -> Run, `Model.run_id` for Run -> Model).
//! The graph has no independent write path, so it can never disagree with
//! the records it is derived from.

pub mod traversal;

use std::sync::Arc;

use crate::errors::Result;
use crate::features::entity_store::domain::models::{Dataset, Entity, Model, Run};
use crate::features::entity_store::domain::ports::LineageStore;
use traversal::{neighbors, traverse, Direction};

/// Derived lineage graph over a record store.
#[derive(Clone)]
pub struct LineageGraph {
    store: Arc<dyn LineageStore>,
}

impl LineageGraph {
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        Self { store }
    }

    /// Direct parents of an entity: the run behind a model, or the datasets
    /// behind a run (in `dataset_refs` order). Datasets have none.
    pub async fn parents(&self, id: &str) -> Result<Vec<Entity>> {
        let entity = self.store.find_entity(id).await?;
        neighbors(self.store.as_ref(), &entity, Direction::Up).await
    }

    /// Direct children of an entity: runs consuming a dataset, or models
    /// produced by a run. Models have none.
    pub async fn children(&self, id: &str) -> Result<Vec<Entity>> {
        let entity = self.store.find_entity(id).await?;
        neighbors(self.store.as_ref(), &entity, Direction::Down).await
    }

    /// All transitive inputs of an entity, nearest first, each entity once.
    pub async fn ancestors(&self, id: &str) -> Result<Vec<Entity>> {
        let entity = self.store.find_entity(id).await?;
        traverse(self.store.as_ref(), &entity, Direction::Up).await
    }

    /// All transitive outputs of an entity, nearest first, each entity once.
    pub async fn descendants(&self, id: &str) -> Result<Vec<Entity>> {
        let entity = self.store.find_entity(id).await?;
        traverse(self.store.as_ref(), &entity, Direction::Down).await
    }

    /// The run that produced a model.
    pub async fn producing_run(&self, model_id: &str) -> Result<Run> {
        let model = self.store.get_model(model_id).await?;
        self.store.get_run(&model.run_id).await
    }

    /// Datasets a run consumed, in `dataset_refs` order.
    pub async fn consumed_datasets(&self, run_id: &str) -> Result<Vec<Dataset>> {
        let run = self.store.get_run(run_id).await?;
        let mut datasets = Vec::with_capacity(run.dataset_refs.len());
        for dataset_id in &run.dataset_refs {
            datasets.push(self.store.get_dataset(dataset_id).await?);
        }
        Ok(datasets)
    }

    /// Runs consuming a dataset, ordered by start timestamp then id.
    pub async fn runs_consuming(&self, dataset_id: &str) -> Result<Vec<Run>> {
        self.store.runs_consuming(dataset_id).await
    }

    /// Models produced by a run, ordered by creation timestamp then id.
    pub async fn models_produced_by(&self, run_id: &str) -> Result<Vec<Model>> {
        self.store.models_produced_by(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::errors::ErrorKind;
    use crate::features::entity_store::domain::models::{NewDataset, NewModel, NewRun};
    use crate::features::entity_store::infrastructure::InMemoryLineageStore;

    async fn seed(store: &InMemoryLineageStore) -> (Dataset, Dataset, Run, Model) {
        let d1 = store
            .create_dataset(NewDataset {
                name: "reviews".to_string(),
                version: "v1".to_string(),
                source: "s3://bucket/reviews/v1".to_string(),
                description: None,
                actor: "alice".to_string(),
            })
            .await
            .unwrap();
        let d2 = store
            .create_dataset(NewDataset {
                name: "labels".to_string(),
                version: "v1".to_string(),
                source: "s3://bucket/labels/v1".to_string(),
                description: None,
                actor: "alice".to_string(),
            })
            .await
            .unwrap();
        let run = store
            .create_run(NewRun {
                name: Some("baseline".to_string()),
                dataset_refs: vec![d1.id.clone(), d2.id.clone()],
                parameters: BTreeMap::new(),
                code_ref: None,
                actor: "alice".to_string(),
            })
            .await
            .unwrap();
        store.end_run(&run.id).await.unwrap();
        let model = store
            .create_model(NewModel {
                name: "sentiment".to_string(),
                artifact_ref: "s3://bucket/m1.bin".to_string(),
                run_id: run.id.clone(),
                actor: "alice".to_string(),
            })
            .await
            .unwrap();
        (d1, d2, run, model)
    }

    #[tokio::test]
    async fn test_ancestors_nearest_first() {
        let store = InMemoryLineageStore::new();
        let (d1, d2, run, model) = seed(&store).await;
        let graph = LineageGraph::new(Arc::new(store));

        let ancestors = graph.ancestors(&model.id).await.unwrap();
        let ids: Vec<&str> = ancestors.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![run.id.as_str(), d1.id.as_str(), d2.id.as_str()]);

        assert!(graph.ancestors(&d1.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_descendants_from_dataset() {
        let store = InMemoryLineageStore::new();
        let (d1, _d2, run, model) = seed(&store).await;
        let graph = LineageGraph::new(Arc::new(store));

        let descendants = graph.descendants(&d1.id).await.unwrap();
        let ids: Vec<&str> = descendants.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![run.id.as_str(), model.id.as_str()]);

        assert!(graph.descendants(&model.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_ancestor_appears_once() {
        let store = InMemoryLineageStore::new();
        let (d1, d2, run_a, _model) = seed(&store).await;

        // Second run consuming the same datasets
        let run_b = store
            .create_run(NewRun {
                name: None,
                dataset_refs: vec![d1.id.clone(), d2.id.clone()],
                parameters: BTreeMap::new(),
                code_ref: None,
                actor: "bob".to_string(),
            })
            .await
            .unwrap();

        let graph = LineageGraph::new(Arc::new(store));
        let children = graph.children(&d1.id).await.unwrap();
        let ids: Vec<&str> = children.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![run_a.id.as_str(), run_b.id.as_str()]);

        // Both runs reach d1 and d2; each dataset still appears once
        let descendants = graph.descendants(&d1.id).await.unwrap();
        assert_eq!(
            descendants.iter().filter(|e| e.id() == run_b.id).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let store = InMemoryLineageStore::new();
        let graph = LineageGraph::new(Arc::new(store));
        let err = graph.ancestors("mdl-missing").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_consumed_datasets_preserve_ref_order() {
        let store = InMemoryLineageStore::new();
        let (d1, d2, run, model) = seed(&store).await;
        let graph = LineageGraph::new(Arc::new(store));

        let datasets = graph.consumed_datasets(&run.id).await.unwrap();
        let ids: Vec<&str> = datasets.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![d1.id.as_str(), d2.id.as_str()]);

        let producing = graph.producing_run(&model.id).await.unwrap();
        assert_eq!(producing.id, run.id);
    }
}

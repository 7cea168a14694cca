//! In-memory lineage store
//!
//! Volatile backend for tests and demos. One `RwLock` guards all tables, so
//! each write sees and mutates a consistent snapshot: the existence checks
//! and the insert happen under a single write guard, mirroring the
//! transaction boundary of the SQLite adapter.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::config::WritePolicy;
use crate::errors::{LineageError, Result};
use crate::features::entity_store::domain::models::{
    generate_record_id, Dataset, Entity, Model, NewDataset, NewModel, NewRun, Run, Stage,
    StageTransition,
};
use crate::features::entity_store::domain::ports::LineageStore;

#[derive(Default)]
struct Inner {
    datasets: HashMap<String, Dataset>,
    /// Natural-key index: (name, version) -> dataset id
    dataset_keys: HashMap<(String, String), String>,
    runs: HashMap<String, Run>,
    models: HashMap<String, Model>,
    /// Transition log per model, in append order
    transitions: HashMap<String, Vec<StageTransition>>,
}

/// In-memory LineageStore implementation
#[derive(Clone)]
pub struct InMemoryLineageStore {
    inner: Arc<RwLock<Inner>>,
    policy: WritePolicy,
}

impl Default for InMemoryLineageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLineageStore {
    pub fn new() -> Self {
        Self::with_policy(WritePolicy::default())
    }

    pub fn with_policy(policy: WritePolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            policy,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| LineageError::internal("lineage store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| LineageError::internal("lineage store lock poisoned"))
    }
}

fn append_transition_record(
    inner: &mut Inner,
    model_id: &str,
    from_stage: Stage,
    to_stage: Stage,
    actor: &str,
    seq: u64,
) -> StageTransition {
    let transition = StageTransition {
        id: generate_record_id("st"),
        model_id: model_id.to_string(),
        from_stage,
        to_stage,
        actor: actor.to_string(),
        at: Utc::now(),
        seq,
    };
    inner
        .transitions
        .entry(model_id.to_string())
        .or_default()
        .push(transition.clone());
    transition
}

#[async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn create_dataset(&self, new: NewDataset) -> Result<Dataset> {
        new.validate()?;
        let mut inner = self.write()?;

        let key = (new.name.clone(), new.version.clone());
        if inner.dataset_keys.contains_key(&key) {
            return Err(LineageError::duplicate(format!(
                "dataset already exists: {}:{}",
                new.name, new.version
            )));
        }

        let dataset = Dataset {
            id: Dataset::generate_id(&new.name, &new.version),
            name: new.name,
            version: new.version,
            source: new.source,
            description: new.description,
            actor: new.actor,
            created_at: Utc::now(),
        };
        // Same guarantee as the SQLite PRIMARY KEY: an id collision must
        // reject the write, never edit the committed record in place.
        if inner.datasets.contains_key(&dataset.id) {
            return Err(LineageError::duplicate(format!(
                "dataset id already exists: {}",
                dataset.id
            )));
        }
        inner.dataset_keys.insert(key, dataset.id.clone());
        inner.datasets.insert(dataset.id.clone(), dataset.clone());

        debug!(dataset_id = %dataset.id, name = %dataset.name, version = %dataset.version, "dataset created");
        Ok(dataset)
    }

    async fn create_run(&self, new: NewRun) -> Result<Run> {
        new.validate()?;
        let dataset_refs = new.deduplicated_refs();
        let mut inner = self.write()?;

        for dataset_id in &dataset_refs {
            if !inner.datasets.contains_key(dataset_id) {
                return Err(LineageError::reference(format!(
                    "run references unknown dataset: {}",
                    dataset_id
                )));
            }
        }

        let run = Run {
            id: generate_record_id("run"),
            name: new.name,
            dataset_refs,
            parameters: new.parameters,
            code_ref: new.code_ref,
            metrics: BTreeMap::new(),
            actor: new.actor,
            started_at: Utc::now(),
            ended_at: None,
        };
        inner.runs.insert(run.id.clone(), run.clone());

        debug!(run_id = %run.id, datasets = run.dataset_refs.len(), "run created");
        Ok(run)
    }

    async fn record_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()> {
        let mut inner = self.write()?;
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| LineageError::not_found("run", run_id))?;
        if run.is_ended() {
            return Err(LineageError::invalid_state(format!(
                "run {} has ended; metrics are frozen",
                run_id
            )));
        }
        run.metrics.insert(key.to_string(), value);

        debug!(run_id, key, value, "metric recorded");
        Ok(())
    }

    async fn end_run(&self, run_id: &str) -> Result<Run> {
        let mut inner = self.write()?;
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| LineageError::not_found("run", run_id))?;
        if run.is_ended() {
            return Err(LineageError::invalid_state(format!(
                "run {} has already been ended",
                run_id
            )));
        }
        run.ended_at = Some(Utc::now());
        let run = run.clone();

        info!(run_id, "run ended; metrics and parameters frozen");
        Ok(run)
    }

    async fn create_model(&self, new: NewModel) -> Result<Model> {
        new.validate()?;
        let mut inner = self.write()?;

        let run = inner.runs.get(&new.run_id).ok_or_else(|| {
            LineageError::reference(format!("model references unknown run: {}", new.run_id))
        })?;
        if self.policy.require_ended_run && !run.is_ended() {
            return Err(LineageError::invalid_state(format!(
                "run {} has not ended; cannot register a model from it",
                new.run_id
            )));
        }

        let model = Model {
            id: generate_record_id("mdl"),
            name: new.name,
            artifact_ref: new.artifact_ref,
            run_id: new.run_id,
            actor: new.actor,
            created_at: Utc::now(),
        };
        inner.models.insert(model.id.clone(), model.clone());

        // Sentinel transition, written under the same guard as the model
        let actor = model.actor.clone();
        append_transition_record(
            &mut inner,
            &model.id,
            Stage::Registered,
            Stage::Registered,
            &actor,
            1,
        );

        info!(model_id = %model.id, run_id = %model.run_id, "model registered");
        Ok(model)
    }

    async fn append_transition(
        &self,
        model_id: &str,
        to_stage: Stage,
        actor: &str,
    ) -> Result<StageTransition> {
        let mut inner = self.write()?;

        if !inner.models.contains_key(model_id) {
            return Err(LineageError::not_found("model", model_id));
        }

        let (current, last_seq) = inner
            .transitions
            .get(model_id)
            .and_then(|log| log.last())
            .map(|t| (t.to_stage, t.seq))
            .ok_or_else(|| {
                LineageError::internal(format!("model {} has no sentinel transition", model_id))
            })?;

        if !current.can_transition_to(to_stage) {
            return Err(LineageError::invalid_transition(format!(
                "cannot move model {} from {} to {}",
                model_id, current, to_stage
            )));
        }

        let transition =
            append_transition_record(&mut inner, model_id, current, to_stage, actor, last_seq + 1);

        info!(model_id, from = %transition.from_stage, to = %transition.to_stage, actor, "stage transition");
        Ok(transition)
    }

    async fn get_dataset(&self, id: &str) -> Result<Dataset> {
        let inner = self.read()?;
        inner
            .datasets
            .get(id)
            .cloned()
            .ok_or_else(|| LineageError::not_found("dataset", id))
    }

    async fn get_run(&self, id: &str) -> Result<Run> {
        let inner = self.read()?;
        inner
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| LineageError::not_found("run", id))
    }

    async fn get_model(&self, id: &str) -> Result<Model> {
        let inner = self.read()?;
        inner
            .models
            .get(id)
            .cloned()
            .ok_or_else(|| LineageError::not_found("model", id))
    }

    async fn find_dataset(&self, name: &str, version: &str) -> Result<Option<Dataset>> {
        let inner = self.read()?;
        let dataset = inner
            .dataset_keys
            .get(&(name.to_string(), version.to_string()))
            .and_then(|id| inner.datasets.get(id))
            .cloned();
        Ok(dataset)
    }

    async fn find_entity(&self, id: &str) -> Result<Entity> {
        let inner = self.read()?;
        if let Some(dataset) = inner.datasets.get(id) {
            return Ok(Entity::Dataset(dataset.clone()));
        }
        if let Some(run) = inner.runs.get(id) {
            return Ok(Entity::Run(run.clone()));
        }
        if let Some(model) = inner.models.get(id) {
            return Ok(Entity::Model(model.clone()));
        }
        Err(LineageError::not_found("entity", id))
    }

    async fn transitions(&self, model_id: &str) -> Result<Vec<StageTransition>> {
        let inner = self.read()?;
        let mut log = inner.transitions.get(model_id).cloned().unwrap_or_default();
        log.sort_by(|a, b| (a.at, a.seq).cmp(&(b.at, b.seq)));
        Ok(log)
    }

    async fn runs_consuming(&self, dataset_id: &str) -> Result<Vec<Run>> {
        let inner = self.read()?;
        let mut runs: Vec<Run> = inner
            .runs
            .values()
            .filter(|run| run.dataset_refs.iter().any(|d| d == dataset_id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        Ok(runs)
    }

    async fn models_produced_by(&self, run_id: &str) -> Result<Vec<Model>> {
        let inner = self.read()?;
        let mut models: Vec<Model> = inner
            .models
            .values()
            .filter(|model| model.run_id == run_id)
            .cloned()
            .collect();
        models.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(models)
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let inner = self.read()?;
        let mut datasets: Vec<Dataset> = inner.datasets.values().cloned().collect();
        datasets.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(datasets)
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let inner = self.read()?;
        let mut runs: Vec<Run> = inner.runs.values().cloned().collect();
        runs.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        Ok(runs)
    }

    async fn list_models(&self) -> Result<Vec<Model>> {
        let inner = self.read()?;
        let mut models: Vec<Model> = inner.models.values().cloned().collect();
        models.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn new_dataset(name: &str, version: &str) -> NewDataset {
        NewDataset {
            name: name.to_string(),
            version: version.to_string(),
            source: format!("s3://bucket/{}/{}", name, version),
            description: None,
            actor: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_by_natural_key() {
        let store = InMemoryLineageStore::new();
        store.create_dataset(new_dataset("reviews", "v1")).await.unwrap();

        let err = store
            .create_dataset(new_dataset("reviews", "v1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);

        // Different version is a new record
        store.create_dataset(new_dataset("reviews", "v2")).await.unwrap();
        assert_eq!(store.list_datasets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_separator_in_key_fields_never_clobbers() {
        let store = InMemoryLineageStore::new();
        let first = store.create_dataset(new_dataset("a:b", "c")).await.unwrap();
        let second = store.create_dataset(new_dataset("a", "b:c")).await.unwrap();
        assert_ne!(first.id, second.id);

        // Both committed records survive, fields intact
        let one = store.get_dataset(&first.id).await.unwrap();
        assert_eq!((one.name.as_str(), one.version.as_str()), ("a:b", "c"));
        let two = store.get_dataset(&second.id).await.unwrap();
        assert_eq!((two.name.as_str(), two.version.as_str()), ("a", "b:c"));
        assert_eq!(store.list_datasets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_dataset_by_key() {
        let store = InMemoryLineageStore::new();
        let created = store.create_dataset(new_dataset("reviews", "v1")).await.unwrap();

        let found = store.find_dataset("reviews", "v1").await.unwrap();
        assert_eq!(found, Some(created));
        assert_eq!(store.find_dataset("reviews", "v9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dataset_refs_deduplicated_in_order() {
        let store = InMemoryLineageStore::new();
        let d1 = store.create_dataset(new_dataset("reviews", "v1")).await.unwrap();
        let d2 = store.create_dataset(new_dataset("labels", "v1")).await.unwrap();

        let run = store
            .create_run(NewRun {
                name: None,
                dataset_refs: vec![d1.id.clone(), d2.id.clone(), d1.id.clone()],
                parameters: BTreeMap::new(),
                code_ref: None,
                actor: "alice".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(run.dataset_refs, vec![d1.id, d2.id]);
    }

    #[tokio::test]
    async fn test_transition_monotonicity() {
        let store = InMemoryLineageStore::new();
        let d1 = store.create_dataset(new_dataset("reviews", "v1")).await.unwrap();
        let run = store
            .create_run(NewRun {
                name: None,
                dataset_refs: vec![d1.id],
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
                run_id: run.id,
                actor: "alice".to_string(),
            })
            .await
            .unwrap();

        store
            .append_transition(&model.id, Stage::Production, "bob")
            .await
            .unwrap();

        // Backward move rejected
        let err = store
            .append_transition(&model.id, Stage::Staging, "bob")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);

        // Same stage rejected
        let err = store
            .append_transition(&model.id, Stage::Production, "bob")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);

        // Archived is terminal
        store
            .append_transition(&model.id, Stage::Archived, "bob")
            .await
            .unwrap();
        let err = store
            .append_transition(&model.id, Stage::Production, "bob")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);

        let log = store.transitions(&model.id).await.unwrap();
        let seqs: Vec<u64> = log.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(store.current_stage(&model.id).await.unwrap(), Stage::Archived);
    }

    #[tokio::test]
    async fn test_unknown_ids_not_found() {
        let store = InMemoryLineageStore::new();
        assert_eq!(
            store.get_dataset("ds-missing").await.unwrap_err().kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            store.end_run("run-missing").await.unwrap_err().kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            store
                .append_transition("mdl-missing", Stage::Staging, "alice")
                .await
                .unwrap_err()
                .kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            store.find_entity("anything").await.unwrap_err().kind,
            ErrorKind::NotFound
        );
    }
}

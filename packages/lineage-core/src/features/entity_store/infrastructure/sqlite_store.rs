//! SQLite lineage store
//!
//! File-based persistent storage using SQLite. Uniqueness is delegated to
//! UNIQUE constraints (never check-then-insert), and every multi-step write
//! runs inside one transaction so integrity checks and the insert commit as
//! a single unit.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::config::WritePolicy;
use crate::errors::{LineageError, Result};
use crate::features::entity_store::domain::models::{
    generate_record_id, Dataset, Entity, Model, NewDataset, NewModel, NewRun, ParamValue, Run,
    Stage, StageTransition,
};
use crate::features::entity_store::domain::ports::LineageStore;

/// SQLite-based LineageStore implementation
#[derive(Clone)]
pub struct SqliteLineageStore {
    conn: Arc<Mutex<Connection>>,
    policy: WritePolicy,
}

impl SqliteLineageStore {
    /// Open (or create) a store at the given path with the default policy.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_policy(db_path, WritePolicy::default())
    }

    /// Open (or create) a store at the given path.
    pub fn with_policy(db_path: impl AsRef<Path>, policy: WritePolicy) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            policy: WritePolicy::default(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LineageError::internal("lineage store mutex poisoned"))
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                source TEXT NOT NULL,
                description TEXT,
                actor TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (name, version)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                name TEXT,
                parameters TEXT NOT NULL,
                code_ref TEXT,
                metrics TEXT NOT NULL,
                actor TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER
            )",
            [],
        )?;

        // Ordered projection of Run.dataset_refs; written only together with
        // its run, so it can never diverge from the entity record.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS run_datasets (
                run_id TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (run_id, dataset_id),
                FOREIGN KEY (run_id) REFERENCES runs(id),
                FOREIGN KEY (dataset_id) REFERENCES datasets(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_run_datasets_dataset
             ON run_datasets(dataset_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS models (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                artifact_ref TEXT NOT NULL,
                run_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_models_run
             ON models(run_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS stage_transitions (
                id TEXT PRIMARY KEY,
                model_id TEXT NOT NULL,
                from_stage TEXT NOT NULL,
                to_stage TEXT NOT NULL,
                actor TEXT NOT NULL,
                at INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                UNIQUE (model_id, seq),
                FOREIGN KEY (model_id) REFERENCES models(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transitions_model
             ON stage_transitions(model_id, at, seq)",
            [],
        )?;

        Ok(())
    }
}

// ─── Row mapping helpers ────────────────────────────────────────────────────

fn ts_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

// A persisted timestamp outside chrono's range is a corrupt row; surface it
// instead of misdating the record.
fn from_micros(v: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(v)
        .ok_or_else(|| LineageError::serialization(format!("timestamp out of range: {}", v)))
}

fn micros_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let v: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(v).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            Box::new(LineageError::serialization(format!(
                "timestamp out of range: {}",
                v
            ))),
        )
    })
}

fn dataset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dataset> {
    Ok(Dataset {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        source: row.get(3)?,
        description: row.get(4)?,
        actor: row.get(5)?,
        created_at: micros_column(row, 6)?,
    })
}

fn model_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Model> {
    Ok(Model {
        id: row.get(0)?,
        name: row.get(1)?,
        artifact_ref: row.get(2)?,
        run_id: row.get(3)?,
        actor: row.get(4)?,
        created_at: micros_column(row, 5)?,
    })
}

/// Raw run row; parameters/metrics JSON parsed after the rusqlite closure.
struct RunRow {
    id: String,
    name: Option<String>,
    parameters: String,
    code_ref: Option<String>,
    metrics: String,
    actor: String,
    started_at: i64,
    ended_at: Option<i64>,
}

fn run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        name: row.get(1)?,
        parameters: row.get(2)?,
        code_ref: row.get(3)?,
        metrics: row.get(4)?,
        actor: row.get(5)?,
        started_at: row.get(6)?,
        ended_at: row.get(7)?,
    })
}

const RUN_COLUMNS: &str = "id, name, parameters, code_ref, metrics, actor, started_at, ended_at";

fn load_dataset_refs(conn: &Connection, run_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT dataset_id FROM run_datasets WHERE run_id = ?1 ORDER BY position",
    )?;
    let refs = stmt
        .query_map(params![run_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(refs)
}

fn assemble_run(conn: &Connection, raw: RunRow) -> Result<Run> {
    let parameters: BTreeMap<String, ParamValue> = serde_json::from_str(&raw.parameters)?;
    let metrics: BTreeMap<String, f64> = serde_json::from_str(&raw.metrics)?;
    let dataset_refs = load_dataset_refs(conn, &raw.id)?;
    Ok(Run {
        id: raw.id,
        name: raw.name,
        dataset_refs,
        parameters,
        code_ref: raw.code_ref,
        metrics,
        actor: raw.actor,
        started_at: from_micros(raw.started_at)?,
        ended_at: raw.ended_at.map(from_micros).transpose()?,
    })
}

fn query_run(conn: &Connection, id: &str) -> Result<Option<Run>> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
            params![id],
            run_row,
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(assemble_run(conn, raw)?)),
        None => Ok(None),
    }
}

/// Raw transition row; stage strings parsed after the rusqlite closure.
struct TransitionRow {
    id: String,
    model_id: String,
    from_stage: String,
    to_stage: String,
    actor: String,
    at: i64,
    seq: u64,
}

fn transition_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransitionRow> {
    Ok(TransitionRow {
        id: row.get(0)?,
        model_id: row.get(1)?,
        from_stage: row.get(2)?,
        to_stage: row.get(3)?,
        actor: row.get(4)?,
        at: row.get(5)?,
        seq: row.get(6)?,
    })
}

fn assemble_transition(raw: TransitionRow) -> Result<StageTransition> {
    Ok(StageTransition {
        from_stage: Stage::parse(&raw.from_stage)?,
        to_stage: Stage::parse(&raw.to_stage)?,
        id: raw.id,
        model_id: raw.model_id,
        actor: raw.actor,
        at: from_micros(raw.at)?,
        seq: raw.seq,
    })
}

fn insert_transition(
    conn: &Connection,
    model_id: &str,
    from_stage: Stage,
    to_stage: Stage,
    actor: &str,
    seq: u64,
) -> Result<StageTransition> {
    let transition = StageTransition {
        id: generate_record_id("st"),
        model_id: model_id.to_string(),
        from_stage,
        to_stage,
        actor: actor.to_string(),
        at: Utc::now(),
        seq,
    };
    conn.execute(
        "INSERT INTO stage_transitions (id, model_id, from_stage, to_stage, actor, at, seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &transition.id,
            &transition.model_id,
            transition.from_stage.as_str(),
            transition.to_stage.as_str(),
            &transition.actor,
            ts_micros(transition.at),
            transition.seq,
        ],
    )?;
    Ok(transition)
}

#[async_trait]
impl LineageStore for SqliteLineageStore {
    async fn create_dataset(&self, new: NewDataset) -> Result<Dataset> {
        new.validate()?;
        let dataset = Dataset {
            id: Dataset::generate_id(&new.name, &new.version),
            name: new.name,
            version: new.version,
            source: new.source,
            description: new.description,
            actor: new.actor,
            created_at: Utc::now(),
        };

        let conn = self.lock_conn()?;
        // UNIQUE (name, version) does the duplicate detection atomically;
        // the constraint error surfaces as ErrorKind::Duplicate.
        conn.execute(
            "INSERT INTO datasets (id, name, version, source, description, actor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &dataset.id,
                &dataset.name,
                &dataset.version,
                &dataset.source,
                &dataset.description,
                &dataset.actor,
                ts_micros(dataset.created_at),
            ],
        )?;

        debug!(dataset_id = %dataset.id, name = %dataset.name, version = %dataset.version, "dataset created");
        Ok(dataset)
    }

    async fn create_run(&self, new: NewRun) -> Result<Run> {
        new.validate()?;
        let dataset_refs = new.deduplicated_refs();

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

        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        // Referential integrity: all parents must exist before the insert
        // commits. Failure rolls back the whole write.
        for dataset_id in &run.dataset_refs {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM datasets WHERE id = ?1",
                    params![dataset_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(LineageError::reference(format!(
                    "run references unknown dataset: {}",
                    dataset_id
                )));
            }
        }

        tx.execute(
            &format!(
                "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                RUN_COLUMNS
            ),
            params![
                &run.id,
                &run.name,
                serde_json::to_string(&run.parameters)?,
                &run.code_ref,
                serde_json::to_string(&run.metrics)?,
                &run.actor,
                ts_micros(run.started_at),
                Option::<i64>::None,
            ],
        )?;

        for (position, dataset_id) in run.dataset_refs.iter().enumerate() {
            tx.execute(
                "INSERT INTO run_datasets (run_id, dataset_id, position) VALUES (?1, ?2, ?3)",
                params![&run.id, dataset_id, position as i64],
            )?;
        }

        tx.commit()?;
        debug!(run_id = %run.id, datasets = run.dataset_refs.len(), "run created");
        Ok(run)
    }

    async fn record_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        let row: Option<(Option<i64>, String)> = tx
            .query_row(
                "SELECT ended_at, metrics FROM runs WHERE id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (ended_at, metrics_json) =
            row.ok_or_else(|| LineageError::not_found("run", run_id))?;
        if ended_at.is_some() {
            return Err(LineageError::invalid_state(format!(
                "run {} has ended; metrics are frozen",
                run_id
            )));
        }

        let mut metrics: BTreeMap<String, f64> = serde_json::from_str(&metrics_json)?;
        metrics.insert(key.to_string(), value);

        tx.execute(
            "UPDATE runs SET metrics = ?1 WHERE id = ?2",
            params![serde_json::to_string(&metrics)?, run_id],
        )?;
        tx.commit()?;

        debug!(run_id, key, value, "metric recorded");
        Ok(())
    }

    async fn end_run(&self, run_id: &str) -> Result<Run> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        let ended_at: Option<Option<i64>> = tx
            .query_row(
                "SELECT ended_at FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        match ended_at {
            None => return Err(LineageError::not_found("run", run_id)),
            Some(Some(_)) => {
                return Err(LineageError::invalid_state(format!(
                    "run {} has already been ended",
                    run_id
                )))
            }
            Some(None) => {}
        }

        tx.execute(
            "UPDATE runs SET ended_at = ?1 WHERE id = ?2",
            params![ts_micros(Utc::now()), run_id],
        )?;

        let run = query_run(&tx, run_id)?
            .ok_or_else(|| LineageError::not_found("run", run_id))?;
        tx.commit()?;

        info!(run_id, "run ended; metrics and parameters frozen");
        Ok(run)
    }

    async fn create_model(&self, new: NewModel) -> Result<Model> {
        new.validate()?;

        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        let run_ended: Option<Option<i64>> = tx
            .query_row(
                "SELECT ended_at FROM runs WHERE id = ?1",
                params![&new.run_id],
                |row| row.get(0),
            )
            .optional()?;

        let run_ended = run_ended.ok_or_else(|| {
            LineageError::reference(format!("model references unknown run: {}", new.run_id))
        })?;
        if self.policy.require_ended_run && run_ended.is_none() {
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

        tx.execute(
            "INSERT INTO models (id, name, artifact_ref, run_id, actor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &model.id,
                &model.name,
                &model.artifact_ref,
                &model.run_id,
                &model.actor,
                ts_micros(model.created_at),
            ],
        )?;

        // Sentinel transition: the model and its initial lifecycle record
        // commit as one unit, so the transition log is never empty.
        insert_transition(&tx, &model.id, Stage::Registered, Stage::Registered, &model.actor, 1)?;

        tx.commit()?;
        info!(model_id = %model.id, run_id = %model.run_id, "model registered");
        Ok(model)
    }

    async fn append_transition(
        &self,
        model_id: &str,
        to_stage: Stage,
        actor: &str,
    ) -> Result<StageTransition> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM models WHERE id = ?1",
                params![model_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(LineageError::not_found("model", model_id));
        }

        // Latest committed transition decides the current stage; validation
        // and append share the transaction so concurrent promotions cannot
        // both pass the same check.
        let latest: Option<(String, u64)> = tx
            .query_row(
                "SELECT to_stage, seq FROM stage_transitions
                 WHERE model_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![model_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (current_str, last_seq) = latest.ok_or_else(|| {
            LineageError::internal(format!("model {} has no sentinel transition", model_id))
        })?;
        let current = Stage::parse(&current_str)?;

        if !current.can_transition_to(to_stage) {
            return Err(LineageError::invalid_transition(format!(
                "cannot move model {} from {} to {}",
                model_id, current, to_stage
            )));
        }

        let transition = insert_transition(&tx, model_id, current, to_stage, actor, last_seq + 1)?;
        tx.commit()?;

        info!(model_id, from = %transition.from_stage, to = %transition.to_stage, actor, "stage transition");
        Ok(transition)
    }

    async fn get_dataset(&self, id: &str) -> Result<Dataset> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, name, version, source, description, actor, created_at
             FROM datasets WHERE id = ?1",
            params![id],
            dataset_from_row,
        )
        .optional()?
        .ok_or_else(|| LineageError::not_found("dataset", id))
    }

    async fn get_run(&self, id: &str) -> Result<Run> {
        let conn = self.lock_conn()?;
        query_run(&conn, id)?.ok_or_else(|| LineageError::not_found("run", id))
    }

    async fn get_model(&self, id: &str) -> Result<Model> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, name, artifact_ref, run_id, actor, created_at
             FROM models WHERE id = ?1",
            params![id],
            model_from_row,
        )
        .optional()?
        .ok_or_else(|| LineageError::not_found("model", id))
    }

    async fn find_dataset(&self, name: &str, version: &str) -> Result<Option<Dataset>> {
        let conn = self.lock_conn()?;
        let dataset = conn
            .query_row(
                "SELECT id, name, version, source, description, actor, created_at
                 FROM datasets WHERE name = ?1 AND version = ?2",
                params![name, version],
                dataset_from_row,
            )
            .optional()?;
        Ok(dataset)
    }

    async fn find_entity(&self, id: &str) -> Result<Entity> {
        {
            let conn = self.lock_conn()?;
            let dataset = conn
                .query_row(
                    "SELECT id, name, version, source, description, actor, created_at
                     FROM datasets WHERE id = ?1",
                    params![id],
                    dataset_from_row,
                )
                .optional()?;
            if let Some(dataset) = dataset {
                return Ok(Entity::Dataset(dataset));
            }

            if let Some(run) = query_run(&conn, id)? {
                return Ok(Entity::Run(run));
            }

            let model = conn
                .query_row(
                    "SELECT id, name, artifact_ref, run_id, actor, created_at
                     FROM models WHERE id = ?1",
                    params![id],
                    model_from_row,
                )
                .optional()?;
            if let Some(model) = model {
                return Ok(Entity::Model(model));
            }
        }
        Err(LineageError::not_found("entity", id))
    }

    async fn transitions(&self, model_id: &str) -> Result<Vec<StageTransition>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, model_id, from_stage, to_stage, actor, at, seq
             FROM stage_transitions WHERE model_id = ?1 ORDER BY at, seq",
        )?;
        let rows = stmt
            .query_map(params![model_id], transition_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(assemble_transition).collect()
    }

    async fn runs_consuming(&self, dataset_id: &str) -> Result<Vec<Run>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.name, r.parameters, r.code_ref, r.metrics, r.actor, r.started_at, r.ended_at
             FROM runs r JOIN run_datasets rd ON rd.run_id = r.id
             WHERE rd.dataset_id = ?1 ORDER BY r.started_at, r.id",
        )?;
        let rows = stmt
            .query_map(params![dataset_id], run_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|raw| assemble_run(&conn, raw)).collect()
    }

    async fn models_produced_by(&self, run_id: &str) -> Result<Vec<Model>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, artifact_ref, run_id, actor, created_at
             FROM models WHERE run_id = ?1 ORDER BY created_at, id",
        )?;
        let models = stmt
            .query_map(params![run_id], model_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(models)
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, version, source, description, actor, created_at
             FROM datasets ORDER BY created_at, id",
        )?;
        let datasets = stmt
            .query_map([], dataset_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(datasets)
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY started_at, id",
            RUN_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], run_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|raw| assemble_run(&conn, raw)).collect()
    }

    async fn list_models(&self) -> Result<Vec<Model>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, artifact_ref, run_id, actor, created_at
             FROM models ORDER BY created_at, id",
        )?;
        let models = stmt
            .query_map([], model_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
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
    async fn test_duplicate_dataset_rejected() {
        let store = SqliteLineageStore::in_memory().unwrap();

        let first = store.create_dataset(new_dataset("reviews", "v1")).await.unwrap();
        let err = store
            .create_dataset(new_dataset("reviews", "v1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);

        // First record unaffected
        let fetched = store.get_dataset(&first.id).await.unwrap();
        assert_eq!(fetched, first);
    }

    #[tokio::test]
    async fn test_create_run_checks_references() {
        let store = SqliteLineageStore::in_memory().unwrap();
        let d1 = store.create_dataset(new_dataset("reviews", "v1")).await.unwrap();

        let err = store
            .create_run(NewRun {
                name: None,
                dataset_refs: vec![d1.id.clone(), "ds-missing".to_string()],
                parameters: BTreeMap::new(),
                code_ref: None,
                actor: "alice".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);

        // Nothing partially created
        assert!(store.list_runs().await.unwrap().is_empty());
        assert!(store.runs_consuming(&d1.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_freeze_on_end() {
        let store = SqliteLineageStore::in_memory().unwrap();
        let d1 = store.create_dataset(new_dataset("reviews", "v1")).await.unwrap();
        let run = store
            .create_run(NewRun {
                name: Some("baseline".to_string()),
                dataset_refs: vec![d1.id],
                parameters: BTreeMap::new(),
                code_ref: Some("abc123".to_string()),
                actor: "alice".to_string(),
            })
            .await
            .unwrap();

        store.record_metric(&run.id, "accuracy", 0.8).await.unwrap();
        store.record_metric(&run.id, "accuracy", 0.91).await.unwrap(); // last-write-wins

        let ended = store.end_run(&run.id).await.unwrap();
        assert!(ended.is_ended());

        let err = store.record_metric(&run.id, "accuracy", 0.99).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);

        let err = store.end_run(&run.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);

        let reread = store.get_run(&run.id).await.unwrap();
        assert_eq!(reread.metrics["accuracy"], 0.91);
    }

    #[tokio::test]
    async fn test_model_requires_ended_run() {
        let store = SqliteLineageStore::in_memory().unwrap();
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

        let new_model = NewModel {
            name: "sentiment".to_string(),
            artifact_ref: "s3://bucket/m1.bin".to_string(),
            run_id: run.id.clone(),
            actor: "alice".to_string(),
        };

        let err = store.create_model(new_model.clone()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);

        store.end_run(&run.id).await.unwrap();
        let model = store.create_model(new_model).await.unwrap();

        // Sentinel transition written atomically with the model
        let transitions = store.transitions(&model.id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_stage, Stage::Registered);
        assert_eq!(transitions[0].to_stage, Stage::Registered);
        assert_eq!(store.current_stage(&model.id).await.unwrap(), Stage::Registered);
    }

    #[tokio::test]
    async fn test_model_reference_unknown_run() {
        let store = SqliteLineageStore::in_memory().unwrap();
        let err = store
            .create_model(NewModel {
                name: "m".to_string(),
                artifact_ref: "file:///m.bin".to_string(),
                run_id: "run-missing".to_string(),
                actor: "alice".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        assert!(store.list_models().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_policy_flag_allows_open_run_models() {
        let store = SqliteLineageStore::in_memory().unwrap();
        let relaxed = SqliteLineageStore {
            conn: store.conn.clone(),
            policy: WritePolicy {
                require_ended_run: false,
            },
        };

        let d1 = relaxed.create_dataset(new_dataset("reviews", "v1")).await.unwrap();
        let run = relaxed
            .create_run(NewRun {
                name: None,
                dataset_refs: vec![d1.id],
                parameters: BTreeMap::new(),
                code_ref: None,
                actor: "alice".to_string(),
            })
            .await
            .unwrap();

        let model = relaxed
            .create_model(NewModel {
                name: "early".to_string(),
                artifact_ref: "file:///m.bin".to_string(),
                run_id: run.id,
                actor: "alice".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(relaxed.current_stage(&model.id).await.unwrap(), Stage::Registered);
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_surfaces_error() {
        let store = SqliteLineageStore::in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO datasets (id, name, version, source, description, actor, created_at)
                 VALUES ('ds-bad', 'n', 'v', 's', NULL, 'alice', ?1)",
                params![i64::MAX],
            )
            .unwrap();
        }

        let err = store.get_dataset("ds-bad").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Serialization);

        let err = store.list_datasets().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Serialization);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.db");

        let first = SqliteLineageStore::new(&path).unwrap();
        let dataset = first.create_dataset(new_dataset("reviews", "v1")).await.unwrap();
        drop(first);

        let reopened = SqliteLineageStore::new(&path).unwrap();
        let fetched = reopened
            .find_dataset("reviews", "v1")
            .await
            .unwrap()
            .expect("dataset survives reopen");
        assert_eq!(fetched.id, dataset.id);
    }
}

//! Lineage domain models
//!
//! Every record is immutable once persisted. "Updates" exist only as the two
//! exceptions the data model carves out: a run accumulates metrics until its
//! one-time `ended_at` freeze, and a model's stage evolves through appended
//! `StageTransition` records. Nothing else is ever rewritten.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{LineageError, Result};

/// Dataset ID: content-stable, derived from `(name, version)`
pub type DatasetId = String;

/// Run ID: generated at creation
pub type RunId = String;

/// Model ID: generated at creation
pub type ModelId = String;

/// Scalar hyperparameter value, fixed at run creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// Model lifecycle stage
///
/// Forward-only chain: `registered → staging → production → archived`.
/// Skips are legal (`registered → production`), backward moves and no-ops
/// are not, and nothing leaves `archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Registered,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Registered => "registered",
            Stage::Staging => "staging",
            Stage::Production => "production",
            Stage::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "registered" => Ok(Stage::Registered),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            other => Err(LineageError::validation(format!(
                "invalid lifecycle stage: {}",
                other
            ))),
        }
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: Stage) -> bool {
        *self != Stage::Archived && to > *self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entity type discriminator for generic lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Dataset,
    Run,
    Model,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Dataset => "dataset",
            EntityKind::Run => "run",
            EntityKind::Model => "model",
        }
    }
}

/// Versioned dataset record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Content-stable ID derived from `(name, version)`
    pub id: DatasetId,
    pub name: String,
    pub version: String,
    /// Source URI or path, opaque to the system
    pub source: String,
    pub description: Option<String>,
    /// Who registered this dataset
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    /// Derive the content-stable dataset ID from its natural key.
    ///
    /// Each field is length-prefixed before hashing so the boundary between
    /// `name` and `version` is unambiguous for any field contents;
    /// `("a:b", "c")` and `("a", "b:c")` derive different IDs.
    pub fn generate_id(name: &str, version: &str) -> DatasetId {
        let mut hasher = Sha256::new();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((version.len() as u64).to_le_bytes());
        hasher.update(version.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("ds-{}", &digest[..32])
    }
}

/// Training run record
///
/// `dataset_refs` and `parameters` are frozen at creation. `metrics` stays
/// writable (last-write-wins per key) until `ended_at` is set, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// Optional human-readable label, no uniqueness enforced
    pub name: Option<String>,
    /// Ordered, deduplicated dataset IDs consumed by this run (non-empty)
    pub dataset_refs: Vec<DatasetId>,
    pub parameters: BTreeMap<String, ParamValue>,
    /// e.g. a git commit hash; `None` is an explicit, valid state
    pub code_ref: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub actor: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Trained model record
///
/// The model's stage is never stored here; it is always computed from the
/// latest entry in its stage-transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    /// Artifact URI or path, opaque to the system
    pub artifact_ref: String,
    /// The exactly-one run that produced this model
    pub run_id: RunId,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only lifecycle event
///
/// Transitions for one model are totally ordered by `(at, seq)`; `seq` is
/// assigned by the store at write time and breaks timestamp ties. The first
/// transition for every model is the `registered → registered` sentinel,
/// written atomically with the model itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub id: String,
    pub model_id: ModelId,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub seq: u64,
}

/// Any persisted lineage entity, for generic graph traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Dataset(Dataset),
    Run(Run),
    Model(Model),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Dataset(d) => &d.id,
            Entity::Run(r) => &r.id,
            Entity::Model(m) => &m.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Dataset(_) => EntityKind::Dataset,
            Entity::Run(_) => EntityKind::Run,
            Entity::Model(_) => EntityKind::Model,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Entity::Dataset(d) => d.created_at,
            Entity::Run(r) => r.started_at,
            Entity::Model(m) => m.created_at,
        }
    }
}

/// Input for `create_dataset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDataset {
    pub name: String,
    pub version: String,
    pub source: String,
    pub description: Option<String>,
    pub actor: String,
}

impl NewDataset {
    pub fn validate(&self) -> Result<()> {
        require_field("name", &self.name)?;
        require_field("version", &self.version)?;
        require_field("source", &self.source)?;
        require_field("actor", &self.actor)?;
        Ok(())
    }
}

/// Input for `create_run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub name: Option<String>,
    pub dataset_refs: Vec<DatasetId>,
    pub parameters: BTreeMap<String, ParamValue>,
    pub code_ref: Option<String>,
    pub actor: String,
}

impl NewRun {
    pub fn validate(&self) -> Result<()> {
        require_field("actor", &self.actor)?;
        if self.dataset_refs.is_empty() {
            return Err(LineageError::validation(
                "a run must reference at least one dataset",
            ));
        }
        Ok(())
    }

    /// Referenced dataset IDs with order preserved and duplicates dropped.
    pub fn deduplicated_refs(&self) -> Vec<DatasetId> {
        let mut seen = std::collections::HashSet::new();
        self.dataset_refs
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

/// Input for `create_model`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub artifact_ref: String,
    pub run_id: RunId,
    pub actor: String,
}

impl NewModel {
    pub fn validate(&self) -> Result<()> {
        require_field("name", &self.name)?;
        require_field("artifact_ref", &self.artifact_ref)?;
        require_field("run_id", &self.run_id)?;
        require_field("actor", &self.actor)?;
        Ok(())
    }
}

/// Generate a fresh record ID with a type prefix.
pub fn generate_record_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn require_field(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(LineageError::validation(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

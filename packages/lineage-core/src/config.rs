//! Runtime configuration
//!
//! Selects the persistence backend and the write-policy flags. Loadable from
//! the environment for service deployments or built programmatically in
//! tests.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::features::entity_store::domain::ports::LineageStore;
use crate::features::entity_store::infrastructure::{InMemoryLineageStore, SqliteLineageStore};

/// Environment variable pointing at the SQLite database file.
pub const DB_PATH_ENV_VAR: &str = "ML_LINEAGE_DB_PATH";

/// Environment variable toggling the ended-run policy (`0`/`false` disables).
pub const REQUIRE_ENDED_RUN_ENV_VAR: &str = "ML_LINEAGE_REQUIRE_ENDED_RUN";

/// Persistence backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// Volatile in-process store (tests, demos)
    Memory,
    /// File-backed SQLite store
    Sqlite { path: PathBuf },
}

/// Write-time policy flags
///
/// `require_ended_run`: whether a model may only reference a run that has
/// already been ended. On by default; configurable because the source
/// material leaves the constraint implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePolicy {
    pub require_ended_run: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            require_ended_run: true,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageConfig {
    pub backend: BackendKind,
    #[serde(default)]
    pub policy: WritePolicy,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            policy: WritePolicy::default(),
        }
    }
}

impl LineageConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        let backend = match std::env::var(DB_PATH_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => BackendKind::Sqlite {
                path: PathBuf::from(path),
            },
            _ => BackendKind::Memory,
        };

        let require_ended_run = match std::env::var(REQUIRE_ENDED_RUN_ENV_VAR) {
            Ok(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"),
            Err(_) => true,
        };

        Self {
            backend,
            policy: WritePolicy { require_ended_run },
        }
    }

    /// Open the configured persistence backend.
    pub fn build_store(&self) -> Result<Arc<dyn LineageStore>> {
        match &self.backend {
            BackendKind::Memory => Ok(Arc::new(InMemoryLineageStore::with_policy(self.policy))),
            BackendKind::Sqlite { path } => Ok(Arc::new(SqliteLineageStore::with_policy(
                path,
                self.policy,
            )?)),
        }
    }
}

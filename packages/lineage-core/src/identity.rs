//! Actor identity resolution
//!
//! Resolution order: `ML_LINEAGE_ACTOR`, then the OS user (`USER` /
//! `USERNAME`), then the `"unknown"` placeholder. Absence of identity is a
//! valid resolved value, never an error.
//!
//! The resolved actor is explicit input to every write operation. Nothing
//! below the call boundary reads the environment, which keeps the store and
//! query layers testable without environment mocking.

use sha2::{Digest, Sha256};

/// Environment variable for an explicitly configured actor.
pub const ACTOR_ENV_VAR: &str = "ML_LINEAGE_ACTOR";

/// Placeholder when no identity source is available.
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Resolve the actor string for the current invocation.
pub fn resolve_actor() -> String {
    for var in [ACTOR_ENV_VAR, "USER", "USERNAME"] {
        if let Ok(value) = std::env::var(var) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    UNKNOWN_ACTOR.to_string()
}

/// SHA-256 fingerprint of an actor string, for callers that prefer not to
/// persist raw usernames.
pub fn actor_fingerprint(actor: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(actor.as_bytes());
    format!("{:x}", hasher.finalize())
}

//! Idempotent reconcilers.
//!
//! Each submodule drives one entity type towards a declared state:
//! observe, compare, then mutate only on a diff. Every entry point
//! returns an outcome with a `changed` flag telling the caller whether
//! anything was written. Failed API calls surface as errors without
//! retries; rerunning after a partial failure converges because the
//! reconcilers re-observe before acting.

pub mod folder;
pub mod resource;
pub mod user;

pub use folder::{ensure_folder, FolderOutcome, FolderParams};
pub use resource::{ensure_resource, ResourceOutcome, ResourceParams};
pub use user::{ensure_user, user_facts, UserFact, UserOutcome, UserParams};

use crate::types::PassboltError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared target state for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    #[default]
    Present,
    Absent,
}

/// Parse a server-issued entity id into a typed UUID.
pub(crate) fn parse_entity_id(id: &str) -> Result<Uuid, PassboltError> {
    Uuid::parse_str(id)
        .map_err(|e| PassboltError::parse(format!("Invalid entity id {}: {}", id, e)))
}

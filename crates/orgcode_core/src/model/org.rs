//! Organization node domain model.
//!
//! # Responsibility
//! - Define the persisted organization unit record and its write inputs.
//! - Carry explicit audit identity for every mutation.
//!
//! # Invariants
//! - `id` is assigned once and never changes.
//! - `parent_id == ROOT_PARENT_ID` exactly when `code` has one segment.
//! - A non-root node's parent holds `code.parent()` and `id == parent_id`.

use crate::model::code::OrgCode;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable organization node identifier.
pub type OrgId = i64;

/// Identifier of the actor performing a mutation.
pub type ActorId = i64;

/// Sentinel `parent_id` for top-level nodes.
pub const ROOT_PARENT_ID: OrgId = 0;

/// Persisted organization unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgNode {
    pub id: OrgId,
    /// Hierarchy position; rewritten when the node or an ancestor moves.
    pub code: OrgCode,
    /// `ROOT_PARENT_ID` for top-level nodes.
    pub parent_id: OrgId,
    pub name: String,
    pub name_abbr: Option<String>,
    pub comment: Option<String>,
    /// Soft delete tombstone. Tombstoned rows keep their code reserved.
    pub is_deleted: bool,
    pub created_by: ActorId,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    pub updated_by: ActorId,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
}

impl OrgNode {
    /// Returns whether this node starts its own tree.
    pub fn is_root(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }
}

/// Descriptive fields supplied on create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgNodeFields {
    pub name: String,
    pub name_abbr: Option<String>,
    pub comment: Option<String>,
}

impl OrgNodeFields {
    /// Creates fields with only a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Who performs a mutation and when.
///
/// Passed explicitly into every write so the core never reads request-scoped
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditStamp {
    pub actor: ActorId,
    /// Epoch milliseconds.
    pub at_ms: i64,
}

impl AuditStamp {
    /// Stamp for `actor` at a caller-chosen time.
    pub fn at(actor: ActorId, at_ms: i64) -> Self {
        Self { actor, at_ms }
    }

    /// Stamp for `actor` at the current system time.
    pub fn now(actor: ActorId) -> Self {
        Self::at(actor, epoch_millis())
    }
}

pub(crate) fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

//! Organization hierarchy use-case service.
//!
//! # Responsibility
//! - Normalize descriptive input and assign ids before persistence.
//! - Map repository failures onto caller-distinguishable error kinds.
//! - Assemble nested trees for presentation.
//!
//! # Invariants
//! - Every mutation carries an explicit `AuditStamp`.
//! - A move to the node's current parent writes nothing.
//! - Business-rule failures are detected before any write is committed.

use crate::ids::IdSource;
use crate::model::code::OrgCode;
use crate::model::org::{AuditStamp, OrgId, OrgNode, OrgNodeFields, ROOT_PARENT_ID};
use crate::model::tree::{build_forest, build_tree, OrgTreeNode, TreeBuildError};
use crate::repo::org_repo::{MoveOutcome, OrgRepoError, OrgRepository};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Coarse failure category; each implies a different corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrgErrorKind {
    InvalidInput,
    NotFound,
    SelfParent,
    CyclicMove,
    HasChildren,
    CapacityExceeded,
    RootNotFound,
    StorageFailure,
}

/// Errors from org hierarchy service operations.
#[derive(Debug)]
pub enum OrgServiceError {
    /// Name is blank after trim.
    InvalidName,
    /// Target node does not exist.
    NodeNotFound(OrgId),
    /// Referenced parent does not exist.
    ParentNotFound(OrgId),
    /// Node targeted as its own parent.
    SelfParent(OrgId),
    /// Target parent lies within the mover's subtree.
    CyclicMove { node_id: OrgId, parent_id: OrgId },
    /// Delete attempted on a node with children.
    HasChildren(OrgId),
    /// No sibling code left under the parent.
    CapacityExceeded { parent_id: OrgId },
    /// Loaded rows contain no root.
    RootNotFound,
    /// Storage or schema failure; the transaction was rolled back.
    Storage(OrgRepoError),
}

impl OrgServiceError {
    /// Returns the coarse category of this error.
    pub fn kind(&self) -> OrgErrorKind {
        match self {
            Self::InvalidName => OrgErrorKind::InvalidInput,
            Self::NodeNotFound(_) | Self::ParentNotFound(_) => OrgErrorKind::NotFound,
            Self::SelfParent(_) => OrgErrorKind::SelfParent,
            Self::CyclicMove { .. } => OrgErrorKind::CyclicMove,
            Self::HasChildren(_) => OrgErrorKind::HasChildren,
            Self::CapacityExceeded { .. } => OrgErrorKind::CapacityExceeded,
            Self::RootNotFound => OrgErrorKind::RootNotFound,
            Self::Storage(_) => OrgErrorKind::StorageFailure,
        }
    }

    /// Stable machine-readable code used in log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidName => "invalid_name",
            Self::NodeNotFound(_) => "node_not_found",
            Self::ParentNotFound(_) => "parent_not_found",
            Self::SelfParent(_) => "self_parent",
            Self::CyclicMove { .. } => "cyclic_move",
            Self::HasChildren(_) => "has_children",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::RootNotFound => "root_not_found",
            Self::Storage(OrgRepoError::Db(err)) if err.is_busy() => "storage_busy",
            Self::Storage(_) => "storage_failure",
        }
    }
}

impl Display for OrgServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "org name must not be blank"),
            Self::NodeNotFound(id) => write!(f, "org node not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "org parent not found: {id}"),
            Self::SelfParent(id) => write!(f, "org node {id} cannot be its own parent"),
            Self::CyclicMove { node_id, parent_id } => write!(
                f,
                "move would create cycle: node {node_id} under its descendant {parent_id}"
            ),
            Self::HasChildren(id) => {
                write!(f, "org node {id} has children; delete or move them first")
            }
            Self::CapacityExceeded { parent_id } => {
                write!(f, "no sibling code left under parent {parent_id}")
            }
            Self::RootNotFound => write!(f, "org tree has no root node"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OrgServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<OrgRepoError> for OrgServiceError {
    fn from(value: OrgRepoError) -> Self {
        match value {
            OrgRepoError::NodeNotFound(id) => Self::NodeNotFound(id),
            OrgRepoError::ParentNotFound(id) => Self::ParentNotFound(id),
            OrgRepoError::SelfParent(id) => Self::SelfParent(id),
            OrgRepoError::CyclicMove { node_id, parent_id } => {
                Self::CyclicMove { node_id, parent_id }
            }
            OrgRepoError::HasChildren(id) => Self::HasChildren(id),
            OrgRepoError::CapacityExceeded { parent_id } => Self::CapacityExceeded { parent_id },
            other => Self::Storage(other),
        }
    }
}

impl From<TreeBuildError> for OrgServiceError {
    fn from(value: TreeBuildError) -> Self {
        match value {
            TreeBuildError::RootNotFound => Self::RootNotFound,
        }
    }
}

pub type OrgServiceResult<T> = Result<T, OrgServiceError>;

/// Org hierarchy service facade.
pub struct OrgService<R: OrgRepository, I: IdSource> {
    repo: R,
    ids: I,
}

impl<R: OrgRepository, I: IdSource> OrgService<R, I> {
    /// Creates service from repository and id source.
    pub fn new(repo: R, ids: I) -> Self {
        Self { repo, ids }
    }

    /// Previews the code the next child of `parent_id` would receive.
    pub fn generate_code(&self, parent_id: OrgId) -> OrgServiceResult<OrgCode> {
        self.repo.generate_code(parent_id).map_err(Into::into)
    }

    /// Creates one node under `parent_id` (`ROOT_PARENT_ID` starts a new tree).
    pub fn create_node(
        &self,
        parent_id: OrgId,
        fields: OrgNodeFields,
        stamp: &AuditStamp,
    ) -> OrgServiceResult<OrgNode> {
        let started_at = Instant::now();
        let fields = normalize_fields(fields)?;
        let id = self.ids.next_id();

        let result = self
            .repo
            .create_node(id, parent_id, &fields, stamp)
            .map_err(OrgServiceError::from);
        match &result {
            Ok(node) => info!(
                "event=org_create module=service status=ok node_id={} parent_id={} code={} actor={} duration_ms={}",
                node.id,
                parent_id,
                node.code,
                stamp.actor,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("org_create", id, err, started_at),
        }
        result
    }

    /// Loads one active node.
    pub fn get_node(&self, id: OrgId) -> OrgServiceResult<OrgNode> {
        self.repo
            .get_node(id, false)?
            .ok_or(OrgServiceError::NodeNotFound(id))
    }

    /// Lists active children of `parent_id`, ordered by code.
    pub fn list_children(&self, parent_id: OrgId) -> OrgServiceResult<Vec<OrgNode>> {
        if parent_id != ROOT_PARENT_ID && self.repo.get_node(parent_id, false)?.is_none() {
            return Err(OrgServiceError::ParentNotFound(parent_id));
        }
        self.repo.list_children(parent_id).map_err(Into::into)
    }

    /// Lists active top-level nodes, ordered by code.
    pub fn list_roots(&self) -> OrgServiceResult<Vec<OrgNode>> {
        self.list_children(ROOT_PARENT_ID)
    }

    /// Replaces descriptive fields without touching hierarchy position.
    pub fn update_node(
        &self,
        id: OrgId,
        fields: OrgNodeFields,
        stamp: &AuditStamp,
    ) -> OrgServiceResult<OrgNode> {
        let started_at = Instant::now();
        let result = normalize_fields(fields).and_then(|fields| {
            self.repo
                .update_fields(id, &fields, stamp)
                .map_err(OrgServiceError::from)
        });
        match &result {
            Ok(node) => info!(
                "event=org_update module=service status=ok node_id={id} code={} actor={} duration_ms={}",
                node.code,
                stamp.actor,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("org_update", id, err, started_at),
        }
        result
    }

    /// Re-parents one node, rewriting the codes of its whole subtree atomically.
    ///
    /// Returns `false` when `new_parent_id` already is the node's parent, in
    /// which case nothing is written.
    pub fn move_node(
        &self,
        id: OrgId,
        new_parent_id: OrgId,
        stamp: &AuditStamp,
    ) -> OrgServiceResult<bool> {
        let started_at = Instant::now();
        match self.repo.move_node(id, new_parent_id, stamp) {
            Ok(MoveOutcome::Unchanged) => {
                info!(
                    "event=org_move module=service status=skipped node_id={id} parent_id={new_parent_id} reason=same_parent"
                );
                Ok(false)
            }
            Ok(MoveOutcome::Moved {
                old_code,
                new_code,
                descendants_rewritten,
            }) => {
                info!(
                    "event=org_move module=service status=ok node_id={id} parent_id={new_parent_id} old_code={old_code} new_code={new_code} rewritten={descendants_rewritten} actor={} duration_ms={}",
                    stamp.actor,
                    started_at.elapsed().as_millis()
                );
                Ok(true)
            }
            Err(err) => {
                let err = OrgServiceError::from(err);
                log_failure("org_move", id, &err, started_at);
                Err(err)
            }
        }
    }

    /// Soft-deletes one node that has no children.
    pub fn delete_node(&self, id: OrgId, stamp: &AuditStamp) -> OrgServiceResult<()> {
        let started_at = Instant::now();
        let result = self
            .repo
            .delete_node(id, stamp)
            .map_err(OrgServiceError::from);
        match &result {
            Ok(()) => info!(
                "event=org_delete module=service status=ok node_id={id} actor={} duration_ms={}",
                stamp.actor,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("org_delete", id, err, started_at),
        }
        result
    }

    /// Returns the whole tree that contains `id`, from its top-level root down.
    ///
    /// Rows come from a single read, so a concurrent move shows up either
    /// entirely or not at all.
    pub fn get_tree(&self, id: OrgId) -> OrgServiceResult<OrgTreeNode> {
        let rows = self.repo.list_tree_of(id)?;
        if rows.is_empty() {
            return Err(OrgServiceError::NodeNotFound(id));
        }
        build_tree(rows).map_err(Into::into)
    }

    /// Returns every tree, one per active top-level root, ordered by root code.
    pub fn get_all_trees(&self) -> OrgServiceResult<Vec<OrgTreeNode>> {
        Ok(build_forest(self.repo.list_active_nodes()?))
    }
}

fn log_failure(event: &str, id: OrgId, err: &OrgServiceError, started_at: Instant) {
    let duration_ms = started_at.elapsed().as_millis();
    if err.kind() == OrgErrorKind::StorageFailure {
        error!(
            "event={event} module=service status=error node_id={id} error_code={} duration_ms={duration_ms} error={err}",
            err.error_code()
        );
    } else {
        warn!(
            "event={event} module=service status=rejected node_id={id} error_code={} duration_ms={duration_ms}",
            err.error_code()
        );
    }
}

fn normalize_fields(fields: OrgNodeFields) -> OrgServiceResult<OrgNodeFields> {
    let name = fields.name.trim();
    if name.is_empty() {
        return Err(OrgServiceError::InvalidName);
    }
    Ok(OrgNodeFields {
        name: name.to_string(),
        name_abbr: normalize_optional(fields.name_abbr),
        comment: normalize_optional(fields.comment),
    })
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

//! Core domain logic for the organization hierarchy.
//! This crate is the single source of truth for hierarchy code invariants.

pub mod db;
pub mod ids;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use ids::{IdSource, TimeOrderedIdSource};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel};
pub use model::code::{CodeError, OrgCode, MAX_SEGMENT, SEGMENT_WIDTH};
pub use model::org::{ActorId, AuditStamp, OrgId, OrgNode, OrgNodeFields, ROOT_PARENT_ID};
pub use model::tree::{build_forest, build_tree, OrgTreeNode, TreeBuildError};
pub use repo::org_repo::{
    MoveOutcome, OrgRepoError, OrgRepoResult, OrgRepository, SqliteOrgRepository,
};
pub use service::org_service::{OrgErrorKind, OrgService, OrgServiceError, OrgServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

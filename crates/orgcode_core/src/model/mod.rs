//! Organization hierarchy domain model.
//!
//! # Responsibility
//! - Define the org node record, its segmented code, and nested tree views.
//! - Keep code arithmetic and tree assembly free of storage access.
//!
//! # Invariants
//! - Every node is identified by a stable `OrgId`.
//! - Hierarchy position is encoded in `OrgCode`, one segment per level.
//! - Deletion is a soft-delete tombstone, not a hard delete.

pub mod code;
pub mod org;
pub mod tree;

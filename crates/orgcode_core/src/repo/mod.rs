//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for org nodes.
//! - Isolate SQLite query and transaction details from service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NodeNotFound`, `CyclicMove`, ...)
//!   in addition to DB transport errors.

pub mod org_repo;

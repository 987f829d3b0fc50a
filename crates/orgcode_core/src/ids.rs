//! Unique identifier source.
//!
//! # Responsibility
//! - Define the id collaborator used when creating org nodes.
//! - Provide a process-local, roughly time-ordered default implementation.
//!
//! # Invariants
//! - `TimeOrderedIdSource` returns strictly increasing positive ids.

use crate::model::org::{epoch_millis, OrgId};
use std::sync::atomic::{AtomicI64, Ordering};

const SEQUENCE_BITS: u32 = 12;

/// Source of fresh, globally unique node ids.
pub trait IdSource {
    /// Returns a new id on every call.
    fn next_id(&self) -> OrgId;
}

impl<T: IdSource + ?Sized> IdSource for &T {
    fn next_id(&self) -> OrgId {
        (**self).next_id()
    }
}

/// Millisecond timestamp shifted left with an in-process sequence in the low bits.
///
/// Unique within one process. Multi-process deployments should supply their
/// own `IdSource`.
#[derive(Debug, Default)]
pub struct TimeOrderedIdSource {
    last: AtomicI64,
}

impl TimeOrderedIdSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for TimeOrderedIdSource {
    fn next_id(&self) -> OrgId {
        let floor = epoch_millis().max(1) << SEQUENCE_BITS;
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = floor.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

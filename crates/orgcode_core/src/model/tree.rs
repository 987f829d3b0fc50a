//! Nested tree reconstruction from flat organization rows.
//!
//! # Responsibility
//! - Rebuild parent/child nesting for presentation without storage access.
//!
//! # Invariants
//! - Children keep the relative order of the input rows (callers pass `code ASC`).
//! - Each input row appears at most once in the output.
//! - Rows whose parent is absent from the input are unreachable and dropped.

use crate::model::org::{OrgId, OrgNode};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from tree reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeBuildError {
    /// No row in the input has `parent_id == ROOT_PARENT_ID`.
    RootNotFound,
}

impl Display for TreeBuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RootNotFound => write!(f, "no root node in supplied rows"),
        }
    }
}

impl Error for TreeBuildError {}

/// One node with its nested children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgTreeNode {
    #[serde(flatten)]
    pub node: OrgNode,
    pub children: Vec<OrgTreeNode>,
}

impl OrgTreeNode {
    /// Total node count in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(&node.children);
        }
        count
    }

    /// Finds a node by id in this subtree.
    pub fn find(&self, id: OrgId) -> Option<&OrgTreeNode> {
        if self.node.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Builds the tree rooted at the first root row of `rows`.
pub fn build_tree(rows: Vec<OrgNode>) -> Result<OrgTreeNode, TreeBuildError> {
    build_forest(rows)
        .into_iter()
        .next()
        .ok_or(TreeBuildError::RootNotFound)
}

/// Builds one tree per root row, in input order.
pub fn build_forest(rows: Vec<OrgNode>) -> Vec<OrgTreeNode> {
    let index_by_id: HashMap<OrgId, usize> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| (row.id, index))
        .collect();

    let mut child_indexes: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
    let mut root_indexes = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        if row.is_root() {
            root_indexes.push(index);
        } else if let Some(&parent_index) = index_by_id.get(&row.parent_id) {
            if parent_index != index {
                child_indexes[parent_index].push(index);
            }
        }
    }

    let mut slots: Vec<Option<OrgNode>> = rows.into_iter().map(Some).collect();
    root_indexes
        .into_iter()
        .filter_map(|index| assemble(index, &mut slots, &child_indexes))
        .collect()
}

/// Assembles the subtree under `root` without recursion.
fn assemble(
    root: usize,
    slots: &mut [Option<OrgNode>],
    child_indexes: &[Vec<usize>],
) -> Option<OrgTreeNode> {
    // Pre-order walk; taking each slot guarantees termination on corrupt links.
    let mut visited = Vec::new();
    let mut pending = vec![root];
    while let Some(index) = pending.pop() {
        let Some(node) = slots[index].take() else {
            continue;
        };
        visited.push((index, node));
        pending.extend(child_indexes[index].iter().rev());
    }

    // Reverse pre-order finishes every child before its parent.
    let mut finished: HashMap<usize, OrgTreeNode> = HashMap::with_capacity(visited.len());
    for (index, node) in visited.into_iter().rev() {
        let children = child_indexes[index]
            .iter()
            .filter_map(|child| finished.remove(child))
            .collect();
        finished.insert(index, OrgTreeNode { node, children });
    }
    finished.remove(&root)
}

//! Cycle-safe traversal over the parent/child hierarchy.
//!
//! The hierarchy map is not guaranteed to be a tree: repeated content-hash
//! ids or a hand-edited document can introduce cycles or shared children.
//! [`HierarchyGraph::walk`] is an explicit-stack preorder DFS that visits
//! every id at most once, so every consumer terminates regardless of shape.

use std::collections::{BTreeMap, HashSet};

use super::types::HierarchyNode;

/// One visited node in walk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit<'a> {
    pub id: &'a str,
    /// Index into the walk output of the node this one was reached from.
    pub parent: Option<usize>,
}

/// Read-only view over a hierarchy map.
#[derive(Debug, Clone, Copy)]
pub struct HierarchyGraph<'a> {
    nodes: &'a BTreeMap<String, HierarchyNode>,
}

impl<'a> HierarchyGraph<'a> {
    pub fn new(nodes: &'a BTreeMap<String, HierarchyNode>) -> Self {
        Self { nodes }
    }

    /// Ids of nodes without a parent, in map order.
    pub fn roots(&self) -> Vec<&'a str> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent_id.is_none())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Children of `id` in insertion order; empty for unknown ids.
    pub fn children(&self, id: &str) -> &'a [String] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Preorder walk from `roots`, visiting each id at most once.
    ///
    /// `descend` decides whether the children of a visited node are explored.
    /// Ids that repeat (through a cycle or a second parent) are skipped the
    /// second time they are reached.
    pub fn walk<F>(&self, roots: &[&'a str], descend: F) -> Vec<Visit<'a>>
    where
        F: Fn(&str) -> bool,
    {
        let mut visits: Vec<Visit<'a>> = Vec::new();
        let mut visited: HashSet<&'a str> = HashSet::new();
        let mut stack: Vec<(&'a str, Option<usize>)> =
            roots.iter().rev().map(|id| (*id, None)).collect();

        while let Some((id, parent)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let index = visits.len();
            visits.push(Visit { id, parent });

            if descend(id) {
                for child in self.children(id).iter().rev() {
                    if !visited.contains(child.as_str()) {
                        stack.push((child.as_str(), Some(index)));
                    }
                }
            }
        }

        visits
    }
}
